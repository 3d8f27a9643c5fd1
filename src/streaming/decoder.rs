//! Decoding a reassembled record stream.

use crate::error::CorruptionError;
use crate::streaming::protocol::DirectoryEntryRecord;
use std::ops::Deref;

/// Capacity of a fresh [`DirentList`].
pub const INITIAL_CAPACITY: usize = 8;

/// Decoded directory entries in walk order.
///
/// Starts at [`INITIAL_CAPACITY`], doubles whenever full and is trimmed to
/// its exact length once decoding completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirentList {
    entries: Vec<DirectoryEntryRecord>,
}

impl Default for DirentList {
    fn default() -> Self {
        Self::new()
    }
}

impl DirentList {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn push(&mut self, record: DirectoryEntryRecord) {
        let capacity = self.entries.capacity();
        if self.entries.len() == capacity {
            self.entries.reserve_exact(capacity.max(INITIAL_CAPACITY));
        }
        self.entries.push(record);
    }

    pub fn shrink_to_fit(&mut self) {
        self.entries.shrink_to_fit();
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn as_slice(&self) -> &[DirectoryEntryRecord] {
        &self.entries
    }

    pub fn into_vec(self) -> Vec<DirectoryEntryRecord> {
        self.entries
    }
}

impl Deref for DirentList {
    type Target = [DirectoryEntryRecord];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl IntoIterator for DirentList {
    type Item = DirectoryEntryRecord;
    type IntoIter = std::vec::IntoIter<DirectoryEntryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a DirentList {
    type Item = &'a DirectoryEntryRecord;
    type IntoIter = std::slice::Iter<'a, DirectoryEntryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Decode every record in `buf`.
///
/// All or nothing: a record that runs past the end of the buffer, or is
/// otherwise malformed, fails the whole decode. An empty buffer is an empty
/// list.
pub fn decode(buf: &[u8]) -> Result<DirentList, CorruptionError> {
    let mut list = DirentList::new();
    let mut cursor = buf;

    while !cursor.is_empty() {
        let offset = buf.len() - cursor.len();
        let record =
            DirectoryEntryRecord::decode(&mut cursor).map_err(|reason| CorruptionError {
                index: list.len(),
                offset,
                reason,
            })?;
        list.push(record);
    }

    list.shrink_to_fit();
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::protocol::encode_records;

    fn sample() -> Vec<DirectoryEntryRecord> {
        vec![
            DirectoryEntryRecord::new("/a.txt", 5, true),
            DirectoryEntryRecord::new("/b.txt", 9, false),
        ]
    }

    #[test]
    fn test_decode_empty() {
        let list = decode(&[]).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_decode_in_order() {
        let encoded = encode_records(&sample());
        let list = decode(&encoded).unwrap();
        assert_eq!(list.as_slice(), sample().as_slice());
    }

    #[test]
    fn test_truncated_last_byte() {
        let encoded = encode_records(&sample());
        let err = decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.offset, sample()[0].encoded_len());
    }

    #[test]
    fn test_declared_name_too_long() {
        let mut encoded = encode_records(&sample()).to_vec();
        // First record claims a 1000-byte name.
        encoded[..4].copy_from_slice(&1000u32.to_be_bytes());
        let err = decode(&encoded).unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_trailing_garbage() {
        let mut encoded = encode_records(&sample()).to_vec();
        encoded.extend_from_slice(&[0, 0]);
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn test_growth_and_trim() {
        let records: Vec<_> = (0..100u64)
            .map(|i| DirectoryEntryRecord::new(format!("/f{}", i), i, i % 3 != 0))
            .collect();
        let list = decode(&encode_records(&records)).unwrap();
        assert_eq!(list.len(), 100);
        assert_eq!(list.capacity(), 100);
        assert_eq!(list.into_vec(), records);
    }

    #[test]
    fn test_push_doubles_capacity() {
        let mut list = DirentList::new();
        assert!(list.capacity() >= INITIAL_CAPACITY);
        let start = list.capacity();
        for i in 0..=start {
            list.push(DirectoryEntryRecord::new("/x", i as u64, true));
        }
        assert!(list.capacity() >= 2 * start);
    }
}

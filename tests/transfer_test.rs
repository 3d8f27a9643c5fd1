//! End-to-end transfers: producer -> framed wire -> receiver -> decoder.

use proptest::prelude::*;
use sleuthxfer::source::ReaderSource;
use sleuthxfer::streaming::{
    encode_records, fetch_dirents, read_frame, receive_transfer, ByteRelayProducer,
    FramedChannel, Frame, RecordStreamProducer, RelayConfig, MAX_CHUNK_SIZE,
};
use sleuthxfer::walk::{EntryListWalk, ListedEntry};
use sleuthxfer::{decode, DirectoryEntryRecord, Outcome, TransferError};
use std::io;
use std::path::Path;

fn walk_over_wire(walk: EntryListWalk) -> (Outcome, Vec<u8>) {
    let mut channel = FramedChannel::new(Vec::new());
    let outcome = RecordStreamProducer::new(walk)
        .stream(&mut channel, Path::new("/"))
        .unwrap();
    (outcome, channel.into_inner())
}

// =============================================================================
// Record stream
// =============================================================================

#[test]
fn test_two_file_listing() {
    let (outcome, wire) = walk_over_wire(EntryListWalk::new(vec![
        ListedEntry::new("/", "a.txt", 5, true),
        ListedEntry::new("/", "b.txt", 9, false),
    ]));
    assert!(outcome.is_success());

    let list = fetch_dirents(&mut &wire[..]).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0], DirectoryEntryRecord::new("/a.txt", 5, true));
    assert_eq!(list[1], DirectoryEntryRecord::new("/b.txt", 9, false));
}

#[test]
fn test_one_chunk_per_record() {
    let (_, wire) = walk_over_wire(EntryListWalk::new(vec![
        ListedEntry::new("/", "a", 1, true),
        ListedEntry::new("/", ".", 2, true),
        ListedEntry::new("/", "b", 3, true),
    ]));

    let mut cursor = &wire[..];
    assert_eq!(read_frame(&mut cursor).unwrap(), Frame::Reply);
    let mut chunks = Vec::new();
    loop {
        match read_frame(&mut cursor).unwrap() {
            Frame::Chunk(data) => chunks.push(data),
            Frame::End(_) => break,
            other => panic!("unexpected frame {:?}", other),
        }
    }
    assert_eq!(chunks.len(), 2);
    for chunk in chunks {
        let list = decode(&chunk).unwrap();
        assert_eq!(list.len(), 1);
    }
}

#[test]
fn test_empty_walk_decodes_to_empty_list() {
    let (outcome, wire) = walk_over_wire(EntryListWalk::default());
    assert!(outcome.is_success());
    assert!(fetch_dirents(&mut &wire[..]).unwrap().is_empty());
}

#[test]
fn test_mid_walk_failure_is_unusable() {
    let (outcome, wire) = walk_over_wire(
        EntryListWalk::new(vec![
            ListedEntry::new("/", "a", 1, true),
            ListedEntry::new("/", "b", 2, true),
        ])
        .fail_after(1),
    );
    assert_eq!(outcome, Outcome::Cancelled);

    // One record physically crossed the wire, but the consumer gets nothing.
    assert!(wire.len() > 20);
    let err = fetch_dirents(&mut &wire[..]).unwrap_err();
    assert!(matches!(err, TransferError::Cancelled));
}

#[test]
fn test_truncated_buffer_is_corruption() {
    let records = vec![
        DirectoryEntryRecord::new("/a", 1, true),
        DirectoryEntryRecord::new("/bb", 2, false),
    ];
    let encoded = encode_records(&records);
    let err = decode(&encoded[..encoded.len() - 1]).unwrap_err();
    assert_eq!(err.index, 1);
}

// =============================================================================
// Byte relay
// =============================================================================

#[test]
fn test_relay_over_wire() {
    let data: Vec<u8> = (0..(3 * MAX_CHUNK_SIZE + 17)).map(|i| (i % 251) as u8).collect();
    let mut channel = FramedChannel::new(Vec::new());
    let outcome = ByteRelayProducer::new(RelayConfig::default())
        .relay(&mut channel, ReaderSource::new("image", &data[..]))
        .unwrap();
    assert!(outcome.is_success());

    let wire = channel.into_inner();
    assert_eq!(receive_transfer(&mut &wire[..]).unwrap(), data);
}

#[test]
fn test_zero_length_relay() {
    let mut channel = FramedChannel::new(Vec::new());
    let outcome = ByteRelayProducer::new(RelayConfig::default())
        .relay(&mut channel, ReaderSource::new("empty", io::empty()))
        .unwrap();

    match outcome {
        Outcome::Success(delivered) => assert_eq!(delivered.chunks, 0),
        Outcome::Cancelled => panic!("empty relay was cancelled"),
    }
    let wire = channel.into_inner();
    assert!(receive_transfer(&mut &wire[..]).unwrap().is_empty());
}

// =============================================================================
// Properties
// =============================================================================

fn record_strategy() -> impl Strategy<Value = DirectoryEntryRecord> {
    (
        proptest::collection::vec(any::<u8>(), 0..64),
        any::<u64>(),
        any::<bool>(),
    )
        .prop_map(|(name, inode, allocated)| DirectoryEntryRecord {
            name,
            inode,
            allocated,
        })
}

proptest! {
    #[test]
    fn prop_decode_inverts_encode(records in proptest::collection::vec(record_strategy(), 0..40)) {
        let encoded = encode_records(&records);
        let decoded = decode(&encoded).unwrap();
        prop_assert_eq!(decoded.into_vec(), records);
    }

    #[test]
    fn prop_any_truncation_fails(
        records in proptest::collection::vec(record_strategy(), 1..10),
        cut in 1usize..16,
    ) {
        let encoded = encode_records(&records);
        let keep = encoded.len().saturating_sub(cut);
        prop_assume!(keep < encoded.len());
        // Cutting inside the final record can never yield a partial list.
        let last_start = encoded.len() - records.last().unwrap().encoded_len();
        prop_assume!(keep > last_start);
        prop_assert!(decode(&encoded[..keep]).is_err());
    }

    #[test]
    fn prop_walk_listing_matches_entries(
        names in proptest::collection::vec("[a-z0-9._-]{1,12}", 0..30),
    ) {
        let entries: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| ListedEntry::new("/d/", n.as_bytes(), i as u64, i % 2 == 0))
            .collect();
        let expected: Vec<_> = entries
            .iter()
            .filter(|e| e.name != b"." && e.name != b"..")
            .map(|e| {
                let mut name = e.parent.clone();
                name.extend_from_slice(&e.name);
                DirectoryEntryRecord::new(name, e.inode, e.allocated)
            })
            .collect();

        let (outcome, wire) = walk_over_wire(EntryListWalk::new(entries));
        prop_assert!(outcome.is_success());
        let list = fetch_dirents(&mut &wire[..]).unwrap();
        prop_assert_eq!(list.into_vec(), expected);
    }
}

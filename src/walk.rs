//! Walk engines enumerating filesystem entries.
//!
//! The engine drives the walk and calls back once per entry with the
//! parent path, the entry name, its inode and its allocation state. The
//! engine may or may not report the `.` and `..` pseudo-entries; consumers
//! are expected to drop them.

use crate::error::{Result, TransferError};
use crate::streaming::protocol::DirectoryEntryRecord;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One entry reported by a walk engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkEntry<'a> {
    pub parent: &'a [u8],
    pub name: &'a [u8],
    pub inode: u64,
    pub allocated: bool,
}

impl WalkEntry<'_> {
    /// `.` or `..`
    pub fn is_dot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }

    /// Record with the parent path and name concatenated as-is.
    pub fn to_record(&self) -> DirectoryEntryRecord {
        let mut name = Vec::with_capacity(self.parent.len() + self.name.len());
        name.extend_from_slice(self.parent);
        name.extend_from_slice(self.name);
        DirectoryEntryRecord {
            name,
            inode: self.inode,
            allocated: self.allocated,
        }
    }
}

/// Visitor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalkError {
    #[error("walk aborted by visitor")]
    Aborted,
    #[error("{0}")]
    Failed(String),
}

pub type Visitor<'v> = dyn FnMut(&WalkEntry<'_>) -> WalkControl + 'v;

pub trait WalkEngine {
    /// Visit every entry in walk order. Stops and returns
    /// [`WalkError::Aborted`] as soon as the visitor asks to.
    fn walk(&mut self, visit: &mut Visitor<'_>) -> std::result::Result<(), WalkError>;
}

/// Opens a walk engine rooted at a path. Runs before the transfer commits.
pub trait WalkOpener {
    type Engine: WalkEngine;

    fn open(&self, root: &Path) -> Result<Self::Engine>;
}

// =============================================================================
// EntryListWalk
// =============================================================================

/// An owned entry for [`EntryListWalk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub parent: Vec<u8>,
    pub name: Vec<u8>,
    pub inode: u64,
    pub allocated: bool,
}

impl ListedEntry {
    pub fn new(
        parent: impl Into<Vec<u8>>,
        name: impl Into<Vec<u8>>,
        inode: u64,
        allocated: bool,
    ) -> Self {
        Self {
            parent: parent.into(),
            name: name.into(),
            inode,
            allocated,
        }
    }
}

/// Replays a fixed list of entries, optionally failing part way through.
#[derive(Debug, Clone, Default)]
pub struct EntryListWalk {
    entries: Vec<ListedEntry>,
    fail_after: Option<usize>,
}

impl EntryListWalk {
    pub fn new(entries: Vec<ListedEntry>) -> Self {
        Self {
            entries,
            fail_after: None,
        }
    }

    /// Fail the walk after `n` entries were visited.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl WalkEngine for EntryListWalk {
    fn walk(&mut self, visit: &mut Visitor<'_>) -> std::result::Result<(), WalkError> {
        for (i, entry) in self.entries.iter().enumerate() {
            if self.fail_after == Some(i) {
                return Err(WalkError::Failed(format!("injected failure at entry {}", i)));
            }
            let entry = WalkEntry {
                parent: &entry.parent,
                name: &entry.name,
                inode: entry.inode,
                allocated: entry.allocated,
            };
            if visit(&entry) == WalkControl::Abort {
                return Err(WalkError::Aborted);
            }
        }
        match self.fail_after {
            Some(n) if n >= self.entries.len() => {
                Err(WalkError::Failed(format!("injected failure at entry {}", n)))
            }
            _ => Ok(()),
        }
    }
}

impl WalkOpener for EntryListWalk {
    type Engine = EntryListWalk;

    fn open(&self, _root: &Path) -> Result<EntryListWalk> {
        Ok(self.clone())
    }
}

// =============================================================================
// HostDirWalk
// =============================================================================

/// Opens [`HostDirWalk`]s over directories visible to this process, e.g. a
/// mounted disk image.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDirOpener;

impl WalkOpener for HostDirOpener {
    type Engine = HostDirWalk;

    fn open(&self, root: &Path) -> Result<HostDirWalk> {
        let meta = std::fs::metadata(root)
            .map_err(|e| TransferError::setup(format!("open {}", root.display()), e))?;
        if !meta.is_dir() {
            return Err(TransferError::setup(
                format!("open {}", root.display()),
                "not a directory",
            ));
        }
        Ok(HostDirWalk {
            root: root.to_path_buf(),
        })
    }
}

/// Recursive walk of a host directory. Hidden files are included, ignore
/// files are not honoured and symlinks are not followed. Every entry is
/// reported allocated; parents are `/`-rooted relative to the walk root and
/// end in `/`.
#[derive(Debug, Clone)]
pub struct HostDirWalk {
    root: PathBuf,
}

impl WalkEngine for HostDirWalk {
    fn walk(&mut self, visit: &mut Visitor<'_>) -> std::result::Result<(), WalkError> {
        let walker = ignore::WalkBuilder::new(&self.root)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for result in walker {
            let entry = result.map_err(|e| WalkError::Failed(e.to_string()))?;
            if entry.depth() == 0 {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| WalkError::Failed(e.to_string()))?;
            let mut parent = vec![b'/'];
            if let Some(dir) = relative.parent() {
                if !dir.as_os_str().is_empty() {
                    parent.extend_from_slice(&path_bytes(dir));
                    parent.push(b'/');
                }
            }
            let name = path_bytes(Path::new(entry.file_name()));

            let entry = WalkEntry {
                parent: &parent,
                name: &name,
                inode: entry_inode(&entry),
                allocated: true,
            };
            if visit(&entry) == WalkControl::Abort {
                return Err(WalkError::Aborted);
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().replace('\\', "/").into_bytes()
}

#[cfg(unix)]
fn entry_inode(entry: &ignore::DirEntry) -> u64 {
    entry.ino().unwrap_or(0)
}

#[cfg(not(unix))]
fn entry_inode(_entry: &ignore::DirEntry) -> u64 {
    0
}

//! Inode to name lookup through the external `ffind` tool.

use crate::config::Tools;
use crate::error::{Result, TransferError};
use crate::source::check_inode;
use crate::streaming::protocol::DirectoryEntryRecord;
use std::process::Command;

const NOT_FOUND_PREFIX: &[u8] = b"File name not found for inode";

/// Resolve `inode` on `device` to its name and allocation state.
pub fn find_inode(
    tools: &Tools,
    device: &str,
    inode: i64,
    verbose: bool,
) -> Result<DirectoryEntryRecord> {
    check_inode(inode)?;

    let inode_arg = inode.to_string();
    if verbose {
        tracing::info!("{} {} {}", tools.ffind, device, inode_arg);
    }
    let output = Command::new(&tools.ffind)
        .arg(device)
        .arg(&inode_arg)
        .output()
        .map_err(|e| TransferError::setup(&tools.ffind, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TransferError::setup(&tools.ffind, stderr.trim_end()));
    }

    parse_find_inode(&output.stdout, inode)
}

/// Parse the output of `ffind <device> <inode>`.
///
/// Only the first line is considered: an inode with several hard links
/// resolves to the first name `ffind` prints and the other names are
/// dropped. A `* ` prefix marks an unallocated name; a leading `//` is
/// collapsed to `/`.
pub fn parse_find_inode(output: &[u8], inode: i64) -> Result<DirectoryEntryRecord> {
    check_inode(inode)?;

    let line = output.split(|&b| b == b'\n').next().unwrap_or_default();

    if line.starts_with(NOT_FOUND_PREFIX) {
        return Err(TransferError::NotFound(format!("{} Inode not in use", inode)));
    }

    let (name, allocated) = if let Some(rest) = line.strip_prefix(b"* ") {
        (rest, false)
    } else if line.starts_with(b"//") {
        (&line[1..], true)
    } else {
        (line, true)
    };

    if name.is_empty() {
        return Err(TransferError::NotFound(format!(
            "no name reported for inode {}",
            inode
        )));
    }

    Ok(DirectoryEntryRecord {
        name: name.to_vec(),
        inode: inode as u64,
        allocated,
    })
}

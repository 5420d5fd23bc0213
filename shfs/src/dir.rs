//! Fixed-size directory entries packed back to back inside a directory's data
//! blocks. A slot whose inode number is 0 is free and may be reused.

use crate::consts::*;
use crate::error::{Corruption, FsError, Result};
use crate::node::FileType;

use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes)]
struct DiskDirEntry {
    inode: U32<LittleEndian>,
    /// Record length, always DIR_ENTRY_SIZE for a live entry.
    size: U32<LittleEndian>,
    /// Mode value of the child inode.
    kind: U32<LittleEndian>,
    len: U32<LittleEndian>,
    name: [u8; DIR_NAME_LEN],
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub kind: FileType,
    name: [u8; DIR_NAME_LEN],
    len: usize,
}

impl DirEntry {
    /// Builds a live entry. Names must be 1 to MAX_NAME_LEN bytes and may not
    /// contain `/` or NUL.
    pub fn new(inode: u32, name: &[u8], kind: FileType) -> Result<Self> {
        validate_name(name)?;
        let mut buf = [0; DIR_NAME_LEN];
        buf[..name.len()].copy_from_slice(name);
        Ok(Self {
            inode,
            kind,
            name: buf,
            len: name.len(),
        })
    }

    pub fn free() -> Self {
        Self {
            inode: 0,
            kind: FileType::Regular,
            name: [0; DIR_NAME_LEN],
            len: 0,
        }
    }

    pub fn is_free(&self) -> bool {
        self.inode == 0
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.len]
    }

    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name())
    }

    fn matches(&self, name: &[u8]) -> bool {
        !self.is_free() && self.name() == name
    }
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_free() {
            return f.write_str("DirEntry(free)");
        }
        f.debug_struct("DirEntry")
            .field("inode", &self.inode)
            .field("kind", &self.kind)
            .field("name", &self.name_lossy())
            .finish()
    }
}

pub fn validate_name(name: &[u8]) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FsError::InvalidName(format!(
            "{:?} must be 1 to {} bytes",
            String::from_utf8_lossy(name),
            MAX_NAME_LEN
        )));
    }
    if name == b"." || name == b".." || name.iter().any(|&b| b == b'/' || b == 0) {
        return Err(FsError::InvalidName(format!(
            "{:?} contains a reserved byte",
            String::from_utf8_lossy(name)
        )));
    }
    Ok(())
}

/// Lazily decodes the slots of a directory block. It only borrows the block, so
/// a clone taken up front can walk the same slots again.
#[derive(Clone)]
pub struct DirEntries<'a> {
    buf: &'a [u8],
    slot: usize,
}

impl<'a> Iterator for DirEntries<'a> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.slot * DIR_ENTRY_SIZE;
        let raw = self.buf.get(start..start + DIR_ENTRY_SIZE)?;
        let slot = self.slot;
        self.slot += 1;
        Some(decode_slot(slot, raw))
    }
}

pub fn decode_entries(block: &[u8]) -> DirEntries<'_> {
    DirEntries {
        buf: block,
        slot: 0,
    }
}

fn decode_slot(slot: usize, raw: &[u8]) -> Result<DirEntry> {
    let disk = DiskDirEntry::read_from_prefix(raw).ok_or(Corruption::BadDirEntry { slot })?;
    let inode = disk.inode.get();
    if inode == 0 {
        return Ok(DirEntry::free());
    }

    let len = disk.len.get() as usize;
    if len == 0 || len > MAX_NAME_LEN || disk.name[..len].contains(&0) {
        return Err(Corruption::BadDirEntry { slot }.into());
    }
    let mode = disk.kind.get();
    let kind = u16::try_from(mode)
        .ok()
        .and_then(FileType::from_mode)
        .ok_or(Corruption::BadDirEntry { slot })?;

    let mut name = [0; DIR_NAME_LEN];
    name[..len].copy_from_slice(&disk.name[..len]);
    Ok(DirEntry {
        inode,
        kind,
        name,
        len,
    })
}

pub fn encode_entry(entry: &DirEntry) -> [u8; DIR_ENTRY_SIZE] {
    let mut out = [0; DIR_ENTRY_SIZE];
    if entry.is_free() {
        return out;
    }
    let disk = DiskDirEntry {
        inode: U32::new(entry.inode),
        size: U32::new(DIR_ENTRY_SIZE as u32),
        kind: U32::new(entry.kind.mode() as u32),
        len: U32::new(entry.len as u32),
        name: entry.name,
    };
    out.copy_from_slice(disk.as_bytes());
    out
}

/// Index of the directory block and the byte offset within it for `slot`.
pub fn slot_position(slot: usize) -> (usize, usize) {
    (slot / ENTRIES_PER_BLOCK, (slot % ENTRIES_PER_BLOCK) * DIR_ENTRY_SIZE)
}

/// Exact, case-sensitive match in on-disk order; the first live match wins.
pub fn find(entries: &[DirEntry], name: &[u8]) -> Option<u32> {
    entries.iter().find(|e| e.matches(name)).map(|e| e.inode)
}

/// Places `entry` in the first free slot, or appends it when none is free and
/// the directory holds fewer than `capacity` slots. Returns the slot used.
pub fn insert(entries: &mut Vec<DirEntry>, entry: DirEntry, capacity: usize) -> Result<usize> {
    debug_assert!(!entry.is_free());
    if find(entries, entry.name()).is_some() {
        return Err(FsError::DuplicateName);
    }
    if let Some(slot) = entries.iter().position(DirEntry::is_free) {
        entries[slot] = entry;
        return Ok(slot);
    }
    if entries.len() >= capacity {
        return Err(FsError::NoFreeSlot);
    }
    entries.push(entry);
    Ok(entries.len() - 1)
}

/// Frees the slot holding `name` and returns what it held along with the
/// slot index. The slot stays in place so later slots keep their positions.
pub fn remove(entries: &mut [DirEntry], name: &[u8]) -> Result<(usize, DirEntry)> {
    let slot = entries
        .iter()
        .position(|e| e.matches(name))
        .ok_or(FsError::NotFound)?;
    let removed = std::mem::replace(&mut entries[slot], DirEntry::free());
    Ok((slot, removed))
}

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::alloc::{Allocator, Bitmap};
use crate::cache::InodeCache;
use crate::consts::*;
use crate::dir::{self, DirEntry};
use crate::error::{Corruption, FsError, Result};
use crate::io::BlockStorage;
use crate::mkfs::{self, block_universe};
use crate::node::{FileType, InodeRecord, InodeTable};
use crate::sb::{Layout, SuperBlock};

/// Metadata for a new inode handed to [`Shfs::create`].
#[derive(Debug, Clone, Copy)]
pub struct Attributes {
    pub kind: FileType,
    pub perm: u16,
    pub uid: u16,
    pub gid: u16,
    pub time: u32,
}

impl Attributes {
    pub fn file(perm: u16) -> Self {
        Self::with_kind(FileType::Regular, perm)
    }

    pub fn dir(perm: u16) -> Self {
        Self::with_kind(FileType::Directory, perm)
    }

    pub fn owner(mut self, uid: u16, gid: u16) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    fn with_kind(kind: FileType, perm: u16) -> Self {
        Self {
            kind,
            perm,
            uid: 0,
            gid: 0,
            time: now(),
        }
    }

    fn into_record(self) -> InodeRecord {
        InodeRecord {
            uid: self.uid,
            gid: self.gid,
            time: self.time,
            ..InodeRecord::new(self.kind, self.perm)
        }
    }
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Everything a mounted volume mutates. Only ever touched through the mutex in
/// [`Shfs`], so each read-modify-write of a shared block runs to completion
/// before the next one starts.
struct Volume<T: BlockStorage> {
    dev: T,
    sb: SuperBlock,
    table: InodeTable,
    block_map: Allocator,
    inode_map: Allocator,
    cache: InodeCache,
}

impl<T: BlockStorage> Volume<T> {
    fn load_inode(&mut self, ino: u32) -> Result<InodeRecord> {
        if let Some(node) = self.cache.get(ino) {
            return Ok(node);
        }
        let node = self.table.read(&mut self.dev, ino)?;
        self.cache.insert(ino, node);
        Ok(node)
    }

    fn store_inode(&mut self, ino: u32, node: &InodeRecord) -> Result<()> {
        self.cache.invalidate(ino);
        self.table.write(&mut self.dev, ino, node)
    }

    fn alloc_inode(&mut self) -> Result<u32> {
        let ino = self.inode_map.allocate()? as u32;
        if let Err(e) = self.persist_inode_map() {
            self.inode_map.free(ino as usize);
            return Err(e);
        }
        debug!("allocated inode {}", ino);
        Ok(ino)
    }

    fn release_inode(&mut self, ino: u32) -> Result<()> {
        self.cache.invalidate(ino);
        self.inode_map.free(ino as usize);
        debug!("freed inode {}", ino);
        self.persist_inode_map()
    }

    /// Allocates a data block and zeroes it on disk.
    fn alloc_block(&mut self) -> Result<u32> {
        let blocknr = self.block_map.allocate()?;
        let outcome = self
            .persist_block_map()
            .and_then(|_| Ok(self.dev.write_block(blocknr, &[0; BLOCK_SIZE])?));
        if let Err(e) = outcome {
            self.block_map.free(blocknr);
            return Err(e);
        }
        debug!("allocated block {}", blocknr);
        Ok(blocknr as u32)
    }

    /// Every mapped data block of `node`, or the first bad pointer.
    fn data_blocks(&self, ino: u32, node: &InodeRecord) -> Result<Vec<usize>> {
        node.mapped_blocks()
            .map(|blocknr| self.check_data_block(ino, blocknr))
            .collect()
    }

    /// Nothing is freed unless every pointer of `node` is valid.
    fn release_blocks(&mut self, ino: u32, node: &mut InodeRecord) -> Result<()> {
        for blocknr in self.data_blocks(ino, node)? {
            self.block_map.free(blocknr);
            debug!("freed block {} of inode {}", blocknr, ino);
        }
        node.blocks = [0; DIRECT_BLOCKS];
        self.persist_block_map()
    }

    fn persist_block_map(&mut self) -> Result<()> {
        let blocknr = self.sb.block_bitmap as usize;
        self.dev.write_block(blocknr, self.block_map.bitmap().serialize())?;
        Ok(())
    }

    fn persist_inode_map(&mut self) -> Result<()> {
        let blocknr = self.sb.inode_bitmap as usize;
        self.dev.write_block(blocknr, self.inode_map.bitmap().serialize())?;
        Ok(())
    }

    /// A data block pointer read from an inode must lie in the data region.
    fn check_data_block(&self, ino: u32, blocknr: u32) -> Result<usize> {
        let blocknr = blocknr as usize;
        if blocknr < self.sb.layout().metadata_blocks() || blocknr >= self.block_map.universe() {
            return Err(Corruption::BadLayout(format!(
                "inode {} points at block {} outside the data region",
                ino, blocknr
            ))
            .into());
        }
        Ok(blocknr)
    }

    /// Every slot of a directory, free ones included, in on-disk order.
    fn dir_slots(&mut self, ino: u32, node: &InodeRecord) -> Result<Vec<DirEntry>> {
        if !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let slots = node.size as usize / DIR_ENTRY_SIZE;
        let mut entries = Vec::with_capacity(slots);
        let mut buf = vec![0; BLOCK_SIZE];
        let mut remaining = slots;
        for (i, &blocknr) in node.blocks.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            if blocknr == 0 {
                return Err(Corruption::BadDirEntry {
                    slot: i * ENTRIES_PER_BLOCK,
                }
                .into());
            }
            let blocknr = self.check_data_block(ino, blocknr)?;
            self.dev.read_block(blocknr, &mut buf)?;
            let in_block = remaining.min(ENTRIES_PER_BLOCK);
            for entry in dir::decode_entries(&buf[..in_block * DIR_ENTRY_SIZE]) {
                entries.push(entry?);
            }
            remaining -= in_block;
        }
        Ok(entries)
    }

    /// Writes one directory slot, mapping a fresh block and growing the
    /// directory when the slot lies past its current end.
    fn write_dir_slot(
        &mut self,
        ino: u32,
        node: &mut InodeRecord,
        slot: usize,
        entry: &DirEntry,
    ) -> Result<()> {
        let (index, offset) = dir::slot_position(slot);
        let mut grown = false;
        if node.blocks[index] == 0 {
            node.blocks[index] = self.alloc_block()?;
            grown = true;
        }
        let blocknr = self.check_data_block(ino, node.blocks[index])?;

        let mut buf = vec![0; BLOCK_SIZE];
        let outcome = self
            .dev
            .read_block(blocknr, &mut buf)
            .and_then(|_| {
                buf[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&dir::encode_entry(entry));
                self.dev.write_block(blocknr, &buf)
            });
        if let Err(e) = outcome {
            if grown {
                self.block_map.free(node.blocks[index] as usize);
                node.blocks[index] = 0;
                self.persist_block_map()?;
            }
            return Err(e.into());
        }

        let end = ((slot + 1) * DIR_ENTRY_SIZE) as u32;
        if grown || end > node.size {
            node.size = node.size.max(end);
            self.store_inode(ino, node)?;
        }
        Ok(())
    }

    /// Copies `data` into already mapped blocks starting at byte `offset`.
    fn write_data(&mut self, ino: u32, node: &InodeRecord, offset: usize, data: &[u8]) -> Result<()> {
        let mut buf = vec![0; BLOCK_SIZE];
        let mut pos = offset;
        let mut src = data;
        while !src.is_empty() {
            let within = pos % BLOCK_SIZE;
            let chunk = src.len().min(BLOCK_SIZE - within);
            let blocknr = self.check_data_block(ino, node.blocks[pos / BLOCK_SIZE])?;
            if chunk < BLOCK_SIZE {
                self.dev.read_block(blocknr, &mut buf)?;
            }
            buf[within..within + chunk].copy_from_slice(&src[..chunk]);
            self.dev.write_block(blocknr, &buf)?;
            pos += chunk;
            src = &src[chunk..];
        }
        Ok(())
    }
}

/// A mounted shfs volume.
///
/// The superblock is read once at mount and never changes, so it sits outside
/// the lock. All other state lives behind one mutex: every bitmap, inode table
/// and directory update is serialized through it.
pub struct Shfs<T: BlockStorage> {
    super_block: SuperBlock,
    volume: Mutex<Volume<T>>,
}

impl<T: BlockStorage> Shfs<T> {
    /// Formats `dev` with the default layout and mounts the result.
    pub fn format_and_mount(mut dev: T) -> Result<Self> {
        mkfs::format(&mut dev, Layout::default())?;
        Self::mount(dev)
    }

    /// Loads and validates the superblock, both bitmaps and the root inode.
    /// Any corruption found here aborts the mount.
    pub fn mount(mut dev: T) -> Result<Self> {
        let super_block = SuperBlock::load(&mut dev).map_err(|e| {
            warn!("rejecting volume: {}", e);
            e
        })?;
        let layout = super_block.layout();
        let mut buf = vec![0; BLOCK_SIZE];

        dev.read_block(layout.block_bitmap as usize, &mut buf)?;
        let block_map = Allocator::open(
            Bitmap::parse(&buf),
            block_universe(dev.block_count()),
            layout.metadata_blocks(),
        )?;

        dev.read_block(layout.inode_bitmap as usize, &mut buf)?;
        let inode_map = Allocator::open(Bitmap::parse(&buf), INODES_COUNT, RESERVED_INODES)?;

        let table = InodeTable::new(layout.inode_table);
        let root = table.read(&mut dev, ROOT_INO)?;
        if !root.is_dir() {
            warn!("rejecting volume: root inode is not a directory");
            return Err(Corruption::BadLayout("root inode is not a directory".into()).into());
        }
        let mut cache = InodeCache::new();
        cache.insert(ROOT_INO, root);

        info!(
            "mounted shfs volume: {} blocks, {} free blocks, {} free inodes",
            dev.block_count(),
            block_map.free_count(),
            inode_map.free_count()
        );
        Ok(Self {
            super_block,
            volume: Mutex::new(Volume {
                dev,
                sb: super_block,
                table,
                block_map,
                inode_map,
                cache,
            }),
        })
    }

    fn volume(&self) -> MutexGuard<'_, Volume<T>> {
        self.volume.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> u32 {
        ROOT_INO
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.super_block
    }

    pub fn free_blocks(&self) -> usize {
        self.volume().block_map.free_count()
    }

    pub fn free_inodes(&self) -> usize {
        self.volume().inode_map.free_count()
    }

    pub fn inode(&self, ino: u32) -> Result<InodeRecord> {
        self.volume().load_inode(ino)
    }

    /// Looks up a single name inside directory `dir`.
    pub fn lookup(&self, dir: u32, name: &str) -> Result<u32> {
        let mut vol = self.volume();
        let node = vol.load_inode(dir)?;
        let entries = vol.dir_slots(dir, &node)?;
        dir::find(&entries, name.as_bytes()).ok_or(FsError::NotFound)
    }

    /// Walks an absolute path from the root and returns the inode it names.
    ///
    /// Empty components and `.` are skipped and `..` steps back to the parent
    /// directory along the walked path (the root is its own parent). A
    /// trailing `/`, `.` or `..` after a regular file is `NotADirectory`.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidPath(format!("{:?} is not absolute", path)));
        }
        let mut vol = self.volume();
        let mut walked = vec![ROOT_INO];
        for part in path.split('/') {
            let current = *walked.last().unwrap_or(&ROOT_INO);
            match part {
                "" => continue,
                "." | ".." => {
                    if !vol.load_inode(current)?.is_dir() {
                        return Err(FsError::NotADirectory);
                    }
                    if part == ".." && walked.len() > 1 {
                        walked.pop();
                    }
                    continue;
                }
                _ => (),
            }

            let node = vol.load_inode(current)?;
            if !node.is_dir() {
                trace!("resolve {}: inode {} is not a directory", path, current);
                return Err(FsError::NotADirectory);
            }
            let entries = vol.dir_slots(current, &node)?;
            let next = dir::find(&entries, part.as_bytes()).ok_or_else(|| {
                trace!("resolve {}: no {:?} in inode {}", path, part, current);
                FsError::NotFound
            })?;
            trace!("resolve {}: {:?} -> inode {}", path, part, next);
            walked.push(next);
        }

        let target = *walked.last().unwrap_or(&ROOT_INO);
        // A trailing slash names a directory.
        if path.ends_with('/') && !vol.load_inode(target)?.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(target)
    }

    /// Live entries of directory `dir` in on-disk order.
    pub fn read_dir(&self, dir: u32) -> Result<Vec<DirEntry>> {
        let mut vol = self.volume();
        let node = vol.load_inode(dir)?;
        let mut entries = vol.dir_slots(dir, &node)?;
        entries.retain(|e| !e.is_free());
        Ok(entries)
    }

    /// Allocates an inode described by `attrs` and links it into `parent`
    /// under `name`. Nothing stays allocated when linking fails.
    pub fn create(&self, parent: u32, name: &str, attrs: Attributes) -> Result<u32> {
        dir::validate_name(name.as_bytes())?;
        let mut vol = self.volume();
        let mut parent_node = vol.load_inode(parent)?;
        let mut entries = vol.dir_slots(parent, &parent_node)?;
        if dir::find(&entries, name.as_bytes()).is_some() {
            return Err(FsError::DuplicateName);
        }

        let ino = vol.alloc_inode()?;
        let linked = vol
            .store_inode(ino, &attrs.into_record())
            .and_then(|_| DirEntry::new(ino, name.as_bytes(), attrs.kind))
            .and_then(|entry| {
                let slot = dir::insert(&mut entries, entry, MAX_DIR_ENTRIES)?;
                vol.write_dir_slot(parent, &mut parent_node, slot, &entry)
            });
        if let Err(e) = linked {
            vol.release_inode(ino)?;
            return Err(e);
        }
        info!("created {:?} {:?} as inode {} in {}", attrs.kind, name, ino, parent);
        Ok(ino)
    }

    /// Removes `name` from `parent` and frees its inode and data blocks.
    /// Directories must be empty first.
    pub fn unlink(&self, parent: u32, name: &str) -> Result<()> {
        let mut vol = self.volume();
        let mut parent_node = vol.load_inode(parent)?;
        let mut entries = vol.dir_slots(parent, &parent_node)?;
        let ino = dir::find(&entries, name.as_bytes()).ok_or(FsError::NotFound)?;
        if (ino as usize) < RESERVED_INODES {
            return Err(Corruption::InodeOutOfRange(ino).into());
        }

        let mut node = vol.load_inode(ino)?;
        if node.is_dir() && vol.dir_slots(ino, &node)?.iter().any(|e| !e.is_free()) {
            return Err(FsError::DirectoryNotEmpty);
        }
        vol.data_blocks(ino, &node)?;

        let (slot, _) = dir::remove(&mut entries, name.as_bytes())?;
        vol.write_dir_slot(parent, &mut parent_node, slot, &DirEntry::free())?;
        vol.release_blocks(ino, &mut node)?;
        vol.release_inode(ino)?;
        info!("removed {:?} (inode {}) from {}", name, ino, parent);
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    pub fn read(&self, ino: u32, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let mut vol = self.volume();
        let node = vol.load_inode(ino)?;
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let size = node.size as usize;
        if offset >= size {
            return Ok(0);
        }
        let total = buf.len().min(size - offset);

        let mut block = vec![0; BLOCK_SIZE];
        let mut done = 0;
        while done < total {
            let pos = offset + done;
            let within = pos % BLOCK_SIZE;
            let chunk = (total - done).min(BLOCK_SIZE - within);
            match node.blocks[pos / BLOCK_SIZE] {
                // Holes read back as zeroes.
                0 => block.iter_mut().for_each(|b| *b = 0),
                blocknr => {
                    let blocknr = vol.check_data_block(ino, blocknr)?;
                    vol.dev.read_block(blocknr, &mut block)?;
                }
            }
            buf[done..done + chunk].copy_from_slice(&block[within..within + chunk]);
            done += chunk;
        }
        Ok(total)
    }

    /// Writes `data` at `offset`, mapping direct blocks as needed and growing
    /// the file. Fails with `FileTooLarge` past the last direct block.
    pub fn write(&self, ino: u32, offset: usize, data: &[u8]) -> Result<usize> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(FsError::FileTooLarge)?;
        let mut vol = self.volume();
        let mut node = vol.load_inode(ino)?;
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let mut mapped = Vec::new();
        for index in offset / BLOCK_SIZE..=(end - 1) / BLOCK_SIZE {
            if node.blocks[index] != 0 {
                continue;
            }
            match vol.alloc_block() {
                Ok(blocknr) => {
                    node.blocks[index] = blocknr;
                    mapped.push(index);
                }
                Err(e) => {
                    for index in mapped {
                        vol.block_map.free(node.blocks[index] as usize);
                    }
                    vol.persist_block_map()?;
                    return Err(e);
                }
            }
        }

        let outcome = vol.write_data(ino, &node, offset, data);
        if outcome.is_ok() {
            node.size = node.size.max(end as u32);
            node.time = now();
        }
        vol.store_inode(ino, &node)?;
        outcome.map(|_| data.len())
    }

    /// Drops every data block of a regular file and resets its size.
    pub fn truncate(&self, ino: u32) -> Result<()> {
        let mut vol = self.volume();
        let mut node = vol.load_inode(ino)?;
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        vol.release_blocks(ino, &mut node)?;
        node.size = 0;
        vol.store_inode(ino, &node)
    }

    pub fn sync(&self) -> Result<()> {
        self.volume().dev.sync_disk()?;
        Ok(())
    }

    /// Unmounts and hands the device back.
    pub fn into_device(self) -> T {
        let vol = self
            .volume
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let (hits, misses) = vol.cache.stats();
        trace!("unmounting: inode cache {} hits, {} misses", hits, misses);
        vol.dev
    }

    #[cfg(test)]
    fn cached(&self, ino: u32) -> bool {
        self.volume().cache.contains(ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    fn create_test_device() -> FileBlockEmulator {
        let dev = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(dev)
            .with_block_count(64)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    #[test]
    fn root_dir_resolves_to_root_inode() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        assert_eq!(fs.resolve("/").unwrap(), ROOT_INO);
        assert_eq!(fs.resolve("//./").unwrap(), ROOT_INO);
        assert!(fs.read_dir(ROOT_INO).unwrap().is_empty());
    }

    #[test]
    fn relative_paths_are_rejected() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        match fs.resolve("foo") {
            Err(FsError::InvalidPath(_)) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn file_not_found_returns_error() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        match fs.resolve("/foo") {
            Err(FsError::NotFound) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn created_inodes_are_allocated_lowest_first() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        let a = fs.create(ROOT_INO, "a", Attributes::file(0o644)).unwrap();
        let b = fs.create(ROOT_INO, "b", Attributes::dir(0o755)).unwrap();
        assert_eq!((a, b), (2, 3));

        let root = fs.inode(ROOT_INO).unwrap();
        assert_eq!(root.size as usize, 2 * DIR_ENTRY_SIZE);
        assert_eq!(root.blocks[0] as usize, 4);
    }

    #[test]
    fn writing_an_inode_invalidates_its_cache_entry() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        let ino = fs.create(ROOT_INO, "f", Attributes::file(0o644)).unwrap();
        fs.inode(ino).unwrap();
        assert!(fs.cached(ino));

        fs.write(ino, 0, b"hello").unwrap();
        assert!(!fs.cached(ino));
        assert_eq!(fs.inode(ino).unwrap().size, 5);
        assert!(fs.cached(ino));
    }

    #[test]
    fn write_offset_overflow_is_too_large() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        let ino = fs.create(ROOT_INO, "f", Attributes::file(0o644)).unwrap();
        assert!(matches!(
            fs.write(ino, usize::MAX, b"x"),
            Err(FsError::FileTooLarge)
        ));
        assert!(matches!(
            fs.write(ino, MAX_FILE_SIZE - 1, b"xy"),
            Err(FsError::FileTooLarge)
        ));
        assert_eq!(fs.inode(ino).unwrap().size, 0);
    }

    #[test]
    fn trailing_slash_requires_a_directory() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        let dir = fs.create(ROOT_INO, "d", Attributes::dir(0o755)).unwrap();
        fs.create(ROOT_INO, "f", Attributes::file(0o644)).unwrap();

        assert_eq!(fs.resolve("/d/").unwrap(), dir);
        assert!(matches!(fs.resolve("/f/"), Err(FsError::NotADirectory)));
        assert!(matches!(fs.resolve("/f/."), Err(FsError::NotADirectory)));
    }

    #[test]
    fn failed_create_leaves_no_inode_behind() {
        let fs = Shfs::format_and_mount(create_test_device()).unwrap();
        let free = fs.free_inodes();
        let file = fs.create(ROOT_INO, "plain", Attributes::file(0o644)).unwrap();

        assert!(matches!(
            fs.create(file, "child", Attributes::file(0o644)),
            Err(FsError::NotADirectory)
        ));
        assert!(matches!(
            fs.create(ROOT_INO, "plain", Attributes::file(0o644)),
            Err(FsError::DuplicateName)
        ));
        assert!(matches!(
            fs.create(ROOT_INO, "much_too_long_name", Attributes::file(0o644)),
            Err(FsError::InvalidName(_))
        ));
        assert_eq!(fs.free_inodes(), free - 1);
    }
}

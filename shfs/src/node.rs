use crate::consts::*;
use crate::error::{Corruption, Result};
use crate::io::BlockStorage;

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Format version 1 inode record, exactly INODE_SIZE bytes, little endian.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes)]
struct DiskInode {
    uid: U16<LittleEndian>,
    gid: U16<LittleEndian>,
    /// File type, S_IFDIR or S_IFREG.
    mode: U16<LittleEndian>,
    size: U16<LittleEndian>,
    perm: U16<LittleEndian>,
    reserved: U16<LittleEndian>,
    time: U32<LittleEndian>,
    blocks: [U32<LittleEndian>; DIRECT_BLOCKS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

impl FileType {
    pub fn mode(self) -> u16 {
        match self {
            FileType::Regular => S_IFREG,
            FileType::Directory => S_IFDIR,
        }
    }

    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode {
            S_IFREG => Some(FileType::Regular),
            S_IFDIR => Some(FileType::Directory),
            _ => None,
        }
    }
}

/// In-memory copy of one inode. Owned by whoever read it; changes only reach
/// the disk through [`InodeTable::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRecord {
    /// The id of the owning user.
    pub uid: u16,
    /// The id of the owning group.
    pub gid: u16,
    pub kind: FileType,
    /// Permission bits. Stored, never enforced.
    pub perm: u16,
    /// The total size of the file in bytes.
    pub size: u32,
    /// Creation/modification time in seconds since epoch.
    pub time: u32,
    /// Direct data block pointers, 0 when unmapped.
    pub blocks: [u32; DIRECT_BLOCKS],
}

impl InodeRecord {
    pub fn new(kind: FileType, perm: u16) -> Self {
        Self {
            uid: 0,
            gid: 0,
            kind,
            perm,
            size: 0,
            time: 0,
            blocks: [0; DIRECT_BLOCKS],
        }
    }

    pub fn root() -> Self {
        Self::new(FileType::Directory, ROOT_DEFAULT_PERM)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    /// Data blocks currently mapped, in file order.
    pub fn mapped_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks.iter().copied().filter(|&b| b != 0)
    }

    /// Decodes a record. `ino` is only used to describe corruption.
    pub fn decode(ino: u32, bytes: &[u8]) -> Result<Self> {
        let disk = DiskInode::read_from_prefix(bytes).ok_or(Corruption::InodeOutOfRange(ino))?;
        let mode = disk.mode.get();
        let kind = FileType::from_mode(mode).ok_or(Corruption::InvalidInodeType { ino, mode })?;
        let size = disk.size.get() as u32;
        if size as usize > MAX_FILE_SIZE {
            return Err(Corruption::BadInodeSize { ino, size }.into());
        }

        let mut blocks = [0; DIRECT_BLOCKS];
        for (dst, src) in blocks.iter_mut().zip(disk.blocks.iter()) {
            *dst = src.get();
        }
        Ok(Self {
            uid: disk.uid.get(),
            gid: disk.gid.get(),
            kind,
            perm: disk.perm.get(),
            size,
            time: disk.time.get(),
            blocks,
        })
    }

    pub fn encode(&self) -> [u8; INODE_SIZE] {
        debug_assert!(self.size as usize <= MAX_FILE_SIZE);
        let mut blocks = [U32::new(0); DIRECT_BLOCKS];
        for (dst, &src) in blocks.iter_mut().zip(self.blocks.iter()) {
            *dst = U32::new(src);
        }
        let disk = DiskInode {
            uid: U16::new(self.uid),
            gid: U16::new(self.gid),
            mode: U16::new(self.kind.mode()),
            size: U16::new(self.size as u16),
            perm: U16::new(self.perm),
            reserved: U16::new(0),
            time: U32::new(self.time),
            blocks,
        };
        let mut out = [0; INODE_SIZE];
        out.copy_from_slice(disk.as_bytes());
        out
    }
}

/// Maps inode numbers onto the fixed array of records starting at `base`.
#[derive(Debug, Clone, Copy)]
pub struct InodeTable {
    base: u32,
}

impl InodeTable {
    pub fn new(base: u32) -> Self {
        Self { base }
    }

    /// Returns the (block, byte offset) holding inode `ino`. Inode 0 is never
    /// materialized.
    pub fn locate(&self, ino: u32) -> Result<(usize, usize)> {
        if ino == RESERVED_INO || ino as usize >= INODES_COUNT {
            return Err(Corruption::InodeOutOfRange(ino).into());
        }
        let byte = ino as usize * INODE_SIZE;
        Ok((self.base as usize + byte / BLOCK_SIZE, byte % BLOCK_SIZE))
    }

    /// Decodes inode `ino` out of the table block that contains it.
    pub fn read_from_block(&self, block: &[u8], ino: u32) -> Result<InodeRecord> {
        let (_, offset) = self.locate(ino)?;
        InodeRecord::decode(ino, &block[offset..offset + INODE_SIZE])
    }

    /// Encodes `record` into its slot of an already loaded table block, leaving
    /// the sibling records untouched.
    pub fn write_into_block(&self, block: &mut [u8], ino: u32, record: &InodeRecord) -> Result<()> {
        let (_, offset) = self.locate(ino)?;
        block[offset..offset + INODE_SIZE].copy_from_slice(&record.encode());
        Ok(())
    }

    pub fn read<T: BlockStorage>(&self, dev: &mut T, ino: u32) -> Result<InodeRecord> {
        let (blocknr, _) = self.locate(ino)?;
        let mut buf = vec![0; BLOCK_SIZE];
        dev.read_block(blocknr, &mut buf)?;
        self.read_from_block(&buf, ino)
    }

    /// Read-modify-write of the containing table block.
    pub fn write<T: BlockStorage>(&self, dev: &mut T, ino: u32, record: &InodeRecord) -> Result<()> {
        let (blocknr, _) = self.locate(ino)?;
        let mut buf = vec![0; BLOCK_SIZE];
        dev.read_block(blocknr, &mut buf)?;
        self.write_into_block(&mut buf, ino, record)?;
        dev.write_block(blocknr, &buf)?;
        debug!("wrote inode {} ({:?}, {} bytes)", ino, record.kind, record.size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;
    use crate::io::FileBlockEmulatorBuilder;

    fn sample(kind: FileType) -> InodeRecord {
        InodeRecord {
            uid: 1000,
            gid: 100,
            kind,
            perm: 0o644,
            size: 5000,
            time: 1_600_000_000,
            blocks: [4, 9, 0, 0],
        }
    }

    #[test]
    fn record_is_exactly_one_slot() {
        assert_eq!(std::mem::size_of::<DiskInode>(), INODE_SIZE);
    }

    #[test]
    fn record_layout_is_little_endian() {
        let bytes = InodeRecord::root().encode();
        assert_eq!(&bytes[4..6], &[0x00, 0x40]);
        assert_eq!(&bytes[8..10], &[0xED, 0x01]);

        let bytes = sample(FileType::Regular).encode();
        assert_eq!(&bytes[0..2], &1000u16.to_le_bytes());
        assert_eq!(&bytes[4..6], &[0x00, 0x80]);
        assert_eq!(&bytes[6..8], &5000u16.to_le_bytes());
        assert_eq!(&bytes[16..20], &4u32.to_le_bytes());
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut bytes = sample(FileType::Regular).encode();
        bytes[4] = 0x00;
        bytes[5] = 0xA0;
        match InodeRecord::decode(7, &bytes) {
            Err(FsError::Corruption(Corruption::InvalidInodeType { ino: 7, mode: 0xA000 })) => (),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn oversized_file_is_corruption() {
        let mut bytes = sample(FileType::Regular).encode();
        bytes[6..8].copy_from_slice(&(MAX_FILE_SIZE as u16 + 1).to_le_bytes());
        assert!(InodeRecord::decode(3, &bytes).unwrap_err().is_corruption());
    }

    #[test]
    fn locate_follows_table_geometry() {
        let table = InodeTable::new(3);
        assert_eq!(table.locate(1).unwrap(), (3, 32));
        assert_eq!(table.locate(127).unwrap(), (3, 127 * 32));
        assert!(table.locate(0).is_err());
        assert!(table.locate(128).is_err());
    }

    #[test]
    fn write_preserves_neighbouring_records() {
        let table = InodeTable::new(3);
        let mut block = vec![0; BLOCK_SIZE];
        let dir = sample(FileType::Directory);
        let file = sample(FileType::Regular);

        table.write_into_block(&mut block, 5, &dir).unwrap();
        table.write_into_block(&mut block, 6, &file).unwrap();

        assert_eq!(table.read_from_block(&block, 5).unwrap(), dir);
        assert_eq!(table.read_from_block(&block, 6).unwrap(), file);
    }

    #[test]
    fn records_round_trip_through_device() {
        let mut dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(5)
            .build()
            .unwrap();
        let table = InodeTable::new(3);

        for ino in 1..INODES_COUNT as u32 {
            let mut record = sample(if ino % 2 == 0 {
                FileType::Directory
            } else {
                FileType::Regular
            });
            record.uid = ino as u16;
            record.time = ino * 3;
            table.write(&mut dev, ino, &record).unwrap();
        }
        for ino in 1..INODES_COUNT as u32 {
            let record = table.read(&mut dev, ino).unwrap();
            assert_eq!(record.uid, ino as u16);
            assert_eq!(record.time, ino * 3);
            assert_eq!(record.is_dir(), ino % 2 == 0);
        }
        assert!(table.read(&mut dev, 0).is_err());
    }
}

use crate::consts::*;
use crate::error::{Corruption, Result};
use crate::io::BlockStorage;

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Raw little-endian image of the superblock as it sits at the start of block 0.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes)]
struct DiskSuperBlock {
    magic: U32<LittleEndian>,
    block_size: U32<LittleEndian>,
    block_bitmap: U32<LittleEndian>,
    inode_bitmap: U32<LittleEndian>,
    inode_table: U32<LittleEndian>,
}

/// Block numbers of the metadata structures. Stored in the superblock so the
/// formatter may place them elsewhere without the driver noticing.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Layout {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            block_bitmap: DEFAULT_BLOCK_BITMAP,
            inode_bitmap: DEFAULT_INODE_BITMAP,
            inode_table: DEFAULT_INODE_TABLE,
        }
    }
}

impl Layout {
    /// Checks the structure locations are usable on a device of `block_count`
    /// blocks. Pass `None` when the device size is not known.
    pub fn validate(&self, block_count: Option<usize>) -> Result<()> {
        let locations = [self.block_bitmap, self.inode_bitmap, self.inode_table];
        if locations.contains(&(SUPERBLOCK_INDEX as u32)) {
            return Err(Corruption::BadLayout("metadata overlaps the superblock".into()).into());
        }
        if self.block_bitmap == self.inode_bitmap
            || self.block_bitmap == self.inode_table
            || self.inode_bitmap == self.inode_table
        {
            return Err(Corruption::BadLayout("metadata blocks overlap".into()).into());
        }
        if self.metadata_blocks() > BITS_PER_BITMAP {
            return Err(Corruption::BadLayout("metadata beyond bitmap range".into()).into());
        }
        if let Some(count) = block_count {
            if self.metadata_blocks() > count {
                return Err(Corruption::BadLayout(format!(
                    "metadata ends at block {} but device holds {} blocks",
                    self.metadata_blocks(),
                    count
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Number of leading blocks that belong to metadata. Every one of them is
    /// permanently marked used in the block bitmap.
    pub fn metadata_blocks(&self) -> usize {
        let last = self
            .block_bitmap
            .max(self.inode_bitmap)
            .max(self.inode_table);
        last as usize + 1
    }
}

/// The first block of the file system storing information critical for mounting
/// the file system and verifying the underlying disk is formatted correctly.
///
/// Immutable once loaded; geometry never changes on a live mount.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SuperBlock {
    /// A 32-bit identifying constant, always SB_MAGIC once validated.
    pub sb_magic: u32,
    /// Always BLOCK_SIZE once validated.
    pub block_size: u32,
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
}

impl SuperBlock {
    pub fn new(layout: Layout) -> Self {
        Self {
            sb_magic: SB_MAGIC,
            block_size: BLOCK_SIZE as u32,
            block_bitmap: layout.block_bitmap,
            inode_bitmap: layout.inode_bitmap,
            inode_table: layout.inode_table,
        }
    }

    pub fn layout(&self) -> Layout {
        Layout {
            block_bitmap: self.block_bitmap,
            inode_bitmap: self.inode_bitmap,
            inode_table: self.inode_table,
        }
    }

    /// Decodes and validates the superblock stored at the front of `buf`.
    /// Nothing read from disk is trusted until every field has been checked.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let disk = DiskSuperBlock::read_from_prefix(buf)
            .ok_or_else(|| Corruption::BadLayout("superblock buffer too short".into()))?;

        let magic = disk.magic.get();
        if magic != SB_MAGIC {
            return Err(Corruption::BadMagic(magic).into());
        }
        let block_size = disk.block_size.get();
        if block_size as usize != BLOCK_SIZE {
            return Err(Corruption::BadBlockSize(block_size).into());
        }

        let sb = Self {
            sb_magic: magic,
            block_size,
            block_bitmap: disk.block_bitmap.get(),
            inode_bitmap: disk.inode_bitmap.get(),
            inode_table: disk.inode_table.get(),
        };
        sb.layout().validate(None)?;
        Ok(sb)
    }

    /// Serializes the SuperBlock into a BLOCK_SIZE buffer for writing to disk.
    /// The remainder of the block past the encoded fields is zero.
    pub fn serialize(&self) -> Vec<u8> {
        let disk = DiskSuperBlock {
            magic: U32::new(self.sb_magic),
            block_size: U32::new(self.block_size),
            block_bitmap: U32::new(self.block_bitmap),
            inode_bitmap: U32::new(self.inode_bitmap),
            inode_table: U32::new(self.inode_table),
        };
        let mut encoded = vec![0; BLOCK_SIZE];
        encoded[..std::mem::size_of::<DiskSuperBlock>()].copy_from_slice(disk.as_bytes());
        encoded
    }

    /// Reads block 0 of `dev` and validates it against the device geometry.
    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<Self> {
        let mut buf = vec![0; BLOCK_SIZE];
        dev.read_block(SUPERBLOCK_INDEX, &mut buf)?;
        let sb = Self::parse(&buf)?;
        sb.layout().validate(Some(dev.block_count()))?;
        Ok(sb)
    }

    /// Writes a fresh superblock describing `layout` to block 0.
    pub fn initialize<T: BlockStorage>(dev: &mut T, layout: Layout) -> Result<Self> {
        layout.validate(Some(dev.block_count()))?;
        let sb = Self::new(layout);
        dev.write_block(SUPERBLOCK_INDEX, &sb.serialize())?;
        Ok(sb)
    }
}

//! On-disk constants shared by every layer of the filesystem.

/// Identifies an shfs volume. Stored in the first word of block 0.
pub const SB_MAGIC: u32 = 0x1012_F4DD;

/// The only block size this implementation understands.
pub const BLOCK_SIZE: usize = 4096;

/// Known locations written by the formatter unless told otherwise.
pub const SUPERBLOCK_INDEX: usize = 0;
pub const DEFAULT_BLOCK_BITMAP: u32 = 1;
pub const DEFAULT_INODE_BITMAP: u32 = 2;
pub const DEFAULT_INODE_TABLE: u32 = 3;

/// Size of one on-disk inode record.
pub const INODE_SIZE: usize = 32;
/// The inode table occupies exactly one block.
pub const INODES_COUNT: usize = BLOCK_SIZE / INODE_SIZE;

/// Inode 0 is never handed out.
pub const RESERVED_INO: u32 = 0;
pub const ROOT_INO: u32 = 1;

pub const DIRECT_BLOCKS: usize = 4;
pub const MAX_FILE_SIZE: usize = DIRECT_BLOCKS * BLOCK_SIZE;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const DIR_NAME_LEN: usize = 16;
/// One byte of the name buffer is kept for the terminator.
pub const MAX_NAME_LEN: usize = DIR_NAME_LEN - 1;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;
pub const MAX_DIR_ENTRIES: usize = DIRECT_BLOCKS * ENTRIES_PER_BLOCK;

/// A single bitmap block tracks up to 32,768 units.
pub const BITS_PER_BITMAP: usize = BLOCK_SIZE * 8;

/// File type values stored in the inode `mode` field.
pub const S_IFDIR: u16 = 0x4000;
pub const S_IFREG: u16 = 0x8000;

pub const ROOT_DEFAULT_PERM: u16 = 0o755;

/// Inodes 0 and ROOT_INO are never allocated or freed.
pub const RESERVED_INODES: usize = ROOT_INO as usize + 1;

//! Lays out an empty volume on a raw device.
//!
//! # Layout
//! ==============================================================================
//! | SuperBlock | Bitmap (blocks) | Bitmap (inodes) | Inode table | Data Region |
//! ==============================================================================
use crate::alloc::Allocator;
use crate::consts::*;
use crate::error::{FsError, Result};
use crate::io::BlockStorage;
use crate::node::{InodeRecord, InodeTable};
use crate::sb::{Layout, SuperBlock};

/// Number of blocks the block bitmap can describe on a device of `block_count`
/// blocks. Anything past one bitmap block worth of bits is never used.
pub(crate) fn block_universe(block_count: usize) -> usize {
    block_count.min(BITS_PER_BITMAP)
}

/// Writes the superblock, both bitmaps and an inode table holding only the
/// root directory. Blocks outside the metadata are left untouched, so running
/// this twice over the same image yields identical metadata.
pub fn format<T: BlockStorage>(dev: &mut T, layout: Layout) -> Result<SuperBlock> {
    let block_count = dev.block_count();
    layout.validate(Some(block_count))?;
    if block_universe(block_count) <= layout.metadata_blocks() {
        warn!(
            "device of {} blocks leaves no room for data past block {}",
            block_count,
            layout.metadata_blocks()
        );
        return Err(FsError::NoSpace);
    }

    let sb = SuperBlock::initialize(dev, layout)?;
    info!("wrote superblock: {:?}", layout);

    let block_map = Allocator::new(block_universe(block_count), layout.metadata_blocks());
    dev.write_block(layout.block_bitmap as usize, block_map.bitmap().serialize())?;
    info!(
        "wrote block bitmap: {} of {} blocks free",
        block_map.free_count(),
        block_map.universe()
    );

    let inode_map = Allocator::new(INODES_COUNT, RESERVED_INODES);
    dev.write_block(layout.inode_bitmap as usize, inode_map.bitmap().serialize())?;
    info!("wrote inode bitmap: {} inodes free", inode_map.free_count());

    let table = InodeTable::new(layout.inode_table);
    let mut table_block = vec![0; BLOCK_SIZE];
    table.write_into_block(&mut table_block, ROOT_INO, &InodeRecord::root())?;
    dev.write_block(layout.inode_table as usize, &table_block)?;
    info!("wrote inode table: root inode {}", ROOT_INO);

    dev.sync_disk()?;
    Ok(sb)
}

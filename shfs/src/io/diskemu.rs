use super::block::{BlockNumber, BlockStorage};
use crate::consts::BLOCK_SIZE;

use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, Error, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates a block device in userspace using a plain file or an image as block
/// storage. Block `n` lives at byte offset `n * BLOCK_SIZE`.
#[derive(Debug)]
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Opens an existing image for reading and writing. The block count is the
    /// file length rounded down to whole blocks; the contents are left alone.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        // Return error if the file does not exist rather than create one.
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        let block_count = (fd.metadata()?.len() / BLOCK_SIZE as u64) as usize;
        if block_count == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "image is smaller than one block",
            ));
        }
        Ok(Self { fd, block_count })
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber, len: usize) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(Error::new(ErrorKind::InvalidInput, "block out of range"));
        }
        if len != BLOCK_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "buffer length does not match block size",
            ));
        }
        Ok(())
    }

    fn seek_to(&mut self, blocknr: BlockNumber) -> std::io::Result<()> {
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))
            .map(|_| ())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr, buf.len())?;
        self.seek_to(blocknr)?;
        self.fd.read_exact(buf)
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr, buf.len())?;
        self.seek_to(blocknr)?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            block_count: 0,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether `build` zeroes the medium. Turn off to reopen a formatted image.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// Takes ownership of the file and, unless told otherwise, overwrites it
    /// with `block_count` zeroed blocks.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.block_count == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "device needs at least one block",
            ));
        }
        if self.clear {
            self.zero_blocks()?;
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let zeroes = vec![0x00; BLOCK_SIZE];
        let mut bfd = BufWriter::new(&self.fd);
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

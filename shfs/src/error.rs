use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

/// Damage found while decoding on-disk structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("bad superblock magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported block size {0}")]
    BadBlockSize(u32),
    #[error("invalid volume layout: {0}")]
    BadLayout(String),
    #[error("inode {ino} has invalid type {mode:#06x}")]
    InvalidInodeType { ino: u32, mode: u16 },
    #[error("inode {ino} records size {size} beyond the direct block limit")]
    BadInodeSize { ino: u32, size: u32 },
    #[error("inode number {0} is out of range")]
    InodeOutOfRange(u32),
    #[error("malformed directory entry in slot {slot}")]
    BadDirEntry { slot: usize },
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("device i/o failed")]
    Io(#[from] std::io::Error),
    #[error("corrupt filesystem: {0}")]
    Corruption(#[from] Corruption),
    #[error("no space left on device")]
    NoSpace,
    #[error("found no file at path")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("an entry with that name already exists")]
    DuplicateName,
    #[error("directory has no free entry slot")]
    NoFreeSlot,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("file exceeds the maximum size")]
    FileTooLarge,
    #[error("invalid file name: {0}")]
    InvalidName(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl FsError {
    /// Reports whether the error came from damaged on-disk state rather than a
    /// failed device or a caller mistake.
    pub fn is_corruption(&self) -> bool {
        matches!(self, FsError::Corruption(_))
    }
}

//! shfs: a small block-based filesystem with a fixed 4K block layout.
//!
//! ```text
//! | SuperBlock | Bitmap (blocks) | Bitmap (inodes) | Inode table | Data Region |
//! ```
//!
//! The codec modules ([`sb`], [`alloc`], [`node`], [`dir`]) are pure functions
//! over block-sized byte buffers. [`Shfs`] ties them to a [`BlockStorage`]
//! device and serializes every update through a single lock.
#[macro_use]
extern crate log;

pub mod alloc;
pub mod cache;
pub mod consts;
pub mod dir;
mod error;
pub mod fs;
pub mod io;
pub mod mkfs;
pub mod node;
pub mod sb;

pub use crate::consts::{BLOCK_SIZE, ROOT_INO};
pub use crate::dir::DirEntry;
pub use crate::error::{Corruption, FsError, Result};
pub use crate::fs::{Attributes, Shfs};
pub use crate::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
pub use crate::mkfs::format;
pub use crate::node::{FileType, InodeRecord, InodeTable};
pub use crate::sb::{Layout, SuperBlock};

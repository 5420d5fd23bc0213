use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;
use shfs::{Attributes, FileBlockEmulator, FileBlockEmulatorBuilder, FileType, Layout, Shfs};

fn mount(image: &Path) -> Result<Shfs<FileBlockEmulator>> {
    let dev = FileBlockEmulator::open(image)
        .with_context(|| format!("failed to open image {}", image.display()))?;
    Shfs::mount(dev).with_context(|| format!("failed to mount {}", image.display()))
}

/// Splits `/a/b/c` into the parent path `/a/b` and the final name `c`.
fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let cut = trimmed
        .rfind('/')
        .ok_or_else(|| anyhow!("{:?} is not an absolute path", path))?;
    let name = &trimmed[cut + 1..];
    if name.is_empty() || name == "." || name == ".." {
        return Err(anyhow!("{:?} does not name a new entry", path));
    }
    let parent = if cut == 0 { "/" } else { &trimmed[..cut] };
    Ok((parent, name))
}

pub fn format(image: &Path, create: Option<usize>) -> Result<()> {
    let mut dev = match create {
        Some(blocks) => {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(image)
                .with_context(|| format!("failed to create {}", image.display()))?;
            FileBlockEmulatorBuilder::from(file)
                .with_block_count(blocks)
                .build()?
        }
        None => FileBlockEmulator::open(image)
            .with_context(|| format!("failed to open image {}", image.display()))?,
    };
    let sb = shfs::format(&mut dev, Layout::default())
        .with_context(|| format!("failed to format {}", image.display()))?;
    info!("formatted {} with {:?}", image.display(), sb.layout());
    Ok(())
}

pub fn ls<W: Write>(image: &Path, path: &str, out: &mut W) -> Result<()> {
    let fs = mount(image)?;
    let ino = fs.resolve(path).with_context(|| format!("cannot access {}", path))?;
    for entry in fs.read_dir(ino).with_context(|| format!("cannot list {}", path))? {
        let tag = match entry.kind {
            FileType::Directory => 'd',
            FileType::Regular => '-',
        };
        writeln!(out, "{} {:>4} {}", tag, entry.inode, entry.name_lossy())?;
    }
    Ok(())
}

pub fn stat<W: Write>(image: &Path, path: &str, out: &mut W) -> Result<()> {
    let fs = mount(image)?;
    let ino = fs.resolve(path).with_context(|| format!("cannot stat {}", path))?;
    let node = fs.inode(ino)?;
    writeln!(out, "inode: {}", ino)?;
    writeln!(out, "type:  {:?}", node.kind)?;
    writeln!(out, "perm:  {:o}", node.perm)?;
    writeln!(out, "owner: {}:{}", node.uid, node.gid)?;
    writeln!(out, "size:  {}", node.size)?;
    writeln!(out, "time:  {}", node.time)?;
    let blocks: Vec<String> = node.mapped_blocks().map(|b| b.to_string()).collect();
    writeln!(out, "blocks: [{}]", blocks.join(", "))?;
    Ok(())
}

pub fn mkdir(image: &Path, path: &str) -> Result<()> {
    let (parent, name) = split_parent(path)?;
    let fs = mount(image)?;
    let dir = fs.resolve(parent).with_context(|| format!("cannot access {}", parent))?;
    let ino = fs
        .create(dir, name, Attributes::dir(0o755))
        .with_context(|| format!("cannot create directory {}", path))?;
    fs.sync()?;
    info!("created directory {} as inode {}", path, ino);
    Ok(())
}

pub fn put(image: &Path, path: &str, source: &Path) -> Result<()> {
    let data =
        fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
    let (parent, name) = split_parent(path)?;
    let fs = mount(image)?;
    let dir = fs.resolve(parent).with_context(|| format!("cannot access {}", parent))?;
    let ino = fs
        .create(dir, name, Attributes::file(0o644))
        .with_context(|| format!("cannot create {}", path))?;
    if let Err(e) = fs.write(ino, 0, &data) {
        fs.unlink(dir, name)?;
        return Err(e).with_context(|| format!("cannot write {} bytes to {}", data.len(), path));
    }
    fs.sync()?;
    info!("copied {} bytes into {} (inode {})", data.len(), path, ino);
    Ok(())
}

pub fn cat<W: Write>(image: &Path, path: &str, out: &mut W) -> Result<()> {
    let fs = mount(image)?;
    let ino = fs.resolve(path).with_context(|| format!("cannot access {}", path))?;
    let size = fs.inode(ino)?.size as usize;
    let mut buf = vec![0; size];
    let n = fs
        .read(ino, 0, &mut buf)
        .with_context(|| format!("cannot read {}", path))?;
    out.write_all(&buf[..n])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn image() -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        format(&path, Some(32)).unwrap();
        (dir, path)
    }

    #[test]
    fn splits_parent_and_name() {
        assert_eq!(split_parent("/a").unwrap(), ("/", "a"));
        assert_eq!(split_parent("/a/b/").unwrap(), ("/a", "b"));
        assert!(split_parent("a").is_err());
        assert!(split_parent("/").is_err());
        assert!(split_parent("/a/..").is_err());
    }

    #[test]
    fn put_then_cat_returns_the_same_bytes() {
        let (dir, image) = image();
        let source = dir.path().join("hello.txt");
        fs::write(&source, b"hello shfs\n").unwrap();

        mkdir(&image, "/docs").unwrap();
        put(&image, "/docs/hello", &source).unwrap();

        let mut out = Vec::new();
        cat(&image, "/docs/hello", &mut out).unwrap();
        assert_eq!(out, b"hello shfs\n");

        let mut out = Vec::new();
        ls(&image, "/docs", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "-    3 hello\n");
    }

    #[test]
    fn oversized_put_leaves_nothing_behind() {
        let (dir, image) = image();
        let source = dir.path().join("big");
        fs::write(&source, vec![0u8; shfs::consts::MAX_FILE_SIZE + 1]).unwrap();

        assert!(put(&image, "/big", &source).is_err());
        let mut out = Vec::new();
        ls(&image, "/", &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn stat_reports_root_directory() {
        let (_dir, image) = image();
        let mut out = Vec::new();
        stat(&image, "/", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("inode: 1\ntype:  Directory\nperm:  755\n"));
    }

    #[test]
    fn unformatted_image_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.img");
        fs::write(&path, vec![0u8; 8 * shfs::BLOCK_SIZE]).unwrap();
        assert!(ls(&path, "/", &mut Vec::new()).is_err());
    }
}

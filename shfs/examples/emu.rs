use shfs::{Attributes, FileBlockEmulatorBuilder, Shfs};

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .with_block_count(64)
        .build()
        .expect("Could not initialize disk emulator.");

    // create a new shfs volume on device and populate it
    let fs = Shfs::format_and_mount(dev).expect("should create");
    let home = fs.create(fs.root(), "home", Attributes::dir(0o755)).unwrap();
    let file = fs.create(home, "file.txt", Attributes::file(0o644)).unwrap();
    fs.write(file, 0, b"hello from shfs\n").unwrap();

    let ino = fs.resolve("/home/file.txt").unwrap();
    let mut buf = vec![0; 64];
    let n = fs.read(ino, 0, &mut buf).unwrap();
    print!("{}", String::from_utf8_lossy(&buf[..n]));
    println!(
        "{} free blocks, {} free inodes",
        fs.free_blocks(),
        fs.free_inodes()
    );
}

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum ShfsCli {
    /// write an empty shfs volume to an image file
    Format(FormatArgs),
    /// list a directory
    Ls(LsArgs),
    /// print the inode behind a path
    Stat(PathArgs),
    /// create a directory
    Mkdir(PathArgs),
    /// copy a host file into the volume
    Put(PutArgs),
    /// print a file to stdout
    Cat(PathArgs),
}

#[derive(clap::Args, Debug, PartialEq)]
#[command(about = "write an empty shfs volume to an image file")]
pub struct FormatArgs {
    /// the image file
    pub image: PathBuf,
    /// create a zeroed image of this many blocks first
    #[clap(short, long)]
    pub create: Option<usize>,
}

#[derive(clap::Args, Debug, PartialEq)]
#[command(about = "list a directory")]
pub struct LsArgs {
    /// the image file
    pub image: PathBuf,
    /// absolute path inside the volume
    #[clap(default_value = "/")]
    pub path: String,
}

#[derive(clap::Args, Debug, PartialEq)]
pub struct PathArgs {
    /// the image file
    pub image: PathBuf,
    /// absolute path inside the volume
    pub path: String,
}

#[derive(clap::Args, Debug, PartialEq)]
#[command(about = "copy a host file into the volume")]
pub struct PutArgs {
    /// the image file
    pub image: PathBuf,
    /// absolute destination path inside the volume
    pub path: String,
    /// the host file to copy
    pub source: PathBuf,
}

#[cfg(test)]
mod parse_args_tests {
    use super::*;

    #[test]
    fn format_with_and_without_create() {
        let args = ShfsCli::parse_from(["shfs", "format", "disk.img"]);
        assert_eq!(
            args,
            ShfsCli::Format(FormatArgs {
                image: PathBuf::from("disk.img"),
                create: None,
            })
        );

        let args = ShfsCli::parse_from(["shfs", "format", "disk.img", "--create", "64"]);
        assert_eq!(
            args,
            ShfsCli::Format(FormatArgs {
                image: PathBuf::from("disk.img"),
                create: Some(64),
            })
        );
    }

    #[test]
    fn ls_defaults_to_root() {
        let args = ShfsCli::parse_from(["shfs", "ls", "disk.img"]);
        assert_eq!(
            args,
            ShfsCli::Ls(LsArgs {
                image: PathBuf::from("disk.img"),
                path: "/".to_string(),
            })
        );
    }

    #[test]
    fn put_takes_destination_then_source() {
        let args = ShfsCli::parse_from(["shfs", "put", "disk.img", "/notes", "notes.txt"]);
        assert_eq!(
            args,
            ShfsCli::Put(PutArgs {
                image: PathBuf::from("disk.img"),
                path: "/notes".to_string(),
                source: PathBuf::from("notes.txt"),
            })
        );
    }

    #[test]
    fn missing_path_is_an_error() {
        assert!(ShfsCli::try_parse_from(["shfs", "cat", "disk.img"]).is_err());
    }
}

use std::io;

use clap::Parser;

mod cli;
mod commands;

use cli::ShfsCli;

/// Formats shfs images and inspects or edits them from the host.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match ShfsCli::parse() {
        ShfsCli::Format(args) => commands::format(&args.image, args.create)?,
        ShfsCli::Ls(args) => commands::ls(&args.image, &args.path, &mut out)?,
        ShfsCli::Stat(args) => commands::stat(&args.image, &args.path, &mut out)?,
        ShfsCli::Mkdir(args) => commands::mkdir(&args.image, &args.path)?,
        ShfsCli::Put(args) => commands::put(&args.image, &args.path, &args.source)?,
        ShfsCli::Cat(args) => commands::cat(&args.image, &args.path, &mut out)?,
    }
    Ok(())
}

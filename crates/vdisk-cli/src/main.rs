#![forbid(unsafe_code)]
//! vdisk: a UNIX-style educational filesystem in a single backing file.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vdisk_core::VirtualDisk;

mod shell;

#[derive(Parser)]
#[command(
    name = "vdisk",
    about = "UNIX-style educational filesystem contained in a single backing file"
)]
struct Cli {
    /// Backing file for the virtual disk.
    disk: Option<PathBuf>,
    /// Volume size in bytes; consulted only when the backing file is
    /// freshly created.
    size: Option<u64>,
}

fn main() {
    // Shell output is a protocol; diagnostics and traces go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let Some(disk_path) = cli.disk else {
        eprintln!("Name of virtual disk file not specified!");
        return Ok(());
    };

    let mut disk = match VirtualDisk::open_path(&disk_path, cli.size) {
        Ok(disk) => disk,
        Err(err) => {
            tracing::debug!(target: "vdisk::cli", event = "open_failed", error = %err);
            eprintln!("Could not open virtual disk file!");
            std::process::exit(1);
        }
    };

    shell::repl(&mut disk)
}

//! `hlpak` binary entry point.
//!
//! Parses arguments, initializes logging, opens the archive and runs one
//! subcommand against it. All archive handling lives in the `hlpak` crate.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use hlpak::{FileMode, Package};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.package_config()?;
    let mode = if cli.write {
        FileMode::READ_WRITE
    } else {
        FileMode::READ
    };

    let mut package = Package::open_file_auto(&cli.archive, mode, config)
        .with_context(|| format!("failed to open {}", cli.archive.display()))?;
    let result = commands::run(&mut package, &cli.command);
    package.close();
    result
}

//! rsar-pack binary entry point.
//!
//! Thin wrapper around the rsar-archive library: parses arguments,
//! initializes logging and packs the input directory.

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::PackArgs;

fn main() -> Result<()> {
    let args = PackArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let summary = cli::run(&args)?;
    tracing::info!(
        "Packed {} resources into {} ({} bytes)",
        summary.resources,
        summary.output.display(),
        summary.bytes
    );

    Ok(())
}

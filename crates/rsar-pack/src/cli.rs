//! Command line arguments and the pack run itself

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rsar_archive::{ArchiveConfig, ArchiveManager, ResourceLocator, register_default_types};
use tracing::info;

/// Pack a loose resource directory into a single RSAR container
#[derive(Debug, Clone, Parser)]
#[command(name = "rsar-pack", version)]
pub struct PackArgs {
    /// Directory to pack
    pub input: PathBuf,

    /// Output container path (defaults to `<INPUT>.dat`)
    #[arg(short, long, env = "RSAR_PACK_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Locator of a subtree or resource to leave out (repeatable)
    #[arg(long = "ignore", value_name = "LOCATOR")]
    pub ignore: Vec<String>,

    /// Byte boundary for resource bodies
    #[arg(long, env = "RSAR_PACK_ALIGNMENT", default_value_t = rsar_archive::DEFAULT_ALIGNMENT)]
    pub alignment: u64,

    /// Gzip level (0-9) for compressed types
    #[arg(long, env = "RSAR_PACK_COMPRESSION_LEVEL", default_value_t = 6)]
    pub compression_level: u32,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl PackArgs {
    /// Output path, derived from the input when not given
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| default_output(&self.input))
    }

    /// Archive configuration described by the flags
    pub fn archive_config(&self) -> ArchiveConfig {
        ArchiveConfig::new()
            .with_alignment(self.alignment)
            .with_compression_level(self.compression_level)
    }

    /// Parsed ignore locators, empty ones dropped
    pub fn ignore_locators(&self) -> Vec<ResourceLocator> {
        self.ignore
            .iter()
            .map(|l| ResourceLocator::parse(l))
            .filter(|l| !l.is_empty())
            .collect()
    }
}

fn default_output(input: &Path) -> PathBuf {
    // Components drop a trailing separator
    let mut path: OsString = input.components().as_path().as_os_str().to_owned();
    path.push(".dat");
    PathBuf::from(path)
}

/// Outcome of one pack run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    /// Written container
    pub output: PathBuf,
    /// Number of resources packed
    pub resources: usize,
    /// Container size in bytes
    pub bytes: u64,
}

/// Open the input as a loose archive and save it as a container
pub fn run(args: &PackArgs) -> Result<PackSummary> {
    if !args.input.is_dir() {
        bail!("input {} is not a directory", args.input.display());
    }

    let manager = ArchiveManager::with_config(args.archive_config())
        .context("invalid packing options")?;
    register_default_types(&manager)?;

    let ignore = args.ignore_locators();
    let archive = manager
        .open_loose(&args.input, ignore.iter().cloned())
        .with_context(|| format!("failed to open {}", args.input.display()))?;

    let resources = archive
        .find_all_resources(&ResourceLocator::empty(), true)?
        .len();
    info!(
        "Packing {} resources from {} ({} ignored)",
        resources,
        args.input.display(),
        ignore.len()
    );

    let output = args.output_path();
    archive
        .save_to_path(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let bytes = std::fs::metadata(&output)?.len();
    info!("Wrote {} ({} bytes)", output.display(), bytes);

    Ok(PackSummary {
        output,
        resources,
        bytes,
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use rsar_archive::XmlDocument;

    #[test]
    fn test_defaults() {
        let args = PackArgs::try_parse_from(["rsar-pack", "assets/"]).unwrap();
        assert_eq!(args.output_path(), PathBuf::from("assets.dat"));
        assert_eq!(args.alignment, 256);
        assert_eq!(args.archive_config(), ArchiveConfig::default());
        assert!(args.ignore_locators().is_empty());
    }

    #[test]
    fn test_flags() {
        let args = PackArgs::try_parse_from([
            "rsar-pack",
            "in",
            "-o",
            "out.bin",
            "--ignore",
            "a/b",
            "--ignore",
            "/",
            "--alignment",
            "512",
            "--compression-level",
            "9",
        ])
        .unwrap();

        assert_eq!(args.output_path(), PathBuf::from("out.bin"));
        assert_eq!(args.ignore_locators(), [ResourceLocator::parse("a/b")]);
        assert_eq!(args.archive_config().alignment, 512);
        assert_eq!(args.archive_config().compression_level, 9);
    }

    #[test]
    fn test_run_packs_directory() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("assets");
        std::fs::create_dir_all(input.join("data")).unwrap();
        std::fs::write(input.join("data/units.xml"), "<units/>").unwrap();
        std::fs::write(input.join("data/skip.xml"), "<skip/>").unwrap();

        let args = PackArgs::try_parse_from([
            "rsar-pack",
            input.to_str().unwrap(),
            "--ignore",
            "data/skip",
        ])
        .unwrap();
        let summary = run(&args).unwrap();

        assert_eq!(summary.output, dir.path().join("assets.dat"));
        assert_eq!(summary.resources, 1);

        let manager = ArchiveManager::new();
        register_default_types(&manager).unwrap();
        let packed = manager.open_file(&summary.output).unwrap();
        let units: XmlDocument = packed.get(&ResourceLocator::parse("data/units")).unwrap();
        assert_eq!(units.text(), "<units/>");
    }

    #[test]
    fn test_run_rejects_bad_options() {
        let dir = tempfile::tempdir().unwrap();
        let args = PackArgs::try_parse_from([
            "rsar-pack",
            dir.path().to_str().unwrap(),
            "--alignment",
            "0",
        ])
        .unwrap();
        assert!(run(&args).is_err());

        let missing = PackArgs::try_parse_from(["rsar-pack", "/definitely/not/here"]).unwrap();
        assert!(run(&missing).is_err());
    }
}

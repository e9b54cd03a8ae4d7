//! CLI arguments module
//!
//! Defines command-line argument parsing using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// CLI arguments for the aggregate assembler
#[derive(Debug, Parser)]
#[command(name = "aggregate-assembler")]
#[command(about = "Assembles an aggregate file from verified pieces fetched over HTTP", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Assemble an aggregate described by a JSON manifest
    FromManifest(FromManifestArgs),
}

/// Arguments of `from-manifest`
#[derive(Debug, Clone, Args)]
pub struct FromManifestArgs {
    /// Manifest file, standard input when omitted
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Output file, `<aggregate commitment>.agg` when omitted
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Replace an existing output whose size does not match
    #[arg(long)]
    pub overwrite: bool,

    /// Process segments smallest first instead of in random order
    #[arg(long)]
    pub in_order: bool,

    /// Maximum number of segments processed at once
    #[arg(long, default_value_t = 5)]
    pub max_concurrency: usize,

    /// Retries per HTTP request
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Deadline for a single segment
    #[arg(long, default_value_t = 600, value_name = "SECONDS")]
    pub segment_timeout_seconds: u64,

    /// Show a progress line (default: when stderr is a terminal)
    #[arg(long, num_args = 0..=1, default_missing_value = "true", action = clap::ArgAction::Set, value_name = "BOOL")]
    pub show_progress: Option<bool>,
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Check if quiet mode is enabled
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Get the log level based on verbosity settings
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            tracing::Level::DEBUG
        } else if self.quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_manifest(args: &CliArgs) -> &FromManifestArgs {
        match &args.command {
            Command::FromManifest(a) => a,
        }
    }

    #[test]
    fn test_default_values() {
        let args = CliArgs::try_parse_from(["aggregate-assembler", "from-manifest"]).unwrap();
        let fm = from_manifest(&args);

        assert!(fm.manifest.is_none());
        assert!(fm.output.is_none());
        assert!(!fm.overwrite);
        assert!(!fm.in_order);
        assert_eq!(fm.max_concurrency, 5);
        assert_eq!(fm.max_retries, 5);
        assert_eq!(fm.segment_timeout_seconds, 600);
        assert_eq!(fm.show_progress, None);
        assert_eq!(args.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_explicit_values() {
        let args = CliArgs::try_parse_from([
            "aggregate-assembler",
            "from-manifest",
            "--manifest",
            "m.json",
            "-o",
            "out.agg",
            "--overwrite",
            "--in-order",
            "--max-concurrency",
            "12",
            "--segment-timeout-seconds",
            "30",
            "--show-progress",
            "-v",
        ])
        .unwrap();
        let fm = from_manifest(&args);

        assert_eq!(fm.manifest, Some(PathBuf::from("m.json")));
        assert_eq!(fm.output, Some(PathBuf::from("out.agg")));
        assert!(fm.overwrite);
        assert!(fm.in_order);
        assert_eq!(fm.max_concurrency, 12);
        assert_eq!(fm.segment_timeout_seconds, 30);
        assert_eq!(fm.show_progress, Some(true));
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_show_progress_can_be_disabled() {
        let args =
            CliArgs::try_parse_from(["aggregate-assembler", "from-manifest", "--show-progress", "false"]).unwrap();
        assert_eq!(from_manifest(&args).show_progress, Some(false));
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(CliArgs::try_parse_from(["aggregate-assembler", "-v", "-q", "from-manifest"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(CliArgs::try_parse_from(["aggregate-assembler"]).is_err());
    }
}

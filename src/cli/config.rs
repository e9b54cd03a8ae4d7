//! CLI configuration module
//!
//! Resolves defaults and validates the options of a run.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::Result;
use crate::assemble::TaskOrder;
use crate::cli::args::{CliArgs, Command};
use crate::commp::Commitment;
use crate::error::AssembleError;
use crate::net::RetryPolicy;

/// Extension of the default output file name
pub const OUTPUT_EXTENSION: &str = "agg";

/// Configuration for an assembly run
#[derive(Debug, Clone)]
pub struct Config {
    /// Manifest path, `None` for standard input
    pub manifest: Option<PathBuf>,
    /// Output path, derived from the aggregate commitment when `None`
    pub output: Option<PathBuf>,
    /// Replace a mismatched existing output
    pub overwrite: bool,
    /// Smallest-first instead of shuffled order
    pub in_order: bool,
    /// Tasks processed at once
    pub max_concurrency: usize,
    /// Retries per HTTP request
    pub max_retries: u32,
    /// Deadline of a single task
    pub segment_timeout: Duration,
    /// Render the progress line
    pub show_progress: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest: None,
            output: None,
            overwrite: false,
            in_order: false,
            max_concurrency: 5,
            max_retries: 5,
            segment_timeout: Duration::from_secs(600),
            show_progress: false,
        }
    }
}

impl Config {
    /// Create configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Self {
        let Command::FromManifest(fm) = &args.command;
        Self {
            manifest: fm.manifest.clone(),
            output: fm.output.clone(),
            overwrite: fm.overwrite,
            in_order: fm.in_order,
            max_concurrency: fm.max_concurrency,
            max_retries: fm.max_retries,
            segment_timeout: Duration::from_secs(fm.segment_timeout_seconds),
            show_progress: fm.show_progress.unwrap_or_else(|| std::io::stderr().is_terminal()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(AssembleError::config_error_with_field("must be at least 1", "max_concurrency").into());
        }

        if self.segment_timeout == Duration::ZERO {
            return Err(AssembleError::config_error_with_field("must be positive", "segment_timeout_seconds").into());
        }

        if let Some(output) = &self.output {
            if output.as_os_str().is_empty() {
                return Err(AssembleError::config_error_with_field("cannot be empty", "output").into());
            }
        }

        Ok(())
    }

    /// Dispatch order of the task list
    pub fn task_order(&self) -> TaskOrder {
        if self.in_order {
            TaskOrder::BySize
        } else {
            TaskOrder::Shuffled
        }
    }

    /// Retry policy for HTTP requests
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        }
    }

    /// Output path for the aggregate
    pub fn output_path(&self, aggregate: &Commitment) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.{}", aggregate, OUTPUT_EXTENSION)))
    }

    /// Human-readable manifest origin
    pub fn manifest_label(&self) -> String {
        self.manifest
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<stdin>".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_config_from_args() {
        let args = CliArgs::try_parse_from([
            "aggregate-assembler",
            "-q",
            "from-manifest",
            "--output",
            "/tmp/out.agg",
            "--in-order",
            "--max-retries",
            "2",
            "--segment-timeout-seconds",
            "45",
            "--show-progress",
            "false",
        ])
        .unwrap();
        let config = Config::from_args(&args);

        assert_eq!(config.output, Some(PathBuf::from("/tmp/out.agg")));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.segment_timeout, Duration::from_secs(45));
        assert!(!config.show_progress);
        assert!(args.quiet);
        assert_eq!(config.task_order(), TaskOrder::BySize);
        assert_eq!(config.retry_policy().max_retries, 2);
        assert_eq!(config.retry_policy().wait_min, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn test_config_validate_rejects_zero_timeout() {
        let config = Config {
            segment_timeout: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validate_rejects_empty_output() {
        let config = Config {
            output: Some(PathBuf::new()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_output_path() {
        let commitment = crate::commp::digest(&[1u8; 127]).unwrap();
        let config = Config::default();
        assert_eq!(config.output_path(&commitment), PathBuf::from(format!("{}.agg", commitment)));
        assert_eq!(config.task_order(), TaskOrder::Shuffled);
        assert_eq!(config.manifest_label(), "<stdin>");
    }
}

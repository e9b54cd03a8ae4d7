//! CLI module
//!
//! Command-line interface for the aggregate assembler.

pub mod args;
pub mod config;
pub mod progress;

pub use args::{CliArgs, Command, FromManifestArgs};
pub use config::Config;
pub use progress::{format_duration, format_gib, ProgressHandle, ProgressReporter};

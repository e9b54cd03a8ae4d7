//! aggregate-assembler - Main entry point
//!
//! Assembles an aggregate file from the pieces listed in a manifest.

use anyhow::{Context, Result};
use aggregate_assembler::cli::format_duration;
use aggregate_assembler::{
    AggregateManifest, AssembleError, Assembler, CliArgs, Config, RetryingFetcher, RunSummary,
};
use std::fs::File;
use std::io::{BufReader, IsTerminal};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set up panic handler
    setup_panic_handler();

    // Parse CLI arguments
    let args = CliArgs::parse_args();

    // Initialize logging
    init_logging(&args);
    debug!("CLI arguments: {:?}", args);

    // Create and validate configuration
    let config = Config::from_args(&args);
    config.validate().context("Invalid configuration")?;

    let manifest = load_manifest(&config).context("manifest validation")?;

    let fetcher = RetryingFetcher::new(config.retry_policy()).context("Failed to set up HTTP client")?;
    let assembler = Assembler::new(config, Arc::new(fetcher));

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match assembler.run(&manifest, cancel).await {
        Ok(summary) => {
            report(&summary);
            Ok(())
        }
        Err(e) => {
            error!("Assembly failed: {:#}", e);
            Err(e)
        }
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level {:?}", level);
}

/// Read and validate the manifest from its file or standard input
fn load_manifest(config: &Config) -> Result<AggregateManifest> {
    info!("Reading manifest from {}", config.manifest_label());

    let manifest = match &config.manifest {
        Some(path) => {
            let file = File::open(path).map_err(|e| {
                error!("Failed to open manifest '{}': {}", path.display(), e);
                AssembleError::config_error_with_field(format!("cannot open '{}': {}", path.display(), e), "manifest")
            })?;
            if file.is_terminal() {
                return Err(refuse_terminal().into());
            }
            AggregateManifest::from_reader(BufReader::new(file))?
        }
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                return Err(refuse_terminal().into());
            }
            AggregateManifest::from_reader(stdin.lock())?
        }
    };

    Ok(manifest)
}

fn refuse_terminal() -> AssembleError {
    AssembleError::config_error_with_field(
        "refusing to read the manifest from an interactive terminal; pipe it in or pass --manifest",
        "manifest",
    )
}

/// Cancel the run on Ctrl-C
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    warn!("Interrupted, cancelling outstanding segments");
                    cancel.cancel();
                }
                Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
            },
        }
    });
}

fn report(summary: &RunSummary) {
    info!(
        "Assembled aggregate {} into {} ({} bytes) in {}: {} downloaded ({} bytes), {} already present{}",
        summary.aggregate,
        summary.output.display(),
        summary.total_size,
        format_duration(summary.elapsed),
        summary.execution.downloaded,
        summary.execution.downloaded_bytes,
        summary.execution.already_valid,
        if summary.resumed { ", resumed" } else { "" }
    );
}

//! Assembly orchestration
//!
//! Validates the plan, prepares the output, plans and executes the tasks and
//! reports the outcome of a run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use crate::assemble::counters::RunCounters;
use crate::assemble::executor::{ExecutionSummary, TaskExecutor};
use crate::assemble::task::TaskPlanner;
use crate::assemble::worker::TaskWorker;
use crate::cli::progress::{format_gib, ProgressReporter};
use crate::cli::Config;
use crate::commp::Commitment;
use crate::manifest::{AggregateManifest, AggregationPlan};
use crate::net::PieceSource;
use crate::storage::OutputStore;

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Assembled file
    pub output: PathBuf,
    /// Commitment of the assembled file
    pub aggregate: Commitment,
    /// Size of the assembled file
    pub total_size: u64,
    /// Whether an existing output was reused
    pub resumed: bool,
    /// Task totals
    pub execution: ExecutionSummary,
    /// Wall time of the run
    pub elapsed: Duration,
}

/// Assembles aggregates described by manifests
pub struct Assembler {
    config: Config,
    source: Arc<dyn PieceSource>,
}

impl Assembler {
    /// Create an assembler fetching pieces from `source`
    pub fn new(config: Config, source: Arc<dyn PieceSource>) -> Self {
        Self { config, source }
    }

    /// Assemble the aggregate described by `manifest`
    pub async fn run(&self, manifest: &AggregateManifest, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();

        let plan = AggregationPlan::build(manifest).context("plan mismatch")?;
        let output = self.config.output_path(&manifest.aggregate_commitment);

        let store = OutputStore::prepare(
            &output,
            plan.total_size(),
            self.config.overwrite,
            plan.toc_offset(),
            &plan.toc_bytes(),
        )
        .context("storage preparation")?;
        let resumed = store.resume_candidate();

        let tasks = TaskPlanner::new(self.config.task_order(), resumed)
            .plan(plan.pieces(), plan.toc_offset())
            .context("task planning")?;
        let segments = tasks.iter().filter(|t| !t.is_zero_fill()).count() as u64;

        info!(
            "about to get {} in {} data segments for aggregate {}",
            format_gib(manifest.payload_size()),
            segments,
            manifest.aggregate_commitment
        );
        debug!("Writing to {}", output.display());

        let counters = Arc::new(RunCounters::new(segments));
        let worker = Arc::new(TaskWorker::new(Arc::clone(&self.source), Arc::clone(&counters), resumed));
        let progress = ProgressReporter::start(Arc::clone(&counters), &cancel, self.config.show_progress);

        let executor = TaskExecutor::new(self.config.max_concurrency, self.config.segment_timeout);
        let result = executor.run(tasks, Arc::clone(store.arena()), worker, cancel).await;

        progress.finish().await;
        store.close();

        let execution = result.context("segment processing")?;
        Ok(RunSummary {
            output,
            aggregate: manifest.aggregate_commitment,
            total_size: plan.total_size(),
            resumed,
            execution,
            elapsed: started.elapsed(),
        })
    }
}

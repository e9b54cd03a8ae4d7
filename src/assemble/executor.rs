//! Task executor module
//!
//! Runs the task list under a concurrency ceiling. Every task gets its own
//! deadline; the first fatal error cancels the run, and in-flight tasks are
//! always drained before a result is returned.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::assemble::task::Task;
use crate::assemble::worker::{TaskOutcome, TaskWorker};
use crate::error::AssembleError;
use crate::storage::OutputArena;

/// Default number of tasks running at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Default deadline of a single task
pub const DEFAULT_SEGMENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Totals of a finished run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Zero-fill tasks executed
    pub zero_filled: usize,
    /// Pieces found valid on disk
    pub already_valid: usize,
    /// Pieces downloaded
    pub downloaded: usize,
    /// Bytes downloaded
    pub downloaded_bytes: u64,
}

impl ExecutionSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::ZeroFilled => self.zero_filled += 1,
            TaskOutcome::AlreadyValid => self.already_valid += 1,
            TaskOutcome::Downloaded { bytes } => {
                self.downloaded += 1;
                self.downloaded_bytes += bytes;
            }
        }
    }
}

/// Bounded-concurrency task runner
#[derive(Debug, Clone, Copy)]
pub struct TaskExecutor {
    max_concurrency: usize,
    segment_timeout: Duration,
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY, DEFAULT_SEGMENT_TIMEOUT)
    }
}

impl TaskExecutor {
    /// Create an executor; a ceiling of zero is raised to one
    pub fn new(max_concurrency: usize, segment_timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            segment_timeout,
        }
    }

    /// Run every task, or stop at the first fatal error or cancellation
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        arena: Arc<OutputArena>,
        worker: Arc<TaskWorker>,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary, AssembleError> {
        let total = tasks.len();
        info!(
            "Executing {} tasks, at most {} at a time, {:?} per task",
            total, self.max_concurrency, self.segment_timeout
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let first_error: Arc<OnceLock<AssembleError>> = Arc::new(OnceLock::new());
        let mut join_set = JoinSet::new();
        let mut dispatched = 0usize;

        for task in tasks {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if cancel.is_cancelled() {
                break;
            }

            let mut segment = match arena.claim(task.start_offset, task.length) {
                Ok(segment) => segment,
                Err(e) => {
                    error!("Cannot claim output range for {}: {}", task, e);
                    fail_run(&first_error, &cancel, e);
                    break;
                }
            };

            let worker = Arc::clone(&worker);
            let first_error = Arc::clone(&first_error);
            let run_token = cancel.clone();
            let task_token = cancel.child_token();
            let timeout = self.segment_timeout;
            dispatched += 1;

            join_set.spawn(async move {
                let _permit = permit;
                debug!("Starting {}", task);
                let result = match tokio::time::timeout(timeout, worker.run(&task, &mut segment, &task_token)).await {
                    Ok(result) => result,
                    Err(_) => {
                        task_token.cancel();
                        Err(timeout_error(&task, timeout))
                    }
                };
                drop(segment);

                match &result {
                    Ok(outcome) => debug!("Finished {}: {:?}", task, outcome),
                    Err(e) if e.is_cancelled() => debug!("Abandoned {}: {}", task, e),
                    Err(e) => {
                        error!("Task failed, {}: {}", task, e);
                        fail_run(&first_error, &run_token, e.clone());
                    }
                }
                result
            });
        }

        if dispatched < total {
            warn!("Stopped dispatching after {} of {} tasks", dispatched, total);
        }

        let mut summary = ExecutionSummary::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => summary.record(outcome),
                Ok(Err(_)) => {}
                Err(join_err) => {
                    error!("Task aborted: {}", join_err);
                    fail_run(&first_error, &cancel, AssembleError::task_error(format!("task aborted: {}", join_err)));
                }
            }
        }
        debug!("All in-flight tasks drained");

        if let Some(err) = first_error.get() {
            return Err(err.clone());
        }
        if cancel.is_cancelled() {
            return Err(AssembleError::cancelled(format!(
                "run cancelled after {} of {} tasks were dispatched",
                dispatched, total
            )));
        }

        info!(
            "All {} tasks complete: {} downloaded, {} already valid, {} zero-filled",
            total, summary.downloaded, summary.already_valid, summary.zero_filled
        );
        Ok(summary)
    }
}

/// Record `err` if it is the first failure and cancel the run
fn fail_run(first_error: &OnceLock<AssembleError>, cancel: &CancellationToken, err: AssembleError) {
    if first_error.set(err).is_ok() {
        cancel.cancel();
    }
}

fn timeout_error(task: &Task, timeout: Duration) -> AssembleError {
    let message = format!("timed out after {:?}", timeout);
    match &task.target {
        Some(target) => AssembleError::task_error_full(message, target.url.as_str(), target.commitment.to_string()),
        None => AssembleError::task_error(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::counters::RunCounters;
    use crate::commp::digest;
    use crate::net::stub::MemorySource;
    use crate::storage::OutputStore;
    use url::Url;

    const PIECE: u64 = 1016;

    struct Fixture {
        store: OutputStore,
        source: Arc<MemorySource>,
        tasks: Vec<Task>,
        _dir: tempfile::TempDir,
    }

    fn url(i: usize) -> Url {
        Url::parse(&format!("http://pieces.example/{}", i)).unwrap()
    }

    fn fixture(pieces: usize, source: MemorySource) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let size = PIECE * pieces as u64;
        let store = OutputStore::prepare(&dir.path().join("out.agg"), size, false, size, b"").unwrap();
        let source = Arc::new(source);

        let tasks = (0..pieces)
            .map(|i| {
                let data = vec![i as u8 + 1; 900];
                let commitment = digest(&data).unwrap();
                source.insert(&url(i), data);
                Task::fetch(i as u64 * PIECE, PIECE, commitment, url(i))
            })
            .collect();

        Fixture {
            store,
            source,
            tasks,
            _dir: dir,
        }
    }

    fn worker(f: &Fixture) -> Arc<TaskWorker> {
        Arc::new(TaskWorker::new(f.source.clone(), Arc::new(RunCounters::new(f.tasks.len() as u64)), false))
    }

    #[tokio::test]
    async fn test_runs_all_tasks() {
        let f = fixture(6, MemorySource::new());
        let executor = TaskExecutor::new(3, Duration::from_secs(5));

        let summary = executor
            .run(f.tasks.clone(), f.store.arena().clone(), worker(&f), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.downloaded, 6);
        assert_eq!(summary.downloaded_bytes, 6 * 900);
        assert_eq!(f.source.total_fetches(), 6);
    }

    #[tokio::test]
    async fn test_respects_concurrency_ceiling() {
        let f = fixture(12, MemorySource::new().with_delay(Duration::from_millis(20)));
        let executor = TaskExecutor::new(3, Duration::from_secs(5));

        executor
            .run(f.tasks.clone(), f.store.arena().clone(), worker(&f), CancellationToken::new())
            .await
            .unwrap();
        assert!(f.source.max_active() <= 3, "max active {}", f.source.max_active());
        assert!(f.source.max_active() >= 2);
    }

    #[tokio::test]
    async fn test_first_error_cancels_and_drains() {
        let f = fixture(10, MemorySource::new().with_delay(Duration::from_millis(30)));
        f.source.fail(&url(0), "HTTP error code 404");
        let executor = TaskExecutor::new(2, Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let err = executor
            .run(f.tasks.clone(), f.store.arena().clone(), worker(&f), cancel.clone())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
        assert!(cancel.is_cancelled());
        assert!(f.source.total_fetches() < 10);
        // Every segment was released, so the whole range can be claimed again
        assert!(f.store.arena().claim(0, PIECE * 10).is_ok());
    }

    #[tokio::test]
    async fn test_digest_mismatch_fails_run() {
        let f = fixture(3, MemorySource::new());
        f.source.insert(&url(1), vec![0xabu8; 900]);
        let executor = TaskExecutor::new(1, Duration::from_secs(5));

        let err = executor
            .run(f.tasks.clone(), f.store.arena().clone(), worker(&f), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AssembleError::TaskError { .. }));
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[tokio::test]
    async fn test_task_timeout() {
        let f = fixture(1, MemorySource::new().with_delay(Duration::from_millis(500)));
        let executor = TaskExecutor::new(1, Duration::from_millis(20));

        let err = executor
            .run(f.tasks.clone(), f.store.arena().clone(), worker(&f), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let f = fixture(4, MemorySource::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = TaskExecutor::default()
            .run(f.tasks.clone(), f.store.arena().clone(), worker(&f), cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(f.source.total_fetches(), 0);
    }
}

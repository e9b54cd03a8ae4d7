//! Progress display module
//!
//! Periodically renders the run counters as a single console line.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::assemble::{CounterSnapshot, RunCounters};

const GIB: f64 = (1u64 << 30) as f64;

/// Default refresh interval
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Format bytes as GiB with two decimals
pub fn format_gib(bytes: u64) -> String {
    format!("{:.2}GiB", bytes as f64 / GIB)
}

/// Format duration to human readable string
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Render the progress line for a snapshot
pub fn render_line(snapshot: &CounterSnapshot) -> String {
    format!(
        "Segments total:{} existing:{} downloaded:{} / {}",
        snapshot.total_segments,
        snapshot.existing,
        snapshot.downloaded,
        format_gib(snapshot.downloaded_bytes)
    )
}

/// Background progress line writer
pub struct ProgressReporter;

impl ProgressReporter {
    /// Start reporting; stops when `run_token` fires or the handle is finished
    pub fn start(counters: Arc<RunCounters>, run_token: &CancellationToken, enabled: bool) -> ProgressHandle {
        Self::start_with_interval(counters, run_token, enabled, PROGRESS_INTERVAL)
    }

    /// Start reporting at a custom interval
    pub fn start_with_interval(
        counters: Arc<RunCounters>,
        run_token: &CancellationToken,
        enabled: bool,
        interval: Duration,
    ) -> ProgressHandle {
        let stop = run_token.child_token();
        if !enabled {
            return ProgressHandle { stop, task: None };
        }

        let token = stop.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => print_line(&counters.snapshot(), false),
                }
            }
            print_line(&counters.snapshot(), true);
        });

        ProgressHandle { stop, task: Some(task) }
    }
}

/// Running progress reporter
pub struct ProgressHandle {
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProgressHandle {
    /// Whether a reporter task is running
    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Render the final line and wait for the reporter to exit
    pub async fn finish(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("progress reporter ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn print_line(snapshot: &CounterSnapshot, last: bool) {
    let mut stderr = io::stderr().lock();
    let end = if last { "\n" } else { "\r" };
    // Losing a progress update is harmless
    let _ = write!(stderr, "{}{}", render_line(snapshot), end);
    let _ = stderr.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_gib() {
        assert_eq!(format_gib(0), "0.00GiB");
        assert_eq!(format_gib(1 << 30), "1.00GiB");
        assert_eq!(format_gib(3 << 29), "1.50GiB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_render_line() {
        let snapshot = CounterSnapshot {
            total_segments: 10,
            existing: 3,
            downloaded: 2,
            downloaded_bytes: 1 << 31,
        };
        assert_eq!(render_line(&snapshot), "Segments total:10 existing:3 downloaded:2 / 2.00GiB");
    }

    #[tokio::test]
    async fn test_disabled_reporter_spawns_nothing() {
        let handle = ProgressReporter::start(Arc::new(RunCounters::new(1)), &CancellationToken::new(), false);
        assert!(!handle.is_active());
        handle.finish().await;
    }

    #[tokio::test]
    async fn test_reporter_stops_on_run_cancellation() {
        let run = CancellationToken::new();
        let handle = ProgressReporter::start_with_interval(
            Arc::new(RunCounters::new(2)),
            &run,
            true,
            Duration::from_millis(5),
        );
        assert!(handle.is_active());
        tokio::time::sleep(Duration::from_millis(20)).await;
        run.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle.finish()).await.unwrap();
    }
}

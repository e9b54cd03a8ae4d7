//! Run counters shared between workers and the progress reporter

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of a single run
#[derive(Debug, Default)]
pub struct RunCounters {
    total_segments: AtomicU64,
    existing: AtomicU64,
    downloaded: AtomicU64,
    downloaded_bytes: AtomicU64,
}

/// Point-in-time copy of [`RunCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Fetch tasks in the run
    pub total_segments: u64,
    /// Pieces found valid on disk
    pub existing: u64,
    /// Pieces downloaded
    pub downloaded: u64,
    /// Bytes downloaded
    pub downloaded_bytes: u64,
}

impl RunCounters {
    /// Counters for a run of `total_segments` fetch tasks
    pub fn new(total_segments: u64) -> Self {
        Self {
            total_segments: AtomicU64::new(total_segments),
            ..Self::default()
        }
    }

    /// Record a piece found valid on disk
    pub fn record_existing(&self) {
        self.existing.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a downloaded piece
    pub fn record_downloaded(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_segments: self.total_segments.load(Ordering::Relaxed),
            existing: self.existing.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            downloaded_bytes: self.downloaded_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let counters = RunCounters::new(3);
        counters.record_existing();
        counters.record_downloaded(100);
        counters.record_downloaded(50);

        let snap = counters.snapshot();
        assert_eq!(snap.total_segments, 3);
        assert_eq!(snap.existing, 1);
        assert_eq!(snap.downloaded, 2);
        assert_eq!(snap.downloaded_bytes, 150);
    }

    #[test]
    fn test_counters_across_threads() {
        let counters = Arc::new(RunCounters::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        c.record_downloaded(2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.snapshot().downloaded, 400);
        assert_eq!(counters.snapshot().downloaded_bytes, 800);
    }
}

//! Per-task worker
//!
//! Zero-fills gaps, keeps pieces already valid on disk, and otherwise
//! streams a piece into its segment while hashing it.

use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use crate::assemble::counters::RunCounters;
use crate::assemble::task::{FetchTarget, Task};
use crate::commp::Commitment;
use crate::error::AssembleError;
use crate::net::PieceSource;
use crate::storage::{zero_region, IntegrityChecker, Segment, Verification};

/// What a task ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Range was zeroed
    ZeroFilled,
    /// Bytes on disk already matched the commitment
    AlreadyValid,
    /// Piece was downloaded and verified
    Downloaded { bytes: u64 },
}

/// Executes single tasks against their output segment
pub struct TaskWorker {
    source: Arc<dyn PieceSource>,
    counters: Arc<RunCounters>,
    resume_candidate: bool,
}

impl TaskWorker {
    /// Create a worker
    pub fn new(source: Arc<dyn PieceSource>, counters: Arc<RunCounters>, resume_candidate: bool) -> Self {
        Self {
            source,
            counters,
            resume_candidate,
        }
    }

    /// Run `task`, writing only into `segment`
    pub async fn run(
        &self,
        task: &Task,
        segment: &mut Segment,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, AssembleError> {
        let target = match &task.target {
            Some(target) => target,
            None => {
                zero_region(segment.as_mut_slice());
                trace!("Zero-filled [{}, {})", task.start_offset, task.end());
                return Ok(TaskOutcome::ZeroFilled);
            }
        };

        if self.resume_candidate {
            let verification = verify_existing(target.commitment, segment.as_slice())?;
            if cancel.is_cancelled() {
                return Err(AssembleError::cancelled(format!(
                    "segment at {} cancelled after verification",
                    task.start_offset
                )));
            }
            if verification.is_valid() {
                debug!("Piece {} already valid on disk", target.commitment);
                self.counters.record_existing();
                return Ok(TaskOutcome::AlreadyValid);
            }
            info!("Piece {} on disk does not match, fetching it again", target.commitment);
            zero_region(segment.as_mut_slice());
        }

        let bytes = self.download(target, segment, cancel).await?;
        self.counters.record_downloaded(bytes);
        Ok(TaskOutcome::Downloaded { bytes })
    }

    async fn download(
        &self,
        target: &FetchTarget,
        segment: &mut Segment,
        cancel: &CancellationToken,
    ) -> Result<u64, AssembleError> {
        let url = target.url.as_str();
        let commitment = target.commitment.to_string();

        let mut body = self.source.fetch(&target.url, cancel).await?;
        let declared = body.content_length();
        if let Some(len) = declared.filter(|&len| len > segment.len() as u64) {
            return Err(AssembleError::task_error_full(
                format!("source announces {} bytes for a {} byte segment", len, segment.len()),
                url,
                commitment,
            ));
        }

        let mut checker = IntegrityChecker::new(target.commitment);
        let dest = segment.as_mut_slice();
        let mut written = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(AssembleError::cancelled(format!("download of {} cancelled", url)));
                }
                chunk = body.next_chunk() => chunk.map_err(|e| {
                    AssembleError::task_error_full(format!("reading body failed: {}", e), url, commitment.clone())
                })?,
            };
            let Some(chunk) = chunk else { break };

            let end = written + chunk.len();
            if end > dest.len() {
                return Err(AssembleError::task_error_full(
                    format!("body exceeds the {} byte segment", dest.len()),
                    url,
                    commitment,
                ));
            }
            dest[written..end].copy_from_slice(&chunk);
            checker.update(&chunk);
            written = end;
        }

        if let Some(len) = declared.filter(|&len| (written as u64) < len) {
            return Err(AssembleError::task_error_full(
                format!("body ended after {} of {} announced bytes", written, len),
                url,
                commitment,
            ));
        }

        let verification = checker.finish()?;
        if !verification.is_valid() {
            return Err(AssembleError::task_error_full(
                format!("digest mismatch: computed {}", verification.computed),
                url,
                commitment,
            ));
        }

        debug!("Downloaded and verified {} ({} bytes)", target.commitment, written);
        Ok(written as u64)
    }
}

/// Hash bytes already on disk without stalling the runtime's other tasks
fn verify_existing(commitment: Commitment, data: &[u8]) -> Result<Verification, AssembleError> {
    let multi_thread = Handle::try_current()
        .map(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread)
        .unwrap_or(false);
    if multi_thread {
        tokio::task::block_in_place(|| IntegrityChecker::verify(commitment, data))
    } else {
        IntegrityChecker::verify(commitment, data)
    }
}

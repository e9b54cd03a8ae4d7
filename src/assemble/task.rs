//! Task planning module
//!
//! Turns a verified aggregation plan into the list of byte ranges the
//! executor works through.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};
use url::Url;
use crate::commp::Commitment;
use crate::error::AssembleError;
use crate::manifest::PlannedPiece;

/// Piece a task downloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// Expected commitment of the bytes
    pub commitment: Commitment,
    /// Where to get them
    pub url: Url,
}

/// One unit of work: a byte range of the output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Absolute offset in the output file
    pub start_offset: u64,
    /// Number of bytes covered
    pub length: u64,
    /// Piece to download, `None` for zero-fill
    pub target: Option<FetchTarget>,
}

impl Task {
    /// Create a fetch task
    pub fn fetch(start_offset: u64, length: u64, commitment: Commitment, url: Url) -> Self {
        Self {
            start_offset,
            length,
            target: Some(FetchTarget { commitment, url }),
        }
    }

    /// Create a zero-fill task
    pub fn zero_fill(start_offset: u64, length: u64) -> Self {
        Self {
            start_offset,
            length,
            target: None,
        }
    }

    /// Whether the task only writes zeroes
    pub fn is_zero_fill(&self) -> bool {
        self.target.is_none()
    }

    /// First byte past the range
    pub fn end(&self) -> u64 {
        self.start_offset + self.length
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            Some(target) => write!(
                f,
                "piece {} [{}, {}) from {}",
                target.commitment,
                self.start_offset,
                self.end(),
                target.url
            ),
            None => write!(f, "zero-fill [{}, {})", self.start_offset, self.end()),
        }
    }
}

/// Order in which tasks are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskOrder {
    /// Ascending length, ties in layout order
    BySize,
    /// Uniform random shuffle
    #[default]
    Shuffled,
}

impl TaskOrder {
    /// Reorder `tasks` in place
    pub fn apply(self, tasks: &mut [Task]) {
        self.apply_with_rng(tasks, &mut rand::thread_rng());
    }

    /// Reorder `tasks` in place using the given random source
    pub fn apply_with_rng<R: Rng + ?Sized>(self, tasks: &mut [Task], rng: &mut R) {
        match self {
            TaskOrder::BySize => tasks.sort_by_key(|t| t.length),
            TaskOrder::Shuffled => tasks.shuffle(rng),
        }
    }
}

/// Builds the task list for a run
#[derive(Debug, Clone, Copy)]
pub struct TaskPlanner {
    order: TaskOrder,
    resume_candidate: bool,
}

impl TaskPlanner {
    /// Create a planner
    ///
    /// Gaps between pieces are only emitted when the output may hold
    /// stale bytes from an earlier run.
    pub fn new(order: TaskOrder, resume_candidate: bool) -> Self {
        Self {
            order,
            resume_candidate,
        }
    }

    /// Plan tasks covering `[0, toc_offset)`
    pub fn plan(&self, pieces: &[PlannedPiece], toc_offset: u64) -> Result<Vec<Task>, AssembleError> {
        let mut tasks = Vec::with_capacity(pieces.len() * 2 + 1);
        let mut cursor = 0u64;

        for piece in pieces {
            if piece.offset < cursor {
                return Err(AssembleError::validation_error(format!(
                    "piece {} at offset {} overlaps previous range ending at {}",
                    piece.commitment, piece.offset, cursor
                )));
            }
            if piece.offset > cursor && self.resume_candidate {
                tasks.push(Task::zero_fill(cursor, piece.offset - cursor));
            }
            tasks.push(Task::fetch(piece.offset, piece.size, piece.commitment, piece.source.clone()));
            cursor = piece.end();
        }

        if cursor > toc_offset {
            return Err(AssembleError::validation_error(format!(
                "pieces end at {} past the table of contents at {}",
                cursor, toc_offset
            )));
        }
        if cursor < toc_offset {
            tasks.push(Task::zero_fill(cursor, toc_offset - cursor));
        }

        let zero_fills = tasks.iter().filter(|t| t.is_zero_fill()).count();
        info!(
            "Planned {} tasks ({} fetch, {} zero-fill), order {:?}",
            tasks.len(),
            tasks.len() - zero_fills,
            zero_fills,
            self.order
        );

        self.order.apply(&mut tasks);
        for task in &tasks {
            debug!("Task: {}", task);
        }
        Ok(tasks)
    }
}

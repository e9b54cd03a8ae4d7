//! aggregate-assembler
//!
//! Reconstructs an aggregate file from a manifest of pieces, fetching every
//! piece over HTTP, verifying it against its commitment and writing it at its
//! offset in a memory-mapped output.

pub mod commp;
pub mod manifest;
pub mod storage;
pub mod net;
pub mod assemble;
pub mod cli;
pub mod error;

pub use error::AssembleError;

pub use commp::{digest, Aggregate, Commitment, CommitmentHasher};
pub use manifest::{AggregateManifest, AggregationPlan, PieceEntry, PlannedPiece};
pub use storage::{IntegrityChecker, OutputStore, ZeroFiller};
pub use net::{PieceBody, PieceSource, RetryPolicy, RetryingFetcher};
pub use assemble::{
    Assembler, ExecutionSummary, RunCounters, RunSummary, Task, TaskExecutor, TaskOrder, TaskPlanner, TaskWorker,
};
pub use cli::{CliArgs, Command, Config, ProgressReporter};

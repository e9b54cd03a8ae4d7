//! Assembly module
//!
//! Task planning, per-task verification, bounded execution and the
//! orchestration of a whole run.

pub mod task;
pub mod counters;
pub mod worker;
pub mod executor;
pub mod assembler;

pub use task::{FetchTarget, Task, TaskOrder, TaskPlanner};
pub use counters::{CounterSnapshot, RunCounters};
pub use worker::{TaskOutcome, TaskWorker};
pub use executor::{ExecutionSummary, TaskExecutor, DEFAULT_MAX_CONCURRENCY, DEFAULT_SEGMENT_TIMEOUT};
pub use assembler::{Assembler, RunSummary};

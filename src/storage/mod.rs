//! Storage module
//!
//! Handles the memory-mapped output file, zero filling and integrity checks.

pub mod zero;
pub mod integrity;
pub mod output;

pub use zero::{zero_region, ZeroFiller};
pub use integrity::{IntegrityChecker, Verification};
pub use output::{OutputArena, OutputStore, Segment};

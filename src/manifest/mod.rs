//! Manifest module
//!
//! Manifest decoding and the aggregation plan derived from it.

pub mod parser;
pub mod plan;

pub use parser::{AggregateManifest, PieceEntry};
pub use plan::{AggregationPlan, PlannedPiece};

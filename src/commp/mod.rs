//! Commitment module
//!
//! Piece commitments, the streaming commitment hasher and the aggregate
//! layout that places pieces and the table of contents inside a deal.

pub mod commitment;
pub mod hasher;
pub mod aggregate;

pub use commitment::{unpadded, Commitment, MIN_PADDED_SIZE};
pub use hasher::{digest, CommitmentHasher, MIN_HASH_INPUT};
pub use aggregate::{Aggregate, IndexEntry};

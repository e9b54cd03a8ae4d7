//! Aggregation plan module
//!
//! Derives piece offsets and the table of contents from a manifest and
//! checks the result against the manifest's declared aggregate commitment.

use tracing::{debug, error, info};
use url::Url;
use crate::commp::{Aggregate, Commitment};
use crate::error::AssembleError;
use crate::manifest::parser::AggregateManifest;

/// A piece at its final position in the output file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPiece {
    /// Expected commitment
    pub commitment: Commitment,
    /// Source location
    pub source: Url,
    /// Byte offset in the output file
    pub offset: u64,
    /// Number of output bytes reserved for the piece
    pub size: u64,
}

impl PlannedPiece {
    /// First byte past the piece
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Output layout computed from a manifest
#[derive(Debug, Clone)]
pub struct AggregationPlan {
    aggregate: Aggregate,
    pieces: Vec<PlannedPiece>,
}

impl AggregationPlan {
    /// Build the plan and verify it reproduces the declared aggregate commitment
    pub fn build(manifest: &AggregateManifest) -> Result<Self, AssembleError> {
        let expected = manifest.aggregate_commitment;
        let commitments: Vec<Commitment> = manifest.pieces.iter().map(|p| p.commitment).collect();

        let aggregate = Aggregate::new(expected.padded_size(), &commitments)?;
        let computed = aggregate.commitment()?;
        if computed != expected {
            error!("Aggregate commitment mismatch: expected {}, computed {}", expected, computed);
            return Err(AssembleError::manifest_error(format!(
                "supplied list of {} pieces does not aggregate to the expected commitment {}, got {} instead",
                manifest.pieces.len(),
                expected,
                computed
            )));
        }

        let pieces = aggregate
            .entries()
            .iter()
            .zip(&manifest.pieces)
            .map(|(entry, piece)| PlannedPiece {
                commitment: piece.commitment,
                source: piece.source.clone(),
                offset: entry.file_offset(),
                size: entry.file_size(),
            })
            .collect::<Vec<_>>();

        for piece in &pieces {
            debug!("Piece {} planned at [{}, {})", piece.commitment, piece.offset, piece.end());
        }
        info!(
            "Aggregation plan verified: {} pieces, output {} bytes, table of contents at {}",
            pieces.len(),
            aggregate.file_size(),
            aggregate.toc_offset()
        );

        Ok(Self { aggregate, pieces })
    }

    /// Pieces in ascending offset order
    pub fn pieces(&self) -> &[PlannedPiece] {
        &self.pieces
    }

    /// Size of the output file
    pub fn total_size(&self) -> u64 {
        self.aggregate.file_size()
    }

    /// Offset of the table of contents in the output file
    pub fn toc_offset(&self) -> u64 {
        self.aggregate.toc_offset()
    }

    /// Encoded table of contents
    pub fn toc_bytes(&self) -> Vec<u8> {
        self.aggregate.toc_bytes()
    }

    /// Commitment of the assembled output
    pub fn commitment(&self) -> Result<Commitment, AssembleError> {
        self.aggregate.commitment()
    }
}

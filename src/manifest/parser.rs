//! Manifest parser module
//!
//! Decodes and validates aggregate manifests.

use std::io::Read;
use serde::Deserialize;
use tracing::{debug, error, info};
use url::Url;
use crate::commp::Commitment;
use crate::error::AssembleError;

/// Manifest document as it appears on the wire
#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(alias = "frc58_aggregate", default)]
    aggregate_commitment: Option<Commitment>,
    #[serde(default)]
    piece_list: Vec<RawPiece>,
}

#[derive(Debug, Deserialize)]
struct RawPiece {
    #[serde(alias = "pcid_v2")]
    piece_commitment: Commitment,
    #[serde(default)]
    sources: Vec<Url>,
}

/// A piece of the aggregate and where to fetch it from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceEntry {
    /// Expected commitment of the piece data
    pub commitment: Commitment,
    /// Single source location
    pub source: Url,
}

/// Validated aggregate manifest
#[derive(Debug, Clone)]
pub struct AggregateManifest {
    /// Declared commitment of the whole aggregate
    pub aggregate_commitment: Commitment,
    /// Pieces in manifest order
    pub pieces: Vec<PieceEntry>,
}

impl AggregateManifest {
    /// Parse and validate a manifest from a reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, AssembleError> {
        let raw: RawManifest = serde_json::from_reader(reader).map_err(|e| {
            error!("Failed to decode manifest: {}", e);
            AssembleError::from(e)
        })?;
        Self::validate(raw)
    }

    /// Parse and validate a manifest from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, AssembleError> {
        debug!("Parsing manifest of {} bytes", data.len());
        let raw: RawManifest = serde_json::from_slice(data)?;
        Self::validate(raw)
    }

    fn validate(raw: RawManifest) -> Result<Self, AssembleError> {
        let aggregate_commitment = raw.aggregate_commitment.ok_or_else(|| {
            AssembleError::manifest_error("manifest must specify an `aggregate_commitment`")
        })?;

        let mut pieces = Vec::with_capacity(raw.piece_list.len());
        for piece in raw.piece_list {
            if piece.sources.len() != 1 {
                return Err(AssembleError::manifest_error(format!(
                    "exactly one source is supported per piece, yet {} has {}",
                    piece.piece_commitment,
                    piece.sources.len()
                )));
            }
            let source = piece.sources.into_iter().next().ok_or_else(|| {
                AssembleError::manifest_error(format!("piece {} has no source", piece.piece_commitment))
            })?;
            pieces.push(PieceEntry {
                commitment: piece.piece_commitment,
                source,
            });
        }

        info!("Manifest lists {} pieces for aggregate {}", pieces.len(), aggregate_commitment);
        Ok(Self {
            aggregate_commitment,
            pieces,
        })
    }

    /// Total payload bytes reserved for pieces
    pub fn payload_size(&self) -> u64 {
        self.pieces.iter().map(|p| p.commitment.unpadded_size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(seed: u8) -> String {
        format!("1024-{}", hex::encode([seed; 32]))
    }

    #[test]
    fn test_parse_valid_manifest() {
        let json = format!(
            r#"{{"aggregate_commitment":"{}","piece_list":[
                {{"piece_commitment":"{}","sources":["http://a.example/p1"]}},
                {{"piece_commitment":"{}","sources":["http://b.example/p2"]}}]}}"#,
            format!("65536-{}", hex::encode([9u8; 32])),
            commitment(1),
            commitment(2)
        );
        let manifest = AggregateManifest::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(manifest.aggregate_commitment.padded_size(), 65536);
        assert_eq!(manifest.pieces.len(), 2);
        assert_eq!(manifest.pieces[1].source.as_str(), "http://b.example/p2");
        assert_eq!(manifest.payload_size(), 2 * 1016);
    }

    #[test]
    fn test_parse_legacy_field_names() {
        let json = format!(
            r#"{{"frc58_aggregate":"{}","piece_list":[{{"pcid_v2":"{}","sources":["http://a.example/p1"]}}]}}"#,
            format!("65536-{}", hex::encode([9u8; 32])),
            commitment(1)
        );
        let manifest = AggregateManifest::from_reader(json.as_bytes()).unwrap();
        assert_eq!(manifest.pieces.len(), 1);
    }

    #[test]
    fn test_missing_aggregate_commitment() {
        let json = format!(
            r#"{{"piece_list":[{{"piece_commitment":"{}","sources":["http://a.example/p1"]}}]}}"#,
            commitment(1)
        );
        let err = AggregateManifest::from_bytes(json.as_bytes()).unwrap_err();
        assert!(matches!(err, AssembleError::ManifestError { .. }));
        assert!(err.to_string().contains("aggregate_commitment"));
    }

    #[test]
    fn test_rejects_zero_or_multiple_sources() {
        for sources in [r#"[]"#, r#"["http://a.example/1","http://b.example/1"]"#] {
            let json = format!(
                r#"{{"aggregate_commitment":"{}","piece_list":[{{"piece_commitment":"{}","sources":{}}}]}}"#,
                format!("65536-{}", hex::encode([9u8; 32])),
                commitment(1),
                sources
            );
            let err = AggregateManifest::from_bytes(json.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("exactly one source"));
        }
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = AggregateManifest::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, AssembleError::ManifestError { .. }));
    }

    #[test]
    fn test_rejects_bad_commitment() {
        let json = r#"{"aggregate_commitment":"1000-00","piece_list":[]}"#;
        assert!(AggregateManifest::from_bytes(json.as_bytes()).is_err());
    }
}

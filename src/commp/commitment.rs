//! Piece commitment identifiers
//!
//! A commitment names a piece by the root of its digest tree together with
//! the padded size that tree was built over.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::AssembleError;

/// Size of a single tree node in bytes
pub const NODE_SIZE: u64 = 32;

/// Smallest padded piece size (one expanded 127-byte chunk)
pub const MIN_PADDED_SIZE: u64 = 128;

/// Convert a padded size or offset into file (unpadded) coordinates
pub fn unpadded(padded: u64) -> u64 {
    padded - padded / 128
}

/// Commitment to the contents of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Commitment {
    padded_size: u64,
    digest: [u8; 32],
}

impl Commitment {
    /// Create a commitment, checking that the padded size is a valid tree size
    pub fn new(padded_size: u64, digest: [u8; 32]) -> Result<Self, AssembleError> {
        if padded_size < MIN_PADDED_SIZE || !padded_size.is_power_of_two() {
            return Err(AssembleError::validation_error_with_field(
                format!("padded size {} is not a power of two of at least {}", padded_size, MIN_PADDED_SIZE),
                "padded_size",
            ));
        }
        Ok(Self { padded_size, digest })
    }

    /// Padded size of the piece tree
    pub fn padded_size(&self) -> u64 {
        self.padded_size
    }

    /// Number of file bytes the piece occupies inside an aggregate
    pub fn unpadded_size(&self) -> u64 {
        unpadded(self.padded_size)
    }

    /// Root digest
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Root digest as lowercase hex
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.padded_size, hex::encode(self.digest))
    }
}

impl FromStr for Commitment {
    type Err = AssembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (size, digest) = s.split_once('-').ok_or_else(|| {
            AssembleError::validation_error(format!("commitment '{}' is not of the form <padded_size>-<hex digest>", s))
        })?;

        let padded_size = size.parse::<u64>().map_err(|e| {
            AssembleError::validation_error_with_field(format!("invalid padded size '{}': {}", size, e), "padded_size")
        })?;

        let bytes = hex::decode(digest).map_err(|e| {
            AssembleError::validation_error_with_field(format!("invalid digest '{}': {}", digest, e), "digest")
        })?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            AssembleError::validation_error_with_field(format!("digest must be 32 bytes, got {}", b.len()), "digest")
        })?;

        Commitment::new(padded_size, digest)
    }
}

impl TryFrom<String> for Commitment {
    type Error = AssembleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Commitment> for String {
    fn from(value: Commitment) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpadded() {
        assert_eq!(unpadded(128), 127);
        assert_eq!(unpadded(1 << 20), (1 << 20) / 128 * 127);
        assert_eq!(unpadded(256), 254);
    }

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert!(Commitment::new(64, [0u8; 32]).is_err());
        assert!(Commitment::new(384, [0u8; 32]).is_err());
        assert!(Commitment::new(128, [0u8; 32]).is_ok());
    }

    #[test]
    fn test_display_and_parse() {
        let c = Commitment::new(2048, [0xab; 32]).unwrap();
        let s = c.to_string();
        assert!(s.starts_with("2048-abab"));
        let parsed: Commitment = s.parse().unwrap();
        assert_eq!(parsed, c);
        assert_eq!(parsed.unpadded_size(), 2032);
    }

    #[test]
    fn test_parse_errors() {
        assert!("nodash".parse::<Commitment>().is_err());
        assert!("abc-00".parse::<Commitment>().is_err());
        assert!("128-zz".parse::<Commitment>().is_err());
        assert!("128-abcd".parse::<Commitment>().is_err());
    }

    #[test]
    fn test_serde_string_form() {
        let c = Commitment::new(128, [1u8; 32]).unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, format!("\"128-{}\"", "01".repeat(32)));
        let back: Commitment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);

        assert!(serde_json::from_str::<Commitment>("\"100-00\"").is_err());
    }
}

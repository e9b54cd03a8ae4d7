//! Integrity checking module
//!
//! Verifies piece bytes against their expected commitment.

use tracing::{debug, warn};
use crate::commp::{Commitment, CommitmentHasher, MIN_HASH_INPUT};
use crate::error::AssembleError;

/// Outcome of a commitment check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// Commitment the bytes should have
    pub expected: Commitment,
    /// Commitment the bytes actually have
    pub computed: Commitment,
}

impl Verification {
    /// Whether the computed digest equals the expected one
    pub fn is_valid(&self) -> bool {
        self.computed.digest() == self.expected.digest()
    }
}

/// Streams bytes into the commitment hasher and compares the result
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    expected: Commitment,
    hasher: CommitmentHasher,
}

impl IntegrityChecker {
    /// Create a checker for the expected commitment
    pub fn new(expected: Commitment) -> Self {
        Self {
            expected,
            hasher: CommitmentHasher::new(),
        }
    }

    /// Feed bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Number of bytes fed so far
    pub fn bytes_checked(&self) -> u64 {
        self.hasher.bytes_written()
    }

    /// Finish hashing, short-padding the input to the hasher's minimum
    pub fn finish(mut self) -> Result<Verification, AssembleError> {
        let fed = self.hasher.bytes_written();
        if let Some(short) = (MIN_HASH_INPUT as u64).checked_sub(fed).filter(|&n| n > 0) {
            debug!("Padding {} byte input with {} zero bytes for hashing", fed, short);
            self.hasher.update(&vec![0u8; short as usize]);
        }

        let computed = self.hasher.finish()?;
        let verification = Verification {
            expected: self.expected,
            computed,
        };
        if !verification.is_valid() {
            warn!("Commitment mismatch: expected {}, computed {}", self.expected, computed);
        }
        Ok(verification)
    }

    /// Check a complete buffer in one call
    pub fn verify(expected: Commitment, data: &[u8]) -> Result<Verification, AssembleError> {
        let mut checker = Self::new(expected);
        checker.update(data);
        checker.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commp::digest;

    #[test]
    fn test_verify_matching_bytes() {
        let data = vec![7u8; 500];
        let expected = digest(&data).unwrap();
        let v = IntegrityChecker::verify(expected, &data).unwrap();
        assert!(v.is_valid());
        assert_eq!(v.computed, expected);
    }

    #[test]
    fn test_verify_mismatch() {
        let expected = digest(&vec![7u8; 500]).unwrap();
        let v = IntegrityChecker::verify(expected, &vec![8u8; 500]).unwrap();
        assert!(!v.is_valid());
    }

    #[test]
    fn test_short_input_is_padded() {
        let data = b"tiny piece".to_vec();
        let mut padded = data.clone();
        padded.resize(MIN_HASH_INPUT, 0);
        let expected = digest(&padded).unwrap();

        let mut checker = IntegrityChecker::new(expected);
        checker.update(&data);
        assert_eq!(checker.bytes_checked(), data.len() as u64);
        assert!(checker.finish().unwrap().is_valid());
    }

    #[test]
    fn test_trailing_zeros_in_segment_still_match() {
        let data = vec![3u8; 300];
        let expected = digest(&data).unwrap();
        let mut segment = data.clone();
        segment.resize(expected.unpadded_size() as usize, 0);
        assert!(IntegrityChecker::verify(expected, &segment).unwrap().is_valid());
    }
}

//! Zero filling of output ranges

use std::sync::OnceLock;

/// Size of the shared zero buffer
pub const ZERO_BUFFER_SIZE: usize = 32 << 20;

/// Fills byte ranges with zeros from one lazily allocated shared buffer
#[derive(Debug, Clone, Copy)]
pub struct ZeroFiller {
    zeroes: &'static [u8],
}

impl ZeroFiller {
    /// Get the process-wide filler
    pub fn shared() -> Self {
        static ZEROES: OnceLock<Box<[u8]>> = OnceLock::new();
        let zeroes = ZEROES.get_or_init(|| vec![0u8; ZERO_BUFFER_SIZE].into_boxed_slice());
        Self { zeroes }
    }

    /// Overwrite every byte of `target` with zero
    pub fn fill(&self, target: &mut [u8]) {
        for chunk in target.chunks_mut(self.zeroes.len()) {
            chunk.copy_from_slice(&self.zeroes[..chunk.len()]);
        }
    }
}

/// Zero a range using the shared filler
pub fn zero_region(target: &mut [u8]) {
    ZeroFiller::shared().fill(target);
}

//! Streaming commitment hasher
//!
//! Builds a binary SHA-256 tree over the padded form of the input: every
//! 127-byte chunk is expanded to 128 bytes with a trailing zero byte and
//! split into four 32-byte leaves. The tree is completed with all-zero
//! subtrees up to the next power-of-two leaf count, so appending zero bytes
//! up to the padded size never changes the resulting commitment.

use std::sync::OnceLock;
use sha2::{Digest, Sha256};
use tracing::trace;
use crate::commp::commitment::{Commitment, NODE_SIZE};
use crate::error::AssembleError;

/// Minimum number of input bytes the hasher accepts
pub const MIN_HASH_INPUT: usize = 127;

const CHUNK_SIZE: usize = 127;
const LEAVES_PER_CHUNK: u64 = 4;
const MAX_LEVELS: usize = 64;

/// A tree node
pub type Node = [u8; 32];

/// Hash two sibling nodes into their parent
pub fn hash_pair(left: &Node, right: &Node) -> Node {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Root of an all-zero subtree spanning `2^level` leaves
pub fn zero_subtree(level: usize) -> &'static Node {
    static ZERO_ROOTS: OnceLock<Vec<Node>> = OnceLock::new();
    let roots = ZERO_ROOTS.get_or_init(|| {
        let mut roots = Vec::with_capacity(MAX_LEVELS);
        roots.push([0u8; 32]);
        for level in 1..MAX_LEVELS {
            let below = roots[level - 1];
            roots.push(hash_pair(&below, &below));
        }
        roots
    });
    &roots[level.min(MAX_LEVELS - 1)]
}

/// Incremental commitment calculator
#[derive(Debug, Clone, Default)]
pub struct CommitmentHasher {
    /// Bytes of an incomplete chunk
    pending: Vec<u8>,
    /// Completed subtrees by level, left-most data first
    stack: Vec<Option<Node>>,
    chunks: u64,
    total: u64,
}

impl CommitmentHasher {
    /// Create an empty hasher
    pub fn new() -> Self {
        Self {
            pending: Vec::with_capacity(CHUNK_SIZE),
            ..Default::default()
        }
    }

    /// Feed more input
    pub fn update(&mut self, mut data: &[u8]) {
        self.total += data.len() as u64;

        if !self.pending.is_empty() {
            let take = (CHUNK_SIZE - self.pending.len()).min(data.len());
            self.pending.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.pending.len() == CHUNK_SIZE {
                let chunk = std::mem::take(&mut self.pending);
                self.absorb_chunk(&chunk);
            }
        }

        let mut chunks = data.chunks_exact(CHUNK_SIZE);
        for chunk in &mut chunks {
            self.absorb_chunk(chunk);
        }
        self.pending.extend_from_slice(chunks.remainder());
    }

    /// Number of input bytes fed so far
    pub fn bytes_written(&self) -> u64 {
        self.total
    }

    fn absorb_chunk(&mut self, chunk: &[u8]) {
        let mut expanded = [0u8; CHUNK_SIZE + 1];
        expanded[..chunk.len()].copy_from_slice(chunk);
        for leaf in expanded.chunks_exact(NODE_SIZE as usize) {
            let mut node = [0u8; 32];
            node.copy_from_slice(leaf);
            self.push_node(node, 0);
        }
        self.chunks += 1;
    }

    fn push_node(&mut self, mut node: Node, mut level: usize) {
        loop {
            if self.stack.len() <= level {
                self.stack.resize(level + 1, None);
            }
            match self.stack[level].take() {
                Some(left) => {
                    node = hash_pair(&left, &node);
                    level += 1;
                }
                None => {
                    self.stack[level] = Some(node);
                    return;
                }
            }
        }
    }

    /// Complete the tree and return the commitment
    pub fn finish(mut self) -> Result<Commitment, AssembleError> {
        if self.total < MIN_HASH_INPUT as u64 {
            return Err(AssembleError::validation_error(format!(
                "insufficient data for a commitment: {} bytes, at least {} required",
                self.total, MIN_HASH_INPUT
            )));
        }

        if !self.pending.is_empty() {
            let chunk = std::mem::take(&mut self.pending);
            self.absorb_chunk(&chunk);
        }

        let leaves = (self.chunks * LEAVES_PER_CHUNK).next_power_of_two();
        let height = leaves.trailing_zeros() as usize;
        trace!("Completing commitment tree: {} chunks, {} leaves, height {}", self.chunks, leaves, height);

        let mut acc: Option<Node> = None;
        for level in 0..height {
            let left = self.stack.get(level).copied().flatten();
            acc = match (left, acc) {
                (Some(l), Some(a)) => Some(hash_pair(&l, &a)),
                (Some(l), None) => Some(hash_pair(&l, zero_subtree(level))),
                (None, Some(a)) => Some(hash_pair(&a, zero_subtree(level))),
                (None, None) => None,
            };
        }

        // A full tree leaves its root alone at the top level
        let root = match acc {
            Some(root) => root,
            None => self.stack.get(height).copied().flatten().ok_or_else(|| {
                AssembleError::validation_error("commitment tree has no root")
            })?,
        };

        Commitment::new(leaves * NODE_SIZE, root)
    }
}

/// Commitment of an in-memory buffer
pub fn digest(data: &[u8]) -> Result<Commitment, AssembleError> {
    let mut hasher = CommitmentHasher::new();
    hasher.update(data);
    hasher.finish()
}

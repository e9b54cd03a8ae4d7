//! Aggregate layout
//!
//! Places piece trees inside a deal-sized tree, each aligned to its own
//! padded size, and reserves the tail of the deal for a table of contents
//! (the index). The aggregate commitment is computed from the piece roots
//! alone, without access to piece data.

use tracing::debug;
use crate::commp::commitment::{unpadded, Commitment, NODE_SIZE};
use crate::commp::hasher::{hash_pair, zero_subtree, CommitmentHasher, Node};
use crate::error::AssembleError;

/// Padded bytes reserved per index entry
pub const INDEX_ENTRY_PADDED_SIZE: u64 = 64;

/// Encoded size of one index entry: digest, padded offset, padded size
pub const INDEX_ENTRY_SIZE: usize = 48;

/// Number of index entries a deal of the given padded size reserves room for
pub fn max_index_entries(deal_size: u64) -> u64 {
    let bits = 64 - deal_size.leading_zeros();
    let entries = 1u64 << (bits / 2).saturating_sub(4);
    entries.max(4)
}

/// Padded size of the index region
pub fn index_size(deal_size: u64) -> u64 {
    max_index_entries(deal_size) * INDEX_ENTRY_PADDED_SIZE
}

/// Padded offset at which the index region starts
pub fn index_start_offset(deal_size: u64) -> u64 {
    deal_size - index_size(deal_size)
}

/// A piece placed inside the aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Piece commitment
    pub commitment: Commitment,
    /// Padded offset of the piece tree inside the deal tree
    pub offset: u64,
}

impl IndexEntry {
    /// Padded size of the piece
    pub fn size(&self) -> u64 {
        self.commitment.padded_size()
    }

    /// Byte offset of the piece in the output file
    pub fn file_offset(&self) -> u64 {
        unpadded(self.offset)
    }

    /// Number of output file bytes reserved for the piece
    pub fn file_size(&self) -> u64 {
        self.commitment.unpadded_size()
    }

    fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut out = [0u8; INDEX_ENTRY_SIZE];
        out[..32].copy_from_slice(self.commitment.digest());
        out[32..40].copy_from_slice(&self.offset.to_le_bytes());
        out[40..48].copy_from_slice(&self.size().to_le_bytes());
        out
    }
}

/// Layout of pieces in a deal
#[derive(Debug, Clone)]
pub struct Aggregate {
    deal_size: u64,
    entries: Vec<IndexEntry>,
}

impl Aggregate {
    /// Lay out `pieces` in order inside a deal of `deal_size` padded bytes
    pub fn new(deal_size: u64, pieces: &[Commitment]) -> Result<Self, AssembleError> {
        if !deal_size.is_power_of_two() || deal_size <= index_size(deal_size) {
            return Err(AssembleError::manifest_error(format!(
                "deal size {} cannot hold an index of {} bytes",
                deal_size,
                index_size(deal_size)
            )));
        }

        let capacity = max_index_entries(deal_size);
        if pieces.len() as u64 > capacity {
            return Err(AssembleError::manifest_error(format!(
                "{} pieces exceed the index capacity of {} for a deal of {} bytes",
                pieces.len(),
                capacity,
                deal_size
            )));
        }

        let limit = index_start_offset(deal_size);
        let mut cursor = 0u64;
        let mut entries = Vec::with_capacity(pieces.len());
        for commitment in pieces {
            let size = commitment.padded_size();
            let offset = cursor.next_multiple_of(size);
            cursor = offset + size;
            if cursor > limit {
                return Err(AssembleError::manifest_error(format!(
                    "piece {} at offset {} overflows the data region of {} bytes",
                    commitment, offset, limit
                )));
            }
            entries.push(IndexEntry {
                commitment: *commitment,
                offset,
            });
        }

        debug!("Laid out {} pieces in a deal of {} bytes", entries.len(), deal_size);
        Ok(Self { deal_size, entries })
    }

    /// Padded deal size
    pub fn deal_size(&self) -> u64 {
        self.deal_size
    }

    /// Size of the output file
    pub fn file_size(&self) -> u64 {
        unpadded(self.deal_size)
    }

    /// Placed pieces, in ascending offset order
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Byte offset of the table of contents in the output file
    pub fn toc_offset(&self) -> u64 {
        unpadded(index_start_offset(self.deal_size))
    }

    /// Encoded table of contents
    pub fn toc_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.entries.len() * INDEX_ENTRY_SIZE);
        for entry in &self.entries {
            out.extend_from_slice(&entry.encode());
        }
        out
    }

    fn toc_root(&self) -> Result<Node, AssembleError> {
        let region = unpadded(index_size(self.deal_size)) as usize;
        let mut toc = self.toc_bytes();
        toc.resize(region, 0);

        let mut hasher = CommitmentHasher::new();
        hasher.update(&toc);
        Ok(*hasher.finish()?.digest())
    }

    /// Commitment of the whole assembled output
    pub fn commitment(&self) -> Result<Commitment, AssembleError> {
        let mut nodes: Vec<(u64, u64, Node)> = self
            .entries
            .iter()
            .map(|e| (e.offset, e.size(), *e.commitment.digest()))
            .collect();
        nodes.push((index_start_offset(self.deal_size), index_size(self.deal_size), self.toc_root()?));
        nodes.sort_by_key(|n| n.0);

        let root = subtree_root(0, self.deal_size, &nodes);
        Commitment::new(self.deal_size, root)
    }
}

/// Root of the subtree covering padded `[start, start + size)`, given the
/// known subtrees that fall inside it; everything else is zero.
fn subtree_root(start: u64, size: u64, nodes: &[(u64, u64, Node)]) -> Node {
    if nodes.is_empty() {
        let level = (size / NODE_SIZE).trailing_zeros() as usize;
        return *zero_subtree(level);
    }
    if nodes.len() == 1 && nodes[0].0 == start && nodes[0].1 == size {
        return nodes[0].2;
    }

    let half = size / 2;
    let split = nodes.partition_point(|n| n.0 < start + half);
    hash_pair(
        &subtree_root(start, half, &nodes[..split]),
        &subtree_root(start + half, half, &nodes[split..]),
    )
}

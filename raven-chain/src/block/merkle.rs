//! The Bitcoin-inherited partial merkle tree carried by `merkleblock`
//! messages.
//!
//! A filtered block proves which transactions matched the peer's bloom
//! filter: the proof is a depth-first serialization of the merkle tree where
//! one flag bit per visited node says whether the node is an ancestor of a
//! match, and one hash per terminal node lets the verifier recompute the
//! root.

use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::serialization::{sha256d, RavenDeserialize, RavenSerialize, SerializationError};
use crate::transaction;

/// A block may not claim more transactions than could physically fit its
/// serialized size (a transaction is at least 60 bytes).
const MAX_PARTIAL_TREE_TRANSACTIONS: u32 = 1_000_000 / 60;

/// The root of a transaction merkle tree.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Root(pub [u8; 32]);

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(reversed_bytes))
            .finish()
    }
}

impl RavenSerialize for Root {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.raven_serialize(target)
    }
}

impl RavenDeserialize for Root {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::raven_deserialize(&mut reader)?))
    }
}

/// Ways a partial merkle tree can fail to verify.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MerkleError {
    #[error("partial merkle tree contains no transactions")]
    Empty,
    #[error("partial merkle tree claims more transactions than a block can hold")]
    TooManyTransactions,
    #[error("partial merkle tree has more hashes than transactions")]
    TooManyHashes,
    #[error("partial merkle tree ran out of flag bits")]
    MissingFlagBits,
    #[error("partial merkle tree ran out of hashes")]
    MissingHashes,
    // Identical left and right branches allow forging a second tree with the
    // same root (CVE-2012-2459).
    #[error("partial merkle tree has identical left and right branches")]
    DuplicateBranch,
    #[error("partial merkle tree has unconsumed hashes")]
    UnusedHashes,
    #[error("partial merkle tree has unconsumed flag bits")]
    UnusedFlagBits,
}

/// Recompute the merkle root of a partial tree and collect the matched
/// transaction hashes, in wire order.
pub fn extract_matches(
    total_transactions: u32,
    hashes: &[transaction::Hash],
    flags: &[u8],
) -> Result<(Root, Vec<transaction::Hash>), MerkleError> {
    if total_transactions == 0 {
        return Err(MerkleError::Empty);
    }
    if total_transactions > MAX_PARTIAL_TREE_TRANSACTIONS {
        return Err(MerkleError::TooManyTransactions);
    }
    if hashes.len() as u64 > total_transactions as u64 {
        return Err(MerkleError::TooManyHashes);
    }

    let mut walk = Traversal {
        total: total_transactions,
        hashes,
        flags,
        hashes_used: 0,
        bits_used: 0,
        matches: Vec::new(),
    };

    let mut height = 0;
    while walk.width(height) > 1 {
        height += 1;
    }

    let root = walk.descend(height, 0)?;

    if walk.hashes_used != hashes.len() {
        return Err(MerkleError::UnusedHashes);
    }
    // Only padding bits of the final byte may remain unread.
    if (walk.bits_used + 7) / 8 != flags.len() {
        return Err(MerkleError::UnusedFlagBits);
    }

    Ok((Root(root), walk.matches))
}

struct Traversal<'a> {
    total: u32,
    hashes: &'a [transaction::Hash],
    flags: &'a [u8],
    hashes_used: usize,
    bits_used: usize,
    matches: Vec<transaction::Hash>,
}

impl<'a> Traversal<'a> {
    /// Number of nodes at the given height above the leaves.
    fn width(&self, height: u32) -> usize {
        (self.total as usize + (1 << height) - 1) >> height
    }

    fn next_bit(&mut self) -> Result<bool, MerkleError> {
        if self.bits_used >= self.flags.len() * 8 {
            return Err(MerkleError::MissingFlagBits);
        }
        let bit = (self.flags[self.bits_used >> 3] >> (self.bits_used & 7)) & 1;
        self.bits_used += 1;
        Ok(bit == 1)
    }

    fn next_hash(&mut self) -> Result<[u8; 32], MerkleError> {
        let hash = self
            .hashes
            .get(self.hashes_used)
            .ok_or(MerkleError::MissingHashes)?;
        self.hashes_used += 1;
        Ok(hash.0)
    }

    fn descend(&mut self, height: u32, pos: usize) -> Result<[u8; 32], MerkleError> {
        let parent_of_match = self.next_bit()?;

        if height == 0 || !parent_of_match {
            // Terminal node: its hash is carried verbatim.
            let hash = self.next_hash()?;
            if height == 0 && parent_of_match {
                self.matches.push(transaction::Hash(hash));
            }
            return Ok(hash);
        }

        let left = self.descend(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < self.width(height - 1) {
            let right = self.descend(height - 1, pos * 2 + 1)?;
            if right == left {
                return Err(MerkleError::DuplicateBranch);
            }
            right
        } else {
            left
        };

        let mut concat = [0u8; 64];
        concat[0..32].copy_from_slice(&left);
        concat[32..64].copy_from_slice(&right);
        Ok(sha256d::digest(&concat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> transaction::Hash {
        transaction::Hash([n; 32])
    }

    fn parent(left: [u8; 32], right: [u8; 32]) -> [u8; 32] {
        let mut concat = [0u8; 64];
        concat[0..32].copy_from_slice(&left);
        concat[32..64].copy_from_slice(&right);
        sha256d::digest(&concat)
    }

    #[test]
    fn single_transaction_block() {
        // One transaction: the leaf is the root, matched or not.
        let (root, matches) = extract_matches(1, &[leaf(1)], &[0x01]).unwrap();
        assert_eq!(root.0, leaf(1).0);
        assert_eq!(matches, vec![leaf(1)]);

        let (_, matches) = extract_matches(1, &[leaf(1)], &[0x00]).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn two_transactions_one_match() {
        // Tree: root over [A, B], with B matched. Depth-first flags:
        // root=1, A=0, B=1 -> bits 1,0,1 LSB-first = 0x05.
        let expected_root = parent(leaf(1).0, leaf(2).0);
        let (root, matches) = extract_matches(2, &[leaf(1), leaf(2)], &[0x05]).unwrap();
        assert_eq!(root.0, expected_root);
        assert_eq!(matches, vec![leaf(2)]);
    }

    #[test]
    fn odd_leaf_is_paired_with_itself() {
        // Three transactions: the third leaf hashes against itself one level
        // up. No matches, so the proof is just the root hash.
        let level1 = [parent(leaf(1).0, leaf(2).0), parent(leaf(3).0, leaf(3).0)];
        let expected_root = parent(level1[0], level1[1]);

        let root_hash = transaction::Hash(expected_root);
        let (root, matches) = extract_matches(3, &[root_hash], &[0x00]).unwrap();
        assert_eq!(root.0, expected_root);
        assert!(matches.is_empty());
    }

    #[test]
    fn duplicate_branch_is_rejected() {
        // A forged tree presenting the same hash for both children.
        let result = extract_matches(2, &[leaf(7), leaf(7)], &[0x07]);
        assert_eq!(result, Err(MerkleError::DuplicateBranch));
    }

    #[test]
    fn leftover_material_is_rejected() {
        let err = extract_matches(1, &[leaf(1), leaf(2)], &[0x00]).unwrap_err();
        assert_eq!(err, MerkleError::UnusedHashes);

        let err = extract_matches(1, &[leaf(1)], &[0x00, 0x00]).unwrap_err();
        assert_eq!(err, MerkleError::UnusedFlagBits);
    }

    #[test]
    fn empty_tree_is_rejected() {
        assert_eq!(extract_matches(0, &[], &[]), Err(MerkleError::Empty));
    }
}

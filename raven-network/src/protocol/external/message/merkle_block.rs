use std::io;

use chrono::{DateTime, Utc};
use thiserror::Error;

use raven_chain::block::{self, merkle, Header};
use raven_chain::parameters::Network;
use raven_chain::work::PowHasher;
use raven_chain::{transaction, RavenDeserialize, RavenSerialize, SerializationError};

/// A `merkleblock` message: a block header plus the partial merkle tree
/// proving which transactions matched the peer's bloom filter.
///
/// The `headers` acceptor reuses this type with an empty proof, since both
/// paths surface blocks upward through the same callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlock {
    pub header: Header,
    /// Total number of transactions in the block, matched or not.
    pub transaction_count: u32,
    pub hashes: Vec<transaction::Hash>,
    pub flags: Vec<u8>,
}

/// Ways a merkle block can fail validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleBlockError {
    #[error("header fails proof-of-work or timestamp checks")]
    InvalidHeader,
    #[error("invalid partial merkle tree: {0}")]
    Tree(#[from] merkle::MerkleError),
    #[error("partial merkle tree root does not match the header")]
    RootMismatch,
}

impl MerkleBlock {
    /// Wrap a bare header (from a `headers` batch) as a block with no proof.
    pub fn from_header(header: Header) -> MerkleBlock {
        MerkleBlock {
            header,
            transaction_count: 0,
            hashes: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Parse from a `merkleblock` payload; the header layout is chosen by
    /// its own timestamp against `kawpow_activation`.
    pub fn parse<R: io::Read>(
        mut reader: R,
        kawpow_activation: u32,
    ) -> Result<MerkleBlock, SerializationError> {
        use raven_chain::compactint::CompactInt;

        let header = Header::parse(&mut reader, kawpow_activation)?;
        let transaction_count = u32::raven_deserialize(&mut reader)?;
        let hashes = Vec::raven_deserialize(&mut reader)?;
        let flag_len = CompactInt::raven_deserialize(&mut reader)?.value() as usize;
        if flag_len > crate::constants::MAX_PROTOCOL_MESSAGE_LEN {
            return Err(SerializationError::Parse("merkleblock flag field too long"));
        }
        let mut flags = vec![0u8; flag_len];
        reader.read_exact(&mut flags)?;
        Ok(MerkleBlock {
            header,
            transaction_count,
            hashes,
            flags,
        })
    }

    /// The block hash, by the era hash function the header's timestamp
    /// selects.
    pub fn block_hash(&self, pow: &dyn PowHasher, network: Network) -> Option<block::Hash> {
        self.header.hash_with(pow, network)
    }

    /// Validate the header and the partial merkle tree, returning the matched
    /// transaction hashes in wire order.
    ///
    /// A block with no proof (a bare header) validates to an empty match
    /// list.
    pub fn validate(
        &self,
        now: DateTime<Utc>,
        pow: &dyn PowHasher,
        network: Network,
    ) -> Result<Vec<transaction::Hash>, MerkleBlockError> {
        if !self.header.is_valid(now, pow, network) {
            return Err(MerkleBlockError::InvalidHeader);
        }
        if self.transaction_count == 0 && self.hashes.is_empty() {
            return Ok(Vec::new());
        }
        let (root, matches) =
            merkle::extract_matches(self.transaction_count, &self.hashes, &self.flags)?;
        if root != self.header.merkle_root {
            return Err(MerkleBlockError::RootMismatch);
        }
        Ok(matches)
    }
}

impl RavenSerialize for MerkleBlock {
    fn raven_serialize<W: io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.raven_serialize(&mut target)?;
        self.transaction_count.raven_serialize(&mut target)?;
        self.hashes.raven_serialize(&mut target)?;
        self.flags.raven_serialize(&mut target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use raven_chain::block::PowData;
    use raven_chain::serialization::sha256d;
    use raven_chain::work::tests::TestPow;
    use raven_chain::work::CompactDifficulty;

    fn matched_pair_block() -> (MerkleBlock, [transaction::Hash; 2]) {
        let t1 = transaction::Hash([0x11; 32]);
        let t2 = transaction::Hash([0x22; 32]);
        let mut concat = [0u8; 64];
        concat[0..32].copy_from_slice(&t1.0);
        concat[32..64].copy_from_slice(&t2.0);
        let root = merkle::Root(sha256d::digest(&concat));

        let header = Header {
            version: 0x2000_0000,
            previous_block_hash: block::Hash([1u8; 32]),
            merkle_root: root,
            time: Utc.timestamp(1_500_000_000, 0),
            difficulty_threshold: CompactDifficulty(0x207f_ffff),
            pow_data: PowData::Classic { nonce: 0 },
        };
        let block = MerkleBlock {
            header,
            transaction_count: 2,
            hashes: vec![t1, t2],
            // root=1, left leaf matched=1, right leaf matched=1
            flags: vec![0x07],
        };
        (block, [t1, t2])
    }

    #[test]
    fn parse_round_trip() {
        let (block, _) = matched_pair_block();
        let bytes = block.raven_serialize_to_vec().unwrap();
        let parsed = MerkleBlock::parse(&bytes[..], 1_588_788_000).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn validation_extracts_matches() {
        let (block, [t1, t2]) = matched_pair_block();
        let now = Utc.timestamp(1_500_000_100, 0);
        let matches = block.validate(now, &TestPow, Network::Mainnet).unwrap();
        assert_eq!(matches, vec![t1, t2]);
    }

    #[test]
    fn wrong_root_fails_validation() {
        let (mut block, _) = matched_pair_block();
        block.header.merkle_root = merkle::Root([0xff; 32]);
        let now = Utc.timestamp(1_500_000_100, 0);
        assert_eq!(
            block.validate(now, &TestPow, Network::Mainnet),
            Err(MerkleBlockError::RootMismatch)
        );
    }

    #[test]
    fn bare_header_validates_without_a_tree() {
        let (block, _) = matched_pair_block();
        let bare = MerkleBlock::from_header(block.header);
        let now = Utc.timestamp(1_500_000_100, 0);
        assert_eq!(bare.validate(now, &TestPow, Network::Mainnet), Ok(vec![]));
    }
}

use std::io;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::parameters::{Network, BLOCK_MAX_TIME_DRIFT};
use crate::serialization::{sha256d, RavenDeserialize, RavenSerialize, SerializationError};
use crate::work::{CompactDifficulty, PowHasher};

use super::{merkle, Hash, Height};

/// A block header, containing metadata about a block.
///
/// How are blocks chained together? They are chained together via the
/// backwards reference (previous header hash) present in the block
/// header. Each block points backwards to its parent, all the way
/// back to the genesis block (the first block in the blockchain).
///
/// Ravencoin headers changed shape at the KAWPOW fork: the trailing 32-bit
/// nonce of the classic 80-byte layout was replaced by a block height, a
/// 64-bit nonce, and a 32-byte mix hash, growing the serialized header to
/// 120 bytes. Which layout a header uses is decided by its own timestamp
/// against the network's activation time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// The block's version field.
    pub version: u32,

    /// The hash of the previous block, used to create a chain of blocks back to
    /// the genesis block.
    ///
    /// This ensures no previous block can be changed without also changing this
    /// block’s header.
    pub previous_block_hash: Hash,

    /// The root of the transaction Merkle tree, binding the block header to
    /// the transactions in the block.
    pub merkle_root: merkle::Root,

    /// The block timestamp is a Unix epoch time (UTC) when the miner
    /// started hashing the header (according to the miner).
    pub time: DateTime<Utc>,

    /// An encoded version of the target threshold this block’s header
    /// hash must be less than or equal to, in the same nBits format
    /// used by Bitcoin.
    pub difficulty_threshold: CompactDifficulty,

    /// The era-specific trailer: a 32-bit nonce before the KAWPOW fork, or
    /// height, 64-bit nonce, and mix hash after it.
    pub pow_data: PowData,
}

/// The proof-of-work fields that differ between header layouts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowData {
    /// The X16R/X16Rv2 era: a single 32-bit nonce closes the 80-byte header.
    Classic {
        /// An arbitrary field miners change to search for a valid hash.
        nonce: u32,
    },
    /// The KAWPOW era: 120-byte headers carrying the extra verification data.
    Kawpow {
        /// The block height, included in the header since KAWPOW seeds its
        /// DAG epoch from it.
        height: Height,
        /// The 64-bit KAWPOW nonce.
        nonce64: u64,
        /// The mix hash produced by the KAWPOW inner loop; light verification
        /// recomputes the final hash from it without the DAG.
        mix_hash: Hash,
    },
}

impl Header {
    /// Serialized length of a pre-KAWPOW header.
    pub const CLASSIC_LEN: usize = 80;
    /// Serialized length of a KAWPOW header.
    pub const KAWPOW_LEN: usize = 120;

    /// The serialized length of this header in bytes.
    pub fn len(&self) -> usize {
        match self.pow_data {
            PowData::Classic { .. } => Header::CLASSIC_LEN,
            PowData::Kawpow { .. } => Header::KAWPOW_LEN,
        }
    }

    /// The header timestamp as a raw Unix time.
    pub fn timestamp(&self) -> u32 {
        self.time.timestamp() as u32
    }

    /// The height carried by KAWPOW headers, if any.
    pub fn height(&self) -> Option<Height> {
        match self.pow_data {
            PowData::Classic { .. } => None,
            PowData::Kawpow { height, .. } => Some(height),
        }
    }

    /// Parse a header, choosing the layout by the header's own timestamp
    /// relative to `kawpow_activation`.
    pub fn parse<R: io::Read>(
        mut reader: R,
        kawpow_activation: u32,
    ) -> Result<Header, SerializationError> {
        let version = u32::raven_deserialize(&mut reader)?;
        let previous_block_hash = Hash::raven_deserialize(&mut reader)?;
        let merkle_root = merkle::Root::raven_deserialize(&mut reader)?;
        let raw_time = u32::raven_deserialize(&mut reader)?;
        let difficulty_threshold = CompactDifficulty::raven_deserialize(&mut reader)?;

        let pow_data = if raw_time >= kawpow_activation {
            PowData::Kawpow {
                height: Height::raven_deserialize(&mut reader)?,
                nonce64: u64::raven_deserialize(&mut reader)?,
                mix_hash: Hash::raven_deserialize(&mut reader)?,
            }
        } else {
            PowData::Classic {
                nonce: u32::raven_deserialize(&mut reader)?,
            }
        };

        Ok(Header {
            version,
            previous_block_hash,
            merkle_root,
            time: Utc.timestamp(raw_time as i64, 0),
            difficulty_threshold,
            pow_data,
        })
    }

    /// The first 80 serialized bytes of the header.
    ///
    /// This is the region fed to the era hash functions: the whole header in
    /// the classic layout, or the 76-byte common prefix plus the height field
    /// in the KAWPOW layout.
    pub fn prefix80(&self) -> [u8; 80] {
        let bytes = self
            .raven_serialize_to_vec()
            .expect("serializing into a Vec is infallible");
        let mut prefix = [0u8; 80];
        prefix.copy_from_slice(&bytes[0..80]);
        prefix
    }

    /// Compute the block hash using the proof-of-work function this header's
    /// timestamp selects.
    ///
    /// Returns `None` when a KAWPOW header fails light verification, since
    /// such a header has no meaningful hash.
    pub fn hash_with(&self, pow: &dyn PowHasher, network: Network) -> Option<Hash> {
        let prefix = self.prefix80();
        match self.pow_data {
            PowData::Kawpow { nonce64, mix_hash, .. } => {
                let header_hash = Hash(sha256d::digest(&prefix));
                pow.kawpow_light(header_hash, mix_hash, nonce64)
            }
            PowData::Classic { .. } => {
                if self.timestamp() >= network.x16rv2_activation_time() {
                    Some(pow.x16rv2(&prefix))
                } else {
                    Some(pow.x16r(&prefix))
                }
            }
        }
    }

    /// Check that the header is self-consistent: its timestamp is not too far
    /// in the future and its hash meets the encoded difficulty target.
    pub fn is_valid(&self, now: DateTime<Utc>, pow: &dyn PowHasher, network: Network) -> bool {
        let max_time = now + Duration::seconds(BLOCK_MAX_TIME_DRIFT as i64);
        if self.time > max_time {
            return false;
        }
        match self.hash_with(pow, network) {
            Some(hash) => self.difficulty_threshold.is_met_by(&hash),
            None => false,
        }
    }
}

impl RavenSerialize for Header {
    fn raven_serialize<W: io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.raven_serialize(&mut target)?;
        self.previous_block_hash.raven_serialize(&mut target)?;
        self.merkle_root.raven_serialize(&mut target)?;
        self.time.raven_serialize(&mut target)?;
        self.difficulty_threshold.raven_serialize(&mut target)?;
        match self.pow_data {
            PowData::Classic { nonce } => nonce.raven_serialize(&mut target),
            PowData::Kawpow {
                height,
                nonce64,
                mix_hash,
            } => {
                height.raven_serialize(&mut target)?;
                nonce64.raven_serialize(&mut target)?;
                mix_hash.raven_serialize(&mut target)
            }
        }
    }
}

//! Proof-of-work plumbing for the three Ravencoin hash eras.
//!
//! The actual hash implementations (X16R, X16Rv2, and the KAWPOW/ethash
//! light verifier) are heavyweight native code supplied by the embedding
//! application; this module defines the trait they plug in through, plus the
//! nBits difficulty arithmetic every era shares.

use std::io;

use primitive_types::U256;

use crate::block;
use crate::parameters::Network;
use crate::serialization::{RavenDeserialize, RavenSerialize, SerializationError};

/// A difficulty target, compressed into the 32-bit nBits format used by
/// Bitcoin.
///
/// The high byte is a base-256 exponent, the low three bytes a mantissa; a
/// set sign bit or a zero mantissa encodes no valid target at all.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CompactDifficulty(pub u32);

impl CompactDifficulty {
    /// Expand to the full 256-bit target, or `None` if the encoding is
    /// negative, zero, or overflows 256 bits.
    pub fn to_target(self) -> Option<U256> {
        let exponent = self.0 >> 24;
        let mantissa = self.0 & 0x007f_ffff;

        if mantissa == 0 || self.0 & 0x0080_0000 != 0 {
            return None;
        }

        if exponent <= 3 {
            Some(U256::from(mantissa >> (8 * (3 - exponent))))
        } else if exponent <= 32 {
            Some(U256::from(mantissa) << (8 * (exponent - 3)))
        } else {
            None
        }
    }

    /// Whether `hash`, interpreted as a little-endian 256-bit integer, meets
    /// this difficulty target.
    pub fn is_met_by(self, hash: &block::Hash) -> bool {
        match self.to_target() {
            Some(target) => U256::from_little_endian(&hash.0) <= target,
            None => false,
        }
    }
}

impl RavenSerialize for CompactDifficulty {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.raven_serialize(target)
    }
}

impl RavenDeserialize for CompactDifficulty {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::raven_deserialize(reader)?))
    }
}

/// The proof-of-work function a header is bound to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowAlgorithm {
    X16r,
    X16rv2,
    Kawpow,
}

impl PowAlgorithm {
    /// Select the algorithm active at `timestamp` on the given network.
    pub fn for_timestamp(network: Network, timestamp: u32) -> PowAlgorithm {
        if timestamp >= network.kawpow_activation_time() {
            PowAlgorithm::Kawpow
        } else if timestamp >= network.x16rv2_activation_time() {
            PowAlgorithm::X16rv2
        } else {
            PowAlgorithm::X16r
        }
    }
}

/// The interface to the external proof-of-work hash implementations.
///
/// `x16r` and `x16rv2` hash the 80-byte classic header directly. KAWPOW is
/// verified in light mode: from the SHA-256d of the 80-byte prefix, the mix
/// hash, and the 64-bit nonce the verifier recomputes the final block hash,
/// or reports an inconsistent mix by returning `None`.
pub trait PowHasher: Send + Sync {
    fn x16r(&self, header: &[u8; 80]) -> block::Hash;

    fn x16rv2(&self, header: &[u8; 80]) -> block::Hash;

    fn kawpow_light(
        &self,
        header_hash: block::Hash,
        mix_hash: block::Hash,
        nonce64: u64,
    ) -> Option<block::Hash>;
}

#[cfg(any(test, feature = "test-pow"))]
pub mod tests {
    //! A deterministic stand-in for the native hash functions.

    use super::*;
    use crate::serialization::sha256d;

    /// Hashes with SHA-256d in place of every era function, zeroing the top
    /// byte so any sane target is met.
    #[derive(Copy, Clone, Debug, Default)]
    pub struct TestPow;

    fn tamed(mut hash: [u8; 32]) -> block::Hash {
        // Byte 31 is the most significant in the little-endian u256 reading.
        hash[31] = 0;
        block::Hash(hash)
    }

    impl PowHasher for TestPow {
        fn x16r(&self, header: &[u8; 80]) -> block::Hash {
            tamed(sha256d::digest(header))
        }

        fn x16rv2(&self, header: &[u8; 80]) -> block::Hash {
            let mut tagged = Vec::with_capacity(81);
            tagged.extend_from_slice(header);
            tagged.push(b'2');
            tamed(sha256d::digest(&tagged))
        }

        fn kawpow_light(
            &self,
            header_hash: block::Hash,
            mix_hash: block::Hash,
            nonce64: u64,
        ) -> Option<block::Hash> {
            let mut seed = Vec::with_capacity(72);
            seed.extend_from_slice(&header_hash.0);
            seed.extend_from_slice(&mix_hash.0);
            seed.extend_from_slice(&nonce64.to_le_bytes());
            Some(tamed(sha256d::digest(&seed)))
        }
    }
}

#[cfg(test)]
mod difficulty_tests {
    use super::*;

    #[test]
    fn genesis_style_target_expands() {
        // 0x1d00ffff, Bitcoin's original maximum target.
        let target = CompactDifficulty(0x1d00_ffff).to_target().unwrap();
        assert_eq!(target, U256::from(0xffff) << (8 * 26));
    }

    #[test]
    fn invalid_encodings_have_no_target() {
        assert_eq!(CompactDifficulty(0).to_target(), None);
        // Negative flag set.
        assert_eq!(CompactDifficulty(0x1d80_ffff).to_target(), None);
        // Exponent overflows 256 bits.
        assert_eq!(CompactDifficulty(0x2100_ffff).to_target(), None);
    }

    #[test]
    fn regtest_style_target_is_met_by_small_hashes() {
        let bits = CompactDifficulty(0x207f_ffff);
        let mut hash = [0xffu8; 32];
        hash[31] = 0;
        assert!(bits.is_met_by(&block::Hash(hash)));
        assert!(!bits.is_met_by(&block::Hash([0xffu8; 32])));
    }

    #[test]
    fn algorithm_schedule() {
        let network = Network::Mainnet;
        let x16rv2 = network.x16rv2_activation_time();
        let kawpow = network.kawpow_activation_time();
        assert_eq!(
            PowAlgorithm::for_timestamp(network, x16rv2 - 1),
            PowAlgorithm::X16r
        );
        assert_eq!(
            PowAlgorithm::for_timestamp(network, x16rv2),
            PowAlgorithm::X16rv2
        );
        assert_eq!(
            PowAlgorithm::for_timestamp(network, kawpow),
            PowAlgorithm::Kawpow
        );
    }
}

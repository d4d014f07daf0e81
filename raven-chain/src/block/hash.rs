use std::{fmt, io};

use serde::{Deserialize, Serialize};

use crate::serialization::{RavenDeserialize, RavenSerialize, SerializationError};

/// A hash of a block, used to identify blocks and link blocks into a chain. ⛓️
///
/// Which hash function produced it depends on the block's proof-of-work era:
/// X16R, X16Rv2, or (after the KAWPOW fork) the ethash-style light-verify
/// output. In every era it binds the header, and through the header's merkle
/// root the entire block.
///
/// Note: following the u256 convention set by Bitcoin, hashes are displayed
/// in big-endian byte-order.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as the "no stop hash" sentinel on the wire.
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Hash {
        Hash(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.write_str(&hex::encode(reversed_bytes))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("block::Hash")
            .field(&hex::encode(reversed_bytes))
            .finish()
    }
}

impl RavenSerialize for Hash {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.raven_serialize(target)
    }
}

impl RavenDeserialize for Hash {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        Ok(Hash(<[u8; 32]>::raven_deserialize(&mut reader)?))
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(SerializationError::Parse("hex decoding error"))
        } else {
            bytes.reverse();
            Ok(Hash(bytes))
        }
    }
}

use std::fmt;
use std::io;

use rand::Rng;

use raven_chain::parameters::Network;
use raven_chain::{RavenDeserialize, RavenSerialize, SerializationError};

use crate::constants::magics;

/// A magic number identifying the network a message belongs to.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl fmt::Debug for Magic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(self.0)).finish()
    }
}

impl From<Network> for Magic {
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => magics::MAINNET,
            Network::Testnet => magics::TESTNET,
            Network::Regtest => magics::REGTEST,
        }
    }
}

/// A protocol version number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolVersion(pub u32);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl RavenSerialize for ProtocolVersion {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.raven_serialize(target)
    }
}

impl RavenDeserialize for ProtocolVersion {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(ProtocolVersion(u32::raven_deserialize(reader)?))
    }
}

bitflags::bitflags! {
    /// The services a node advertises in `version` and `addr` messages.
    pub struct PeerServices: u64 {
        /// The node serves full blocks, not just headers.
        const NODE_NETWORK = 1;
    }
}

impl RavenSerialize for PeerServices {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.bits().raven_serialize(target)
    }
}

impl RavenDeserialize for PeerServices {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(PeerServices::from_bits_truncate(u64::raven_deserialize(
            reader,
        )?))
    }
}

/// A nonce used to tie `ping`s to `pong`s and to detect self-connections.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Nonce(pub u64);

impl Default for Nonce {
    fn default() -> Self {
        Nonce(rand::thread_rng().gen())
    }
}

impl RavenSerialize for Nonce {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.raven_serialize(target)
    }
}

impl RavenDeserialize for Nonce {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Nonce(u64::raven_deserialize(reader)?))
    }
}

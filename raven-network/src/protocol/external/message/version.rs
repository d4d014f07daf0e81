use std::io;
use std::net::SocketAddr;

use byteorder::{ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use raven_chain::block;
use raven_chain::{RavenDeserialize, RavenSerialize, SerializationError};

use super::super::types::{Nonce, PeerServices, ProtocolVersion};

/// A `version` message.
///
/// Note that although this is called `version` in Bitcoin, its role is really
/// analogous to a `ClientHello` message in TLS, used to begin a handshake, and
/// is distinct from a simple version number.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#version)
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Version {
    /// The network version number supported by the sender.
    pub version: ProtocolVersion,

    /// The network services advertised by the sender.
    pub services: PeerServices,

    /// The time when the version message was sent.
    ///
    /// Unlike most wire timestamps this one is 64 bits.
    pub timestamp: DateTime<Utc>,

    /// The network address of the node receiving this message, and its
    /// advertised network services, as seen by the sender.
    pub address_recv: (PeerServices, SocketAddr),

    /// The network address of the node sending this message, and its
    /// advertised network services.
    pub address_from: (PeerServices, SocketAddr),

    /// Node random nonce, randomly generated every time a version
    /// packet is sent. This nonce is used to detect connections
    /// to self.
    pub nonce: Nonce,

    /// The user agent advertised by the sender.
    pub user_agent: String,

    /// The last block received by the emitting node.
    pub best_block: block::Height,

    /// Whether the remote peer should announce relayed transactions or not,
    /// see [BIP 0037](https://github.com/bitcoin/bips/blob/master/bip-0037.mediawiki).
    ///
    /// An SPV session sets this false: only transactions matching the bloom
    /// filter should come back.
    pub relay: bool,
}

impl Version {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: ProtocolVersion,
        their_addr: SocketAddr,
        their_services: PeerServices,
        our_services: PeerServices,
        our_addr: SocketAddr,
        nonce: Nonce,
        user_agent: String,
        best_block: block::Height,
        relay: bool,
    ) -> Version {
        Version {
            version,
            services: our_services,
            timestamp: Utc::now(),
            address_recv: (their_services, their_addr),
            address_from: (our_services, our_addr),
            nonce,
            user_agent,
            best_block,
            relay,
        }
    }
}

impl RavenSerialize for Version {
    fn raven_serialize<W: io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.raven_serialize(&mut target)?;
        self.services.raven_serialize(&mut target)?;
        // 64-bit timestamp, unlike the 32-bit times elsewhere on the wire.
        self.timestamp.timestamp().raven_serialize(&mut target)?;
        self.address_recv.raven_serialize(&mut target)?;
        self.address_from.raven_serialize(&mut target)?;
        self.nonce.raven_serialize(&mut target)?;
        self.user_agent.raven_serialize(&mut target)?;
        self.best_block.raven_serialize(&mut target)?;
        target.write_u8(self.relay as u8)
    }
}

impl RavenDeserialize for Version {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let version = ProtocolVersion::raven_deserialize(&mut reader)?;
        let services = PeerServices::raven_deserialize(&mut reader)?;
        let timestamp = Utc.timestamp(i64::raven_deserialize(&mut reader)?, 0);
        let address_recv = <(PeerServices, SocketAddr)>::raven_deserialize(&mut reader)?;
        let address_from = <(PeerServices, SocketAddr)>::raven_deserialize(&mut reader)?;
        let nonce = Nonce::raven_deserialize(&mut reader)?;
        let user_agent = String::raven_deserialize(&mut reader)?;
        let best_block = block::Height::raven_deserialize(&mut reader)?;
        // The relay flag postdates the base message; tolerate its absence.
        let relay = reader.read_u8().map(|b| b != 0).unwrap_or(false);

        Ok(Version {
            version,
            services,
            timestamp,
            address_recv,
            address_from,
            nonce,
            user_agent,
            best_block,
            relay,
        })
    }
}

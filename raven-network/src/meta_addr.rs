//! An address-with-metadata type used in Raven networking.

use std::{
    io::{Read, Write},
    net::{IpAddr, SocketAddr},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Duration, TimeZone, Utc};

use raven_chain::serialization::{RavenDeserialize, RavenSerialize, SerializationError};

use crate::protocol::external::types::PeerServices;

/// An address with metadata on its advertised services and last-seen time.
///
/// This is both the 30-byte entry of `addr` gossip messages and the identity
/// a [`crate::Peer`] is created from.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#Network_address)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MetaAddr {
    /// The peer's address.
    ///
    /// On the wire this is always 16 bytes; IPv4 addresses travel
    /// IPv4-mapped and come back out as `SocketAddr::V4`.
    pub addr: SocketAddr,

    /// The services advertised by the peer.
    ///
    /// For gossiped addresses these are unverified claims relayed by another
    /// peer; they may be stale, wrong, or malicious.
    pub services: PeerServices,

    /// When the advertising peer last heard from this address.
    ///
    /// Unverified for gossiped addresses; [`MetaAddr::sanitize_gossip_time`]
    /// clamps the lies before the address is used.
    pub last_seen: DateTime<Utc>,
}

/// A serialized meta addr: 4 byte time, 8 byte services, 16 byte IP, 2 byte
/// port.
pub(crate) const META_ADDR_SIZE: usize = 4 + 8 + 16 + 2;

impl MetaAddr {
    pub fn new(addr: SocketAddr, services: PeerServices, last_seen: DateTime<Utc>) -> MetaAddr {
        MetaAddr {
            addr,
            services,
            last_seen,
        }
    }

    /// Whether the address is IPv4 (directly or as an IPv4-mapped IPv6
    /// address).
    pub fn is_ipv4(&self) -> bool {
        match self.addr.ip() {
            IpAddr::V4(_) => true,
            IpAddr::V6(v6) => v6.to_ipv4().is_some(),
        }
    }

    /// Clamp an implausible gossiped timestamp.
    ///
    /// Entries claiming more than 10 minutes in the future, or the zero
    /// "unknown" time, are rewritten to five days old; every timestamp is
    /// then moved two hours back so gossip can never look fresher than our
    /// own observations.
    pub fn sanitize_gossip_time(mut self, now: DateTime<Utc>) -> MetaAddr {
        let ten_minutes = Duration::minutes(10);
        let five_days = Duration::days(5);
        let two_hours = Duration::hours(2);

        if self.last_seen > now + ten_minutes || self.last_seen.timestamp() == 0 {
            self.last_seen = now - five_days;
        }
        self.last_seen = self.last_seen - two_hours;
        self
    }
}

impl RavenSerialize for MetaAddr {
    fn raven_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u32::<LittleEndian>(self.last_seen.timestamp() as u32)?;
        self.services.raven_serialize(&mut writer)?;
        self.addr.raven_serialize(&mut writer)?;
        Ok(())
    }
}

impl RavenDeserialize for MetaAddr {
    fn raven_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let last_seen = Utc.timestamp(reader.read_u32::<LittleEndian>()? as i64, 0);
        let services = PeerServices::raven_deserialize(&mut reader)?;
        let addr = SocketAddr::raven_deserialize(&mut reader)?;

        Ok(MetaAddr::new(addr, services, last_seen))
    }
}

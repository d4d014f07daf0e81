//! Consensus-critical serialization.
//!
//! This module contains the `RavenSerialize` and `RavenDeserialize` traits,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended for
//! the Ravencoin wire formats inherited from Bitcoin: little-endian integers,
//! big-endian ports, IPv4 addresses embedded as IPv4-mapped IPv6, and
//! `CompactInt`-prefixed collections.

mod deserialize;
mod error;

pub mod sha256d;

pub use deserialize::{RavenDeserialize, RavenDeserializeInto};
pub use error::SerializationError;

use std::convert::TryFrom;
use std::net::IpAddr;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

use crate::compactint::CompactInt;

pub trait RavenSerialize {
    fn raven_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn raven_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.raven_serialize(&mut data)?;
        Ok(data)
    }
}

impl RavenSerialize for bool {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[*self as u8])
    }
}

// u8 itself can't implement the trait without overlapping the specialized
// Vec<u8> impl below; byte fields are written with `write_u8` instead.

impl RavenSerialize for u16 {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u16::<LittleEndian>(*self)
    }
}

impl RavenSerialize for u32 {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl RavenSerialize for u64 {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u64::<LittleEndian>(*self)
    }
}

impl RavenSerialize for i32 {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i32::<LittleEndian>(*self)
    }
}

impl RavenSerialize for i64 {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(*self)
    }
}

/// Times on the wire are 32-bit Unix timestamps except in `version`, which
/// writes its own 64-bit field by hand.
impl RavenSerialize for DateTime<Utc> {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        let time_u32 = u32::try_from(self.timestamp()).unwrap_or(u32::MAX);
        target.write_u32::<LittleEndian>(time_u32)
    }
}

impl RavenSerialize for std::net::Ipv6Addr {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&self.octets())
    }
}

impl RavenSerialize for std::net::IpAddr {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        match self {
            IpAddr::V4(addr) => addr.to_ipv6_mapped().raven_serialize(&mut target),
            IpAddr::V6(addr) => addr.raven_serialize(&mut target),
        }
    }
}

impl RavenSerialize for std::net::SocketAddr {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.ip().raven_serialize(&mut target)?;
        target.write_u16::<BigEndian>(self.port())
    }
}

impl RavenSerialize for &[u8] {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl RavenSerialize for [u8; 4] {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl RavenSerialize for [u8; 12] {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl RavenSerialize for [u8; 32] {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl RavenSerialize for Vec<u8> {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).raven_serialize(&mut target)?;
        target.write_all(self)?;
        Ok(())
    }
}

impl<T> RavenSerialize for Vec<T>
where
    T: RavenSerialize,
{
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).raven_serialize(&mut target)?;
        for item in self.iter() {
            item.raven_serialize(&mut target)?
        }
        Ok(())
    }
}

impl<T, U> RavenSerialize for (T, U)
where
    T: RavenSerialize,
    U: RavenSerialize,
{
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.0.raven_serialize(&mut target)?;
        self.1.raven_serialize(&mut target)?;
        Ok(())
    }
}

impl RavenSerialize for String {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        CompactInt::from(self.len()).raven_serialize(&mut target)?;
        self.as_bytes().raven_serialize(&mut target)?;
        Ok(())
    }
}

impl<T: RavenSerialize> RavenSerialize for Option<T> {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        match self {
            Some(contents) => contents.raven_serialize(&mut target),
            None => Ok(()),
        }
    }
}

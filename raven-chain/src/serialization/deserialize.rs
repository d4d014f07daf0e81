use std::net::{Ipv6Addr, SocketAddr};
use std::{
    io,
    net::IpAddr::{V4, V6},
};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::compactint::CompactInt;

use super::SerializationError;

type Result<R> = std::result::Result<R, SerializationError>;

pub trait RavenDeserialize {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference
pub trait RavenDeserializeInto {
    /// Deserialize based on type inference
    fn raven_deserialize_into<T>(self) -> Result<T>
    where
        T: RavenDeserialize;
}

impl<R: io::Read> RavenDeserializeInto for R {
    fn raven_deserialize_into<T>(self) -> Result<T>
    where
        T: RavenDeserialize,
    {
        T::raven_deserialize(self)
    }
}

impl RavenDeserialize for bool {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<bool> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("invalid bool")),
        }
    }
}

impl RavenDeserialize for u8 {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl RavenDeserialize for u16 {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<u16> {
        Ok(reader.read_u16::<LittleEndian>()?)
    }
}

impl RavenDeserialize for u32 {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<u32> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl RavenDeserialize for u64 {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<u64> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl RavenDeserialize for i32 {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<i32> {
        Ok(reader.read_i32::<LittleEndian>()?)
    }
}

impl RavenDeserialize for i64 {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<i64> {
        Ok(reader.read_i64::<LittleEndian>()?)
    }
}

impl RavenDeserialize for DateTime<Utc> {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<DateTime<Utc>> {
        Ok(Utc.timestamp(reader.read_u32::<LittleEndian>()? as i64, 0))
    }
}

impl<T> RavenDeserialize for Vec<T>
where
    T: RavenDeserialize,
{
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<Vec<T>> {
        let len = CompactInt::raven_deserialize(&mut reader)?.value() as usize;
        // Limit the blind preallocation, since a hostile length prefix could
        // otherwise request gigabytes before a single element is parsed.
        let blind_alloc_limit = 1024;
        let mut result: Vec<T> = Vec::with_capacity(std::cmp::min(len, blind_alloc_limit));
        for _ in 0..len {
            result.push(T::raven_deserialize(&mut reader)?);
        }
        Ok(result)
    }
}

impl RavenDeserialize for String {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<String> {
        let len = CompactInt::raven_deserialize(&mut reader)?.value() as usize;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| SerializationError::Parse("invalid utf-8"))
    }
}

impl RavenDeserialize for SocketAddr {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<SocketAddr> {
        let octets = <[u8; 16]>::raven_deserialize(&mut reader)?;
        let v6_addr = Ipv6Addr::from(octets);

        let addr = match v6_addr.to_ipv4() {
            Some(v4_addr) => V4(v4_addr),
            None => V6(v6_addr),
        };
        Ok(SocketAddr::from((addr, reader.read_u16::<BigEndian>()?)))
    }
}

impl<T: Sized + RavenDeserialize> RavenDeserialize for Option<T> {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Option<T>> {
        Ok(Some(T::raven_deserialize(reader)?))
    }
}

impl<T, U> RavenDeserialize for (T, U)
where
    T: RavenDeserialize,
    U: RavenDeserialize,
{
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<(T, U)> {
        Ok((
            T::raven_deserialize(&mut reader)?,
            U::raven_deserialize(&mut reader)?,
        ))
    }
}

macro_rules! impl_deserializable_byte_array {
    ($size:expr) => {
        impl RavenDeserialize for [u8; $size] {
            fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<[u8; $size]> {
                let mut result = [0u8; $size];
                reader.read_exact(&mut result)?;
                Ok(result)
            }
        }
    };
}

impl_deserializable_byte_array!(4);
impl_deserializable_byte_array!(12);
impl_deserializable_byte_array!(16);
impl_deserializable_byte_array!(32);
impl_deserializable_byte_array!(80);

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{RavenDeserialize, RavenSerialize, SerializationError};

/// Bitcoin's variable-length integer encoding ("VarInt"/"CompactSize").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactInt(u64);

impl CompactInt {
    pub fn new() -> CompactInt {
        CompactInt(0)
    }

    pub fn from(value: usize) -> CompactInt {
        CompactInt(value as u64)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The encoded length, in bytes, of the given value.
    pub fn size(value: usize) -> usize {
        if value < 253 {
            1
        } else if value <= u16::MAX as usize {
            3
        } else if value <= u32::MAX as usize {
            5
        } else {
            9
        }
    }
}

impl Default for CompactInt {
    fn default() -> Self {
        CompactInt::new()
    }
}

impl RavenSerialize for CompactInt {
    fn raven_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        if self.value() < 253 {
            target.write_all(&[self.value() as u8])
        } else if self.value() <= u16::MAX as u64 {
            target.write_all(&[253])?;
            target.write_u16::<LittleEndian>(self.value() as u16)
        } else if self.value() <= u32::MAX as u64 {
            target.write_all(&[254])?;
            target.write_u32::<LittleEndian>(self.value() as u32)
        } else {
            target.write_all(&[255])?;
            target.write_u64::<LittleEndian>(self.value())
        }
    }
}

impl RavenDeserialize for CompactInt {
    fn raven_deserialize<R: std::io::Read>(
        mut reader: R,
    ) -> Result<CompactInt, SerializationError> {
        let first = u8::raven_deserialize(&mut reader)?;
        match first {
            0..=252 => Ok(CompactInt(first as u64)),
            253 => Ok(CompactInt(u16::raven_deserialize(&mut reader)? as u64)),
            254 => Ok(CompactInt(u32::raven_deserialize(&mut reader)? as u64)),
            255 => Ok(CompactInt(u64::raven_deserialize(&mut reader)?)),
        }
    }
}

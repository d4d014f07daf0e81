use raven_chain::{
    block, compactint::CompactInt, RavenDeserialize, RavenSerialize, SerializationError,
};

/// The body of a `getheaders` message, after the protocol-version prefix the
/// codec handles.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct GetHeaders {
    /// A list of the sender's best known block hashes, ordered from newest to
    /// oldest.
    pub locators: Vec<block::Hash>,
    /// The stop hash. `None` encodes as all zeroes and asks for as many
    /// headers as the peer will send (up to 2000).
    pub stop_hash: Option<block::Hash>,
}

impl RavenDeserialize for GetHeaders {
    fn raven_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        let locators = Vec::raven_deserialize(&mut reader)?;
        let raw_stop_hash = block::Hash::raven_deserialize(&mut reader)?;
        let stop_hash = if raw_stop_hash.is_zero() {
            None
        } else {
            Some(raw_stop_hash)
        };
        Ok(GetHeaders {
            locators,
            stop_hash,
        })
    }
}

impl RavenSerialize for GetHeaders {
    fn raven_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.locators.raven_serialize(&mut target)?;
        self.stop_hash
            .unwrap_or(block::Hash::ZERO)
            .raven_serialize(&mut target)
    }
}

impl GetHeaders {
    fn serialized_size(&self) -> usize {
        CompactInt::size(self.locators.len()) + (self.locators.len() * 32) + 32
    }
}

#[test]
fn serial_size() {
    let int1 = block::Hash::from_bytes([0u8; 32]);
    let int2 = block::Hash::from_bytes([1u8; 32]);
    let int3 = block::Hash::from_bytes([3u8; 32]);
    let msg = GetHeaders {
        locators: Vec::from([int1, int2, int3]),
        stop_hash: None,
    };
    let serial = msg
        .raven_serialize_to_vec()
        .expect("Serializing into vec shouldn't fail");
    assert_eq!(serial.len(), msg.serialized_size());
}

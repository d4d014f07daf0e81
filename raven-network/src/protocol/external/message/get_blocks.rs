use raven_chain::{
    block, compactint::CompactInt, RavenDeserialize, RavenSerialize, SerializationError,
};

/// The body of a `getblocks` message, after the protocol-version prefix the
/// codec handles.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetBlocks {
    /// A list of the sender's best known block hashes, ordered from newest to
    /// oldest.
    pub locators: Vec<block::Hash>,
    /// The stop hash. `None` encodes as all zeroes and asks for an `inv` of
    /// as many subsequent block hashes as the peer will send (up to 500).
    pub stop_hash: Option<block::Hash>,
}

impl RavenDeserialize for GetBlocks {
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
        Ok(GetBlocks {
            locators,
            stop_hash,
        })
    }
}

impl RavenSerialize for GetBlocks {
    fn raven_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.locators.raven_serialize(&mut target)?;
        self.stop_hash
            .unwrap_or(block::Hash::ZERO)
            .raven_serialize(&mut target)
    }
}

impl GetBlocks {
    fn serialized_size(&self) -> usize {
        CompactInt::size(self.locators.len()) + (self.locators.len() * 32) + 32
    }
}

#[test]
fn serial_size() {
    let msg = GetBlocks {
        locators: Vec::from([
            block::Hash::from_bytes([9u8; 32]),
            block::Hash::from_bytes([1u8; 32]),
        ]),
        stop_hash: Some(block::Hash::from_bytes([2u8; 32])),
    };
    let serial = msg
        .raven_serialize_to_vec()
        .expect("Serializing into vec shouldn't fail");
    assert_eq!(serial.len(), msg.serialized_size());
}

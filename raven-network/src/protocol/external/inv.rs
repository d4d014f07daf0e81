//! Inventory items for the Raven protocol.

use std::io::{Read, Write};

use raven_chain::{
    block,
    serialization::{RavenDeserialize, RavenSerialize, SerializationError},
    transaction,
};

/// An inventory hash which refers to some advertised or requested data.
///
/// Bitcoin calls this an "inventory vector" but it is just a typed hash, not
/// a container, so we do not use that term to avoid confusion with `Vec<T>`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InventoryHash {
    /// An unrecognized inventory type.
    ///
    /// Entries of this kind carry no usable hash and are skipped; the
    /// reference node tolerates them rather than dropping the connection.
    Error,
    /// A hash of a transaction.
    Tx(transaction::Hash),
    /// A hash of a block.
    Block(block::Hash),
    /// A hash of a filtered block.
    ///
    /// Only meaningful in `getdata`: it asks the remote node to reply with a
    /// `merkleblock` filtered through the loaded bloom filter instead of a
    /// full block.
    FilteredBlock(block::Hash),
}

impl From<transaction::Hash> for InventoryHash {
    fn from(tx: transaction::Hash) -> InventoryHash {
        InventoryHash::Tx(tx)
    }
}

impl From<block::Hash> for InventoryHash {
    fn from(hash: block::Hash) -> InventoryHash {
        // An SPV node always wants blocks filtered.
        InventoryHash::FilteredBlock(hash)
    }
}

impl RavenSerialize for InventoryHash {
    fn raven_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let (code, bytes) = match *self {
            InventoryHash::Error => (0u32, [0; 32]),
            InventoryHash::Tx(hash) => (1, hash.0),
            InventoryHash::Block(hash) => (2, hash.0),
            InventoryHash::FilteredBlock(hash) => (3, hash.0),
        };
        code.raven_serialize(&mut writer)?;
        bytes.raven_serialize(&mut writer)?;
        Ok(())
    }
}

impl RavenDeserialize for InventoryHash {
    fn raven_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code = u32::raven_deserialize(&mut reader)?;
        let bytes = <[u8; 32]>::raven_deserialize(&mut reader)?;
        match code {
            1 => Ok(InventoryHash::Tx(transaction::Hash(bytes))),
            2 => Ok(InventoryHash::Block(block::Hash(bytes))),
            3 => Ok(InventoryHash::FilteredBlock(block::Hash(bytes))),
            _ => Ok(InventoryHash::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let item = InventoryHash::Tx(transaction::Hash([7u8; 32]));
        let bytes = item.raven_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), 36);
        assert_eq!(InventoryHash::raven_deserialize(&bytes[..]).unwrap(), item);
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let mut bytes = vec![0xffu8, 0, 0, 0];
        bytes.extend_from_slice(&[1u8; 32]);
        assert_eq!(
            InventoryHash::raven_deserialize(&bytes[..]).unwrap(),
            InventoryHash::Error
        );
    }
}

//! Transactions as the SPV core handles them.
//!
//! Script and asset parsing live in the wallet layer; on the peer session a
//! transaction is its raw serialized bytes plus the txid derived from them.

use std::{fmt, io};

use serde::{Deserialize, Serialize};

use crate::serialization::{sha256d, RavenDeserialize, RavenSerialize, SerializationError};

/// A hash of a transaction: the SHA-256d of its serialization.
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Hash {
        Hash(bytes)
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
        f.debug_tuple("transaction::Hash")
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
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::raven_deserialize(&mut reader)?))
    }
}

/// A raw transaction and its cached txid.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    data: Vec<u8>,
    hash: Hash,
}

impl Transaction {
    /// Wrap raw transaction bytes, computing the txid.
    pub fn from_bytes(data: Vec<u8>) -> Transaction {
        let hash = Hash(sha256d::digest(&data));
        Transaction { data, hash }
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The serialized size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl RavenSerialize for Transaction {
    fn raven_serialize<W: io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(&self.data)
    }
}

/// A transaction occupies the whole remainder of its `tx` message, so
/// deserialization consumes the reader.
impl RavenDeserialize for Transaction {
    fn raven_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Transaction::from_bytes(data))
    }
}

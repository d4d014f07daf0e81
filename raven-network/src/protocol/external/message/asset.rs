//! The Ravencoin asset-metadata extension: `getassetdata` and `assetdata`.

use std::io;
use std::io::Read;

use byteorder::ReadBytesExt;

use raven_chain::compactint::CompactInt;
use raven_chain::{RavenDeserialize, RavenSerialize, SerializationError};

/// The reserved asset name a node answers with when a queried asset does not
/// exist. Strictly a wire convention: the parser maps it to `None` and it is
/// never surfaced to the owner.
const NOT_FOUND_SENTINEL: &str = "_NF";

/// A `getassetdata` request: a counted list of length-prefixed asset names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetAssetData {
    pub names: Vec<String>,
}

impl RavenSerialize for GetAssetData {
    fn raven_serialize<W: io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.names.raven_serialize(target)
    }
}

impl RavenDeserialize for GetAssetData {
    fn raven_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(GetAssetData {
            names: Vec::raven_deserialize(reader)?,
        })
    }
}

/// Metadata for one asset, as returned by `assetdata`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetData {
    pub name: String,
    /// Issued quantity, in the asset's smallest unit.
    pub amount: u64,
    /// Number of decimal places the asset divides into.
    pub units: u8,
    pub reissuable: bool,
    pub has_ipfs: bool,
    /// The associated IPFS hash, base58-encoded for display; a typical
    /// 34-byte hash encodes to 46 characters.
    pub ipfs_hash: Option<String>,
    /// The block height the asset data was last touched at, when the node
    /// includes it.
    pub height: u32,
}

impl AssetData {
    /// Parse an `assetdata` payload.
    ///
    /// The payload opens with the VarInt length of the asset name. `Ok(None)`
    /// means the reserved not-found name; oversize guarding happens at the
    /// codec, which knows the payload length.
    pub fn parse(payload: &[u8]) -> Result<Option<AssetData>, SerializationError> {
        let mut reader = io::Cursor::new(payload);

        let name_len = CompactInt::raven_deserialize(&mut reader)?.value() as usize;
        if name_len > payload.len() {
            return Err(SerializationError::Parse("asset name length out of range"));
        }
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let name =
            String::from_utf8(name).map_err(|_| SerializationError::Parse("invalid utf-8"))?;

        if name == NOT_FOUND_SENTINEL {
            return Ok(None);
        }

        let amount = u64::raven_deserialize(&mut reader)?;
        let units = reader.read_u8()?;
        let reissuable = reader.read_u8()? != 0;
        let has_ipfs = reader.read_u8()? != 0;

        let ipfs_len = CompactInt::raven_deserialize(&mut reader)?.value() as usize;
        let ipfs_hash = if has_ipfs || ipfs_len > 0 {
            if ipfs_len > payload.len() {
                return Err(SerializationError::Parse("ipfs hash length out of range"));
            }
            let mut hash = vec![0u8; ipfs_len];
            reader.read_exact(&mut hash)?;
            Some(bs58::encode(hash).into_string())
        } else {
            None
        };

        // Older nodes omit the trailing height.
        let height = u32::raven_deserialize(&mut reader).unwrap_or(0);

        Ok(Some(AssetData {
            name,
            amount,
            units,
            reissuable,
            has_ipfs,
            ipfs_hash,
            height,
        }))
    }
}

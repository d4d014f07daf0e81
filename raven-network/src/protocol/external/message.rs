//! Definitions of network messages.

use std::{fmt, sync::Arc};

use raven_chain::transaction::Transaction;

use crate::meta_addr::MetaAddr;

use super::command::Command;
use super::inv::InventoryHash;
use super::types::*;

mod version;
pub use version::Version;

mod get_blocks;
pub use get_blocks::GetBlocks;

mod get_headers;
pub use get_headers::GetHeaders;

mod headers;
pub use headers::HeadersBatch;

mod merkle_block;
pub use merkle_block::{MerkleBlock, MerkleBlockError};

mod asset;
pub use asset::{AssetData, GetAssetData};

/// A Raven network message.
///
/// The Ravencoin network protocol is inherited from Bitcoin, with a pair of
/// asset-metadata messages bolted on; the wire format of the common messages
/// is documented [on the Bitcoin wiki][btc_wiki_protocol].
///
/// That page describes the wire format of the messages, while this enum
/// stores an internal representation. The internal representation is unlinked
/// from the wire format, and the translation between the two happens only
/// during serialization and deserialization. The 12-byte ascii command string
/// is a serialization detail; in memory the enum discriminant identifies the
/// message.
///
/// [btc_wiki_protocol]: https://en.bitcoin.it/wiki/Protocol_documentation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A `version` message.
    ///
    /// Note that although this is called `version` in Bitcoin, its role is
    /// really analogous to a `ClientHello` message in TLS, used to begin a
    /// handshake, and is distinct from a simple version number.
    Version(Version),

    /// A `verack` message.
    Verack,

    /// A `ping` message.
    Ping(
        /// A nonce unique to this [`Ping`] message.
        Nonce,
    ),

    /// A `pong` message.
    Pong(
        /// The nonce from the [`Ping`] message this was in response to.
        Nonce,
    ),

    /// A `reject` message, as defined in [BIP61].
    ///
    /// [BIP61]: https://github.com/bitcoin/bips/blob/master/bip-0061.mediawiki
    Reject {
        /// Type of message rejected.
        // It's unclear if this is strictly limited to message command
        // codes, so leaving it a String.
        message: String,

        /// RejectReason code relating to rejected message.
        ccode: RejectReason,

        /// Human-readable version of rejection reason.
        reason: String,

        /// Optional extra data provided for some errors.
        // Currently, all errors which provide this field fill it with
        // the TXID or block header hash of the object being rejected,
        // so the field is 32 bytes.
        data: Option<[u8; 32]>,
    },

    /// A `getaddr` message.
    GetAddr,

    /// An `addr` message.
    Addr(Vec<MetaAddr>),

    /// A `getblocks` message.
    ///
    /// `locators` is a series of known block hashes spaced out along the
    /// peer's best chain. The remote peer uses them to find the intersection
    /// with its own best chain, and replies with an `inv` of up to 500
    /// subsequent block hashes.
    GetBlocks(GetBlocks),

    /// An `inv` message.
    ///
    /// Allows a node to advertise its knowledge of one or more
    /// objects. It can be received unsolicited, or in reply to
    /// `getblocks`.
    Inv(Vec<InventoryHash>),

    /// A `getheaders` message.
    ///
    /// Like `getblocks`, but the peer replies with a `headers` batch of up to
    /// 2000 block headers instead of announcing inventory.
    GetHeaders(GetHeaders),

    /// A `headers` message.
    ///
    /// Returns block headers in response to a getheaders packet. Kept as a
    /// validated raw batch, since header records change size at the KAWPOW
    /// activation boundary and each record's stride must be chosen by its own
    /// timestamp.
    Headers(HeadersBatch),

    /// A `getdata` message.
    ///
    /// `getdata` is used in response to `inv`, to retrieve the content of a
    /// specific object, and is usually sent after receiving an `inv` packet,
    /// after filtering known elements.
    GetData(Vec<InventoryHash>),

    /// A `tx` message.
    Tx(Arc<Transaction>),

    /// A `notfound` message.
    ///
    /// Sent back by the remote node for `getdata` entries it cannot serve.
    NotFound(Vec<InventoryHash>),

    /// A `mempool` message.
    ///
    /// This was defined in [BIP35], asking the remote node to announce its
    /// unconfirmed transactions through the loaded bloom filter.
    ///
    /// [BIP35]: https://github.com/bitcoin/bips/blob/master/bip-0035.mediawiki
    Mempool,

    /// A `filterload` message, as defined in [BIP37].
    ///
    /// The wallet layer owns bloom-filter construction, so the payload is
    /// carried opaquely and written to the wire as-is.
    ///
    /// [BIP37]: https://github.com/bitcoin/bips/blob/master/bip-0037.mediawiki
    FilterLoad(Vec<u8>),

    /// A `merkleblock` message.
    ///
    /// A reply to a `getdata` that requested a filtered block: the block
    /// header plus a partial merkle tree proving which transactions matched
    /// the loaded bloom filter. Matching transactions follow as separate
    /// `tx` messages.
    MerkleBlock(MerkleBlock),

    /// A `feefilter` message, as defined in [BIP133].
    ///
    /// The minimum fee rate, in satoshis per kilobyte, below which the remote
    /// peer asks us not to relay transactions.
    ///
    /// [BIP133]: https://github.com/bitcoin/bips/blob/master/bip-0133.mediawiki
    FeeFilter(u64),

    /// A `getassetdata` message: the Ravencoin extension querying metadata
    /// for a list of asset names.
    GetAssetData(GetAssetData),

    /// An `assetdata` reply. `None` means the queried asset does not exist;
    /// the wire encodes that case as a reserved asset name which never leaks
    /// above the parser.
    AssetData(Option<AssetData>),

    /// A syntactically valid message whose command this node does not
    /// implement. Logged and ignored.
    Unknown {
        /// The raw command field.
        command: [u8; 12],
    },
}

/// Reject Reason CCodes
///
/// [BIP61]: https://github.com/bitcoin/bips/blob/master/bip-0061.mediawiki
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RejectReason {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    Nonstandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
    Other = 0x50,
}

impl RejectReason {
    /// Decode a ccode byte; unknown codes collapse to `Other` so a sloppy
    /// peer's reject cannot kill the session.
    pub fn from_code(code: u8) -> RejectReason {
        match code {
            0x01 => RejectReason::Malformed,
            0x10 => RejectReason::Invalid,
            0x11 => RejectReason::Obsolete,
            0x12 => RejectReason::Duplicate,
            0x40 => RejectReason::Nonstandard,
            0x41 => RejectReason::Dust,
            0x42 => RejectReason::InsufficientFee,
            0x43 => RejectReason::Checkpoint,
            _ => RejectReason::Other,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Unknown { command } => {
                let len = command.iter().position(|&b| b == 0).unwrap_or(12);
                f.write_str(&String::from_utf8_lossy(&command[..len]))
            }
            known => write!(
                f,
                "{}",
                known
                    .command()
                    .expect("every non-unknown message has a command")
            ),
        }
    }
}

impl Message {
    /// The wire command for this message, or `None` for [`Message::Unknown`].
    pub fn command(&self) -> Option<Command> {
        let command = match self {
            Message::Addr { .. } => Command::Addr,
            Message::AssetData { .. } => Command::AssetData,
            Message::FeeFilter { .. } => Command::FeeFilter,
            Message::FilterLoad { .. } => Command::FilterLoad,
            Message::GetAddr => Command::GetAddr,
            Message::GetAssetData { .. } => Command::GetAssetData,
            Message::GetBlocks { .. } => Command::GetBlocks,
            Message::GetData { .. } => Command::GetData,
            Message::GetHeaders { .. } => Command::GetHeaders,
            Message::Headers { .. } => Command::Headers,
            Message::Inv { .. } => Command::Inv,
            Message::Mempool => Command::Mempool,
            Message::MerkleBlock { .. } => Command::MerkleBlock,
            Message::NotFound { .. } => Command::NotFound,
            Message::Ping { .. } => Command::Ping,
            Message::Pong { .. } => Command::Pong,
            Message::Reject { .. } => Command::Reject,
            Message::Tx { .. } => Command::Tx,
            Message::Verack => Command::Verack,
            Message::Version { .. } => Command::Version,
            Message::Unknown { .. } => return None,
        };
        Some(command)
    }
}

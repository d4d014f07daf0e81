use std::sync::Arc;

use raven_chain::block;
use raven_chain::transaction::{self, Transaction};

use crate::meta_addr::MetaAddr;
use crate::protocol::external::message::{AssetData, MerkleBlock};

use super::error::PeerError;

/// Completion callback for an outstanding `ping`; the argument is false when
/// the session dies before the matching `pong` arrives.
pub type PongCallback = Box<dyn FnOnce(bool) + Send>;

/// Completion callback for a `mempool` synchronization request.
pub type MempoolCallback = Box<dyn FnOnce(bool) + Send>;

/// One-shot reply to a `getassetdata` request; `None` means the asset does
/// not exist.
pub type AssetCallback = Box<dyn FnOnce(Option<AssetData>) + Send>;

/// The capability record through which a session reports to its owner.
///
/// Every operation defaults to a no-op, so an owner implements only what it
/// needs. Callbacks are invoked from the session's receive task, one at a
/// time, in wire order.
pub trait PeerEvents: Send + Sync {
    /// The version/verack handshake completed.
    fn connected(&self) {}

    /// The session ended; no further callbacks will fire.
    fn disconnected(&self, _error: PeerError) {}

    /// An `addr` message delivered usable gossip entries.
    fn relayed_peers(&self, _peers: Vec<MetaAddr>) {}

    /// A `tx` message arrived.
    fn relayed_tx(&self, _tx: Arc<Transaction>) {}

    /// An `inv` announced a transaction we already know.
    fn has_tx(&self, _hash: transaction::Hash) {}

    /// The remote peer rejected a transaction (BIP61).
    fn rejected_tx(&self, _hash: transaction::Hash, _code: u8) {}

    /// A block arrived: a fully assembled merkle block, or a header from
    /// chain sync.
    fn relayed_block(&self, _block: MerkleBlock) {}

    /// The remote peer could not serve some requested items.
    fn notfound(&self, _tx_hashes: Vec<transaction::Hash>, _block_hashes: Vec<block::Hash>) {}

    /// The remote peer announced its minimum relay fee rate.
    fn set_fee_per_kb(&self, _fee_per_kb: u64) {}

    /// The remote peer asked for one of our transactions via `getdata`.
    fn requested_tx(&self, _hash: transaction::Hash) -> Option<Arc<Transaction>> {
        None
    }

    /// Polled before connecting; return false to hold the connection attempt
    /// until the network comes back.
    fn network_is_reachable(&self) -> bool {
        true
    }

    /// The receive task is exiting; release any owner-side resources tied to
    /// it.
    fn thread_cleanup(&self) {}
}

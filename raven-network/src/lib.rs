//! A single-peer Ravencoin SPV session.
//!
//! This crate maintains one authenticated TCP session to a remote Ravencoin
//! node: it frames and checksums wire messages, drives the version/verack
//! handshake, and runs the receive loop whose per-message acceptors implement
//! the SPV chain-download and mempool-synchronization state machine. The
//! owner observes the session through a capability record of optional
//! callbacks and steers it through the request methods on [`Peer`].
//!
//! Multi-peer coordination, wallet and bloom-filter construction, full
//! transaction parsing, and the native proof-of-work hash functions are all
//! collaborators that plug in from outside.

pub mod constants;
pub mod protocol;

mod meta_addr;
mod peer;
mod timing;

pub use meta_addr::MetaAddr;
pub use peer::{
    AssetCallback, Config, MempoolCallback, Peer, PeerError, PeerEvents, PeerStatus, PongCallback,
};
pub use protocol::external::{Codec, InventoryHash, Message};

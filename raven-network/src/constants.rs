//! Definitions of constants.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::protocol::external::types::{Magic, PeerServices, ProtocolVersion};

/// The protocol version spoken by this node.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion(70_027);

/// The lowest remote protocol version we are willing to talk to; earlier
/// peers predate the v0.9 tx fee relay rules.
pub const MIN_VERSION: ProtocolVersion = ProtocolVersion(70_026);

/// The user agent advertised in our `version` message.
pub const USER_AGENT: &str = "/raven-spv:0.1.0/";

/// The services we advertise: none, an SPV node serves no blocks.
pub const ENABLED_SERVICES: PeerServices = PeerServices::empty();

/// The length of the wire message header.
pub const HEADER_LEN: usize = 24;

/// Maximum size of a message payload.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 0x0200_0000;

/// Maximum number of inventory items in a single `inv`, `getdata`, or
/// `notfound` message, and the cap on the remembered block-hash ring.
pub const MAX_GETDATA_HASHES: usize = 50_000;

/// Sanity cap on transaction announcements in a single `inv`.
pub const MAX_INV_TX_HASHES: usize = 10_000;

/// Maximum gossip entries accepted from a single `addr` message.
pub const MAX_ADDRS_PER_MESSAGE: usize = 1_000;

/// Maximum headers in a single `headers` message.
pub const MAX_HEADERS_PER_MESSAGE: usize = 2_000;

/// Largest transaction we will serve in response to `getdata`.
pub const MAX_TX_SIZE: usize = 100_000;

/// Largest `assetdata` payload we will look at.
pub const MAX_ASSET_PAYLOAD_LEN: usize = 16_898;

/// Deadline for establishing the TCP connection and completing the
/// handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for receiving the body of a message once its header has been
/// read, refreshed whenever body bytes arrive.
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the `inv` that answers a `mempool` request before
/// fencing the request with a ping.
pub const MEMPOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the receive task re-evaluates its deadlines while idle.
pub const DEADLINE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The local address advertised in our `version` message.
pub const LOCAL_HOST: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);

/// Network magics: the first four bytes of every message, as they appear on
/// the wire.
pub mod magics {
    use super::Magic;

    /// "RAVN"
    pub const MAINNET: Magic = Magic([0x52, 0x41, 0x56, 0x4e]);
    /// "RVNT"
    pub const TESTNET: Magic = Magic([0x52, 0x56, 0x4e, 0x54]);
    /// "CROW"
    pub const REGTEST: Magic = Magic([0x43, 0x52, 0x4f, 0x57]);
}

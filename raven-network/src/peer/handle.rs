use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, Instrument};

use raven_chain::block;
use raven_chain::parameters::Network;
use raven_chain::transaction;
use raven_chain::work::PowHasher;

use crate::constants;
use crate::meta_addr::MetaAddr;
use crate::timing::Deadline;

use super::connection::Connection;
use super::connector;
use super::event::{AssetCallback, MempoolCallback, PeerEvents, PongCallback};

/// The connection state of a peer session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PeerStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl PeerStatus {
    fn from_u8(value: u8) -> PeerStatus {
        match value {
            2 => PeerStatus::Connected,
            1 => PeerStatus::Connecting,
            _ => PeerStatus::Disconnected,
        }
    }
}

/// Session configuration.
///
/// The defaults match the production protocol; tests shrink the timeouts.
#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    /// The user agent advertised in our `version` message.
    pub user_agent: String,
    /// Deadline for the TCP connect and the handshake that follows it.
    pub connect_timeout: Duration,
    /// Deadline for a message body once its header has been read.
    pub message_timeout: Duration,
    /// How long to wait for a mempool response before fencing with a ping.
    pub mempool_timeout: Duration,
}

impl Config {
    pub fn new(network: Network) -> Config {
        Config {
            network,
            user_agent: constants::USER_AGENT.to_owned(),
            connect_timeout: constants::CONNECT_TIMEOUT,
            message_timeout: constants::MESSAGE_TIMEOUT,
            mempool_timeout: constants::MEMPOOL_TIMEOUT,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(Network::Mainnet)
    }
}

/// Owner requests, serialized through a channel into the receive task.
///
/// Routing every request through the task keeps all non-atomic session state
/// owned by a single task; the owner-facing scalars live in [`SharedState`]
/// as atomics.
pub(crate) enum Request {
    FilterLoad(Vec<u8>),
    Mempool {
        known_tx_hashes: Vec<transaction::Hash>,
        done: Option<MempoolCallback>,
    },
    GetHeaders {
        locators: Vec<block::Hash>,
        stop_hash: Option<block::Hash>,
    },
    GetBlocks {
        locators: Vec<block::Hash>,
        stop_hash: Option<block::Hash>,
    },
    Inv {
        tx_hashes: Vec<transaction::Hash>,
    },
    GetData {
        tx_hashes: Vec<transaction::Hash>,
        block_hashes: Vec<block::Hash>,
    },
    GetAsset {
        name: String,
        reply: AssetCallback,
    },
    GetAddr,
    Ping(Option<PongCallback>),
    RerequestBlocks {
        from_block: block::Hash,
    },
}

/// Session state shared between the receive task and owner tasks.
///
/// Only small scalars live here; everything else is owned by the receive
/// task and mutated solely from it.
pub(crate) struct SharedState {
    status: AtomicU8,
    version: AtomicU32,
    lastblock: AtomicU32,
    fee_per_kb: AtomicU64,
    /// f64 bits; starts at infinity until the handshake measures it.
    ping_time: AtomicU64,
    needs_filter_update: AtomicBool,
    current_block_height: AtomicU32,
    earliest_key_time: AtomicU32,
    waiting_for_network: AtomicBool,
    closed: AtomicBool,
    useragent: Mutex<String>,
    pub(crate) shutdown: Notify,
    pub(crate) disconnect_deadline: Deadline,
}

impl SharedState {
    pub(crate) fn new() -> SharedState {
        SharedState {
            status: AtomicU8::new(0),
            version: AtomicU32::new(0),
            lastblock: AtomicU32::new(0),
            fee_per_kb: AtomicU64::new(0),
            ping_time: AtomicU64::new(f64::INFINITY.to_bits()),
            needs_filter_update: AtomicBool::new(false),
            current_block_height: AtomicU32::new(0),
            earliest_key_time: AtomicU32::new(0),
            waiting_for_network: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            useragent: Mutex::new(String::new()),
            shutdown: Notify::new(),
            disconnect_deadline: Deadline::unarmed(),
        }
    }

    pub(crate) fn status(&self) -> PeerStatus {
        PeerStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub(crate) fn set_status(&self, status: PeerStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    pub(crate) fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub(crate) fn lastblock(&self) -> u32 {
        self.lastblock.load(Ordering::SeqCst)
    }

    pub(crate) fn set_lastblock(&self, height: u32) {
        self.lastblock.store(height, Ordering::SeqCst);
    }

    pub(crate) fn fee_per_kb(&self) -> u64 {
        self.fee_per_kb.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fee_per_kb(&self, rate: u64) {
        self.fee_per_kb.store(rate, Ordering::SeqCst);
    }

    pub(crate) fn ping_time(&self) -> f64 {
        f64::from_bits(self.ping_time.load(Ordering::SeqCst))
    }

    pub(crate) fn set_ping_time(&self, seconds: f64) {
        self.ping_time.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub(crate) fn needs_filter_update(&self) -> bool {
        self.needs_filter_update.load(Ordering::SeqCst)
    }

    pub(crate) fn set_needs_filter_update(&self, needs: bool) {
        self.needs_filter_update.store(needs, Ordering::SeqCst);
    }

    pub(crate) fn current_block_height(&self) -> u32 {
        self.current_block_height.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current_block_height(&self, height: u32) {
        self.current_block_height.store(height, Ordering::SeqCst);
    }

    pub(crate) fn earliest_key_time(&self) -> u32 {
        self.earliest_key_time.load(Ordering::SeqCst)
    }

    pub(crate) fn set_earliest_key_time(&self, time: u32) {
        self.earliest_key_time.store(time, Ordering::SeqCst);
    }

    pub(crate) fn waiting_for_network(&self) -> bool {
        self.waiting_for_network.load(Ordering::SeqCst)
    }

    pub(crate) fn set_waiting_for_network(&self, waiting: bool) {
        self.waiting_for_network.store(waiting, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_closed(&self, closed: bool) {
        self.closed.store(closed, Ordering::SeqCst);
    }

    pub(crate) fn useragent(&self) -> String {
        self.useragent.lock().expect("useragent lock poisoned").clone()
    }

    pub(crate) fn set_useragent(&self, useragent: String) {
        *self.useragent.lock().expect("useragent lock poisoned") = useragent;
    }
}

/// A handle to one remote peer.
///
/// Cheap to clone; all clones drive the same session. A peer is created
/// `Disconnected`, connected at most once at a time, and may be reconnected
/// after the previous session has fully torn down.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<Inner>,
}

struct Inner {
    meta: MetaAddr,
    config: Config,
    events: Arc<dyn PeerEvents>,
    pow: Arc<dyn PowHasher>,
    state: Arc<SharedState>,
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    host: OnceLock<String>,
}

impl Peer {
    pub fn new(
        meta: MetaAddr,
        config: Config,
        events: Arc<dyn PeerEvents>,
        pow: Arc<dyn PowHasher>,
    ) -> Peer {
        Peer {
            inner: Arc::new(Inner {
                meta,
                config,
                events,
                pow,
                state: Arc::new(SharedState::new()),
                requests: Mutex::new(None),
                host: OnceLock::new(),
            }),
        }
    }

    /// The address-with-metadata this peer was created from.
    pub fn meta(&self) -> MetaAddr {
        self.inner.meta
    }

    /// The canonical textual form of the peer address, computed once.
    pub fn host(&self) -> &str {
        self.inner.host.get_or_init(|| match self.inner.meta.addr.ip() {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => match v6.to_ipv4() {
                Some(v4) => v4.to_string(),
                None => v6.to_string(),
            },
        })
    }

    pub fn status(&self) -> PeerStatus {
        self.inner.state.status()
    }

    /// The protocol version negotiated with the remote peer.
    pub fn version(&self) -> u32 {
        self.inner.state.version()
    }

    /// The remote peer's user agent string.
    pub fn user_agent(&self) -> String {
        self.inner.state.useragent()
    }

    /// The tip height the remote peer advertised in its `version`.
    pub fn last_block(&self) -> block::Height {
        block::Height(self.inner.state.lastblock())
    }

    /// The low-pass-filtered ping round-trip estimate, in seconds. Infinite
    /// until the handshake completes.
    pub fn ping_time(&self) -> f64 {
        self.inner.state.ping_time()
    }

    /// The minimum relay fee rate the remote peer advertised.
    pub fn fee_per_kb(&self) -> u64 {
        self.inner.state.fee_per_kb()
    }

    /// Open the connection and perform the handshake on a dedicated task.
    pub fn connect(&self) {
        let state = &self.inner.state;
        if state.status() != PeerStatus::Disconnected && !state.waiting_for_network() {
            return;
        }
        state.set_status(PeerStatus::Connecting);

        // Delay until the network is reachable.
        if !self.inner.events.network_is_reachable() {
            if !state.waiting_for_network() {
                info!(addr = %self.host(), "waiting for network reachability");
            }
            state.set_waiting_for_network(true);
            return;
        }
        state.set_waiting_for_network(false);
        state.set_closed(false);

        // The handshake must complete before this deadline; the owner
        // extends it with schedule_disconnect once connected.
        state.disconnect_deadline.arm_in(self.inner.config.connect_timeout);

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        *self.inner.requests.lock().expect("request lock poisoned") = Some(request_tx);

        let peer = self.clone();
        tokio::spawn(async move { peer.run_session(request_rx).await });
    }

    /// Close the connection, if any. Safe to call repeatedly and from any
    /// task; the receive task observes the request and tears down.
    pub fn disconnect(&self) {
        self.inner.state.set_closed(true);
        self.inner.state.shutdown.notify_one();
    }

    /// (Re)schedule an absolute disconnect deadline, or cancel it with
    /// `None`. Useful as a sync-phase watchdog.
    pub fn schedule_disconnect(&self, after: Option<Duration>) {
        match after {
            Some(after) => self.inner.state.disconnect_deadline.arm_in(after),
            None => self.inner.state.disconnect_deadline.clear(),
        }
    }

    /// Call when wallet addresses need to be added to the bloom filter;
    /// suppresses further block requests until a new filter is loaded.
    pub fn set_needs_filter_update(&self, needs: bool) {
        self.inner.state.set_needs_filter_update(needs);
    }

    /// Call when the local block height changes; used to detect tarpit
    /// nodes.
    pub fn set_current_block_height(&self, height: block::Height) {
        self.inner.state.set_current_block_height(height.0);
    }

    /// Set to the wallet creation time to speed up initial sync: headers
    /// older than a week before it are never downloaded as blocks.
    pub fn set_earliest_key_time(&self, time: u32) {
        self.inner.state.set_earliest_key_time(time);
    }

    pub fn send_filterload(&self, filter: Vec<u8>) {
        if self.request(Request::FilterLoad(filter)).is_err() {
            debug!("dropping filterload, peer is not connected");
        }
    }

    /// Request the remote node's mempool through the loaded filter. `done`
    /// fires with true once the mempool has been relayed, or false on
    /// failure.
    pub fn send_mempool(
        &self,
        known_tx_hashes: Vec<transaction::Hash>,
        done: Option<MempoolCallback>,
    ) {
        if let Err(request) = self.request(Request::Mempool {
            known_tx_hashes,
            done,
        }) {
            if let Request::Mempool { done: Some(done), .. } = request {
                done(false);
            }
        }
    }

    pub fn send_getheaders(&self, locators: Vec<block::Hash>, stop_hash: Option<block::Hash>) {
        if self
            .request(Request::GetHeaders {
                locators,
                stop_hash,
            })
            .is_err()
        {
            debug!("dropping getheaders, peer is not connected");
        }
    }

    pub fn send_getblocks(&self, locators: Vec<block::Hash>, stop_hash: Option<block::Hash>) {
        if self
            .request(Request::GetBlocks {
                locators,
                stop_hash,
            })
            .is_err()
        {
            debug!("dropping getblocks, peer is not connected");
        }
    }

    /// Announce transactions the remote peer has not yet been told about.
    pub fn send_inv(&self, tx_hashes: Vec<transaction::Hash>) {
        if self.request(Request::Inv { tx_hashes }).is_err() {
            debug!("dropping inv, peer is not connected");
        }
    }

    pub fn send_getdata(
        &self,
        tx_hashes: Vec<transaction::Hash>,
        block_hashes: Vec<block::Hash>,
    ) {
        if self
            .request(Request::GetData {
                tx_hashes,
                block_hashes,
            })
            .is_err()
        {
            debug!("dropping getdata, peer is not connected");
        }
    }

    /// Query metadata for one asset name; `reply` fires exactly once unless
    /// the session dies first.
    pub fn send_get_asset(&self, name: String, reply: AssetCallback) {
        if let Err(request) = self.request(Request::GetAsset { name, reply }) {
            if let Request::GetAsset { reply, .. } = request {
                reply(None);
            }
        }
    }

    pub fn send_getaddr(&self) {
        if self.request(Request::GetAddr).is_err() {
            debug!("dropping getaddr, peer is not connected");
        }
    }

    /// Send a timed ping; `done` fires when the matching pong arrives, in
    /// FIFO order with other outstanding pings.
    pub fn send_ping(&self, done: PongCallback) {
        if let Err(request) = self.request(Request::Ping(Some(done))) {
            if let Request::Ping(Some(done)) = request {
                done(false);
            }
        }
    }

    /// Re-request remembered blocks starting at `from_block`; useful to pick
    /// up additional matches after a bloom filter update.
    pub fn rerequest_blocks(&self, from_block: block::Hash) {
        if self.request(Request::RerequestBlocks { from_block }).is_err() {
            debug!("dropping block re-request, peer is not connected");
        }
    }

    fn request(&self, request: Request) -> Result<(), Request> {
        let guard = self.inner.requests.lock().expect("request lock poisoned");
        match guard.as_ref() {
            Some(sender) => sender.send(request).map_err(|failed| failed.0),
            None => Err(request),
        }
    }

    async fn run_session(self, requests: mpsc::UnboundedReceiver<Request>) {
        let span = tracing::info_span!("peer", addr = %self.host());
        async {
            let connect = connector::connect(
                &self.inner.meta,
                self.inner.config.connect_timeout,
                &self.inner.state,
            );
            let error = match connect.await {
                Ok(stream) => {
                    info!("socket connected");
                    Connection::new(
                        stream,
                        self.inner.meta,
                        self.inner.config.clone(),
                        self.inner.state.clone(),
                        self.inner.events.clone(),
                        self.inner.pow.clone(),
                        requests,
                    )
                    .run()
                    .await
                }
                Err(error) => {
                    self.inner.state.set_status(PeerStatus::Disconnected);
                    error
                }
            };

            *self.inner.requests.lock().expect("request lock poisoned") = None;
            info!(%error, "disconnected");
            self.inner.events.disconnected(error);
            self.inner.events.thread_cleanup();
        }
        .instrument(span)
        .await
    }
}

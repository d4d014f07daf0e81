//! The per-peer receive task.
//!
//! One task owns the framed stream and every piece of non-atomic session
//! state. Messages are accepted strictly in wire order; owner requests
//! arrive through a channel and interleave between messages. Deadlines are
//! re-evaluated on a one-second tick, the async analog of the original
//! one-second socket timeout.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use raven_chain::block;
use raven_chain::parameters::{Network, BLOCK_MAX_TIME_DRIFT};
use raven_chain::transaction::{self, Transaction};
use raven_chain::work::PowHasher;

use crate::constants;
use crate::meta_addr::MetaAddr;
use crate::protocol::external::message::{
    AssetData, GetAssetData, GetBlocks, GetHeaders, HeadersBatch, MerkleBlock, RejectReason,
    Version,
};
use crate::protocol::external::types::{Nonce, PeerServices};
use crate::protocol::external::{Codec, InventoryHash, Message};
use crate::timing::Deadline;

use super::error::PeerError;
use super::event::{AssetCallback, PeerEvents, PongCallback};
use super::handle::{Config, PeerStatus, Request, SharedState};

/// Seven days plus the allowed block time drift: the slack used when
/// deciding whether a header is recent enough to matter to the wallet.
const WEEK_AND_DRIFT: u64 = 7 * 24 * 60 * 60 + BLOCK_MAX_TIME_DRIFT as u64;

pub(crate) struct Connection<S> {
    framed: Framed<S, Codec>,
    network: Network,
    config: Config,
    meta: MetaAddr,
    state: Arc<SharedState>,
    events: Arc<dyn PeerEvents>,
    pow: Arc<dyn PowHasher>,
    requests: mpsc::UnboundedReceiver<Request>,

    /// The nonce our `version` and `ping`s carry; `pong`s must echo it.
    nonce: Nonce,
    /// Set when `version` or a timed `ping` is sent; cleared when the
    /// response arrives and feeds the round-trip estimate.
    start_time: Option<Instant>,

    sent_verack: bool,
    got_verack: bool,
    sent_getaddr: bool,
    sent_filter: bool,
    sent_getdata: bool,
    sent_mempool: bool,
    sent_getblocks: bool,

    /// The most recent single-hash block announcement, for de-duplicating
    /// the tip inv the remote repeats after each batch.
    last_block_hash: block::Hash,

    /// Transactions the remote peer already knows about. The vector keeps
    /// insertion order for inv construction; the set mirrors it for O(1)
    /// membership. The two always hold the same hashes.
    known_tx_hashes: Vec<transaction::Hash>,
    known_tx_hash_set: HashSet<transaction::Hash>,

    /// Recently announced blocks, kept for re-requesting after a filter
    /// update; bounded by dropping the oldest third.
    known_block_hashes: Vec<block::Hash>,

    /// The merkle block whose matched transactions have not all arrived,
    /// and the hashes still expected, in reverse order so arrivals pop
    /// cheaply from the tail.
    current_block: Option<MerkleBlock>,
    current_block_tx_hashes: Vec<transaction::Hash>,

    /// Callbacks awaiting pongs, fired strictly in FIFO order.
    pong_queue: VecDeque<Option<PongCallback>>,

    /// The pending mempool-sync completion and its expiry.
    mempool_reply: Option<PongCallback>,
    mempool_deadline: Option<Instant>,

    /// The pending assetdata one-shot.
    asset_reply: Option<AssetCallback>,

    /// Armed by the codec while a message body is in flight.
    message_deadline: Arc<Deadline>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(
        stream: S,
        meta: MetaAddr,
        config: Config,
        state: Arc<SharedState>,
        events: Arc<dyn PeerEvents>,
        pow: Arc<dyn PowHasher>,
        requests: mpsc::UnboundedReceiver<Request>,
    ) -> Connection<S> {
        let message_deadline = Arc::new(Deadline::unarmed());
        let codec = Codec::builder()
            .for_network(config.network)
            .with_body_deadline(message_deadline.clone(), config.message_timeout)
            .finish();

        Connection {
            framed: Framed::new(stream, codec),
            network: config.network,
            config,
            meta,
            state,
            events,
            pow,
            requests,
            nonce: Nonce(0),
            start_time: None,
            sent_verack: false,
            got_verack: false,
            sent_getaddr: false,
            sent_filter: false,
            sent_getdata: false,
            sent_mempool: false,
            sent_getblocks: false,
            last_block_hash: block::Hash::ZERO,
            known_tx_hashes: Vec::new(),
            known_tx_hash_set: HashSet::new(),
            known_block_hashes: Vec::new(),
            current_block: None,
            current_block_tx_hashes: Vec::new(),
            pong_queue: VecDeque::new(),
            mempool_reply: None,
            mempool_deadline: None,
            asset_reply: None,
            message_deadline,
        }
    }

    /// Run the session to completion and return the reason it ended.
    ///
    /// On exit the session is fully torn down: status is `Disconnected` and
    /// every outstanding completion callback has fired with failure. The
    /// caller surfaces the returned error through `disconnected`.
    pub(crate) async fn run(mut self) -> PeerError {
        let error = self.session().await;

        self.state.set_status(PeerStatus::Disconnected);
        while let Some(entry) = self.pong_queue.pop_front() {
            if let Some(done) = entry {
                done(false);
            }
        }
        if let Some(done) = self.mempool_reply.take() {
            done(false);
        }

        error
    }

    async fn session(&mut self) -> PeerError {
        if let Err(error) = self.send_version().await {
            return error;
        }

        let mut tick = tokio::time::interval(constants::DEADLINE_POLL_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.state.is_closed() {
                return PeerError::Closed;
            }

            tokio::select! {
                _ = self.state.shutdown.notified() => {
                    if self.state.is_closed() {
                        return PeerError::Closed;
                    }
                }
                next = self.framed.next() => match next {
                    None => return PeerError::ConnectionReset,
                    Some(Err(error)) => return error.into(),
                    Some(Ok(message)) => {
                        if let Err(error) = self.accept_message(message).await {
                            return error;
                        }
                    }
                },
                request = self.requests.recv() => match request {
                    None => return PeerError::Closed,
                    Some(request) => {
                        if let Err(error) = self.handle_request(request).await {
                            return error;
                        }
                    }
                },
                _ = tick.tick() => {
                    if let Err(error) = self.check_deadlines().await {
                        return error;
                    }
                }
            }
        }
    }

    async fn check_deadlines(&mut self) -> Result<(), PeerError> {
        if self.state.disconnect_deadline.expired() || self.message_deadline.expired() {
            return Err(PeerError::Timeout);
        }
        if let Some(at) = self.mempool_deadline {
            if Instant::now() >= at {
                debug!("done waiting for mempool response");
                self.mempool_deadline = None;
                let done = self.mempool_reply.take();
                self.send_ping_message(done).await?;
            }
        }
        Ok(())
    }

    // ======== Message dispatch =========

    async fn accept_message(&mut self, message: Message) -> Result<(), PeerError> {
        // Once a merkleblock is in flight, the remote node sends the matched
        // transactions back-to-back; any other message means the block can
        // never complete.
        if self.current_block.is_some() && !matches!(message, Message::Tx(_)) {
            warn!(
                expected = self.current_block_tx_hashes.len(),
                got = %message,
                "incomplete merkleblock",
            );
            self.current_block = None;
            self.current_block_tx_hashes.clear();
            return Err(PeerError::Protocol("incomplete merkleblock"));
        }

        match message {
            Message::Version(version) => self.accept_version(version).await,
            Message::Verack => self.accept_verack(),
            Message::Addr(addrs) => self.accept_addr(addrs),
            Message::Inv(items) => self.accept_inv(items).await,
            Message::Tx(tx) => self.accept_tx(tx),
            Message::Headers(batch) => self.accept_headers(batch).await,
            Message::GetAddr => self.accept_getaddr().await,
            Message::GetData(items) => self.accept_getdata(items).await,
            Message::NotFound(items) => self.accept_notfound(items),
            Message::Ping(nonce) => self.accept_ping(nonce).await,
            Message::Pong(nonce) => self.accept_pong(nonce),
            Message::MerkleBlock(block) => self.accept_merkleblock(block),
            Message::Reject {
                message,
                ccode,
                reason,
                data,
            } => self.accept_reject(message, ccode, reason, data),
            Message::FeeFilter(rate) => self.accept_feefilter(rate),
            Message::AssetData(asset) => self.accept_assetdata(asset),
            other => {
                debug!(command = %other, "dropping message, not implemented");
                Ok(())
            }
        }
    }

    // ======== Handshake =========

    async fn send_version(&mut self) -> Result<(), PeerError> {
        self.nonce = Nonce::default();
        self.start_time = Some(Instant::now());

        let version = Version::new(
            constants::CURRENT_VERSION,
            self.meta.addr,
            self.meta.services,
            constants::ENABLED_SERVICES,
            (constants::LOCAL_HOST, self.network.default_port()).into(),
            self.nonce,
            self.config.user_agent.clone(),
            // An SPV node has no blocks to advertise.
            block::Height(0),
            false,
        );
        self.send(Message::Version(version)).await
    }

    async fn accept_version(&mut self, version: Version) -> Result<(), PeerError> {
        if version.version < constants::MIN_VERSION {
            warn!(version = %version.version, "protocol version not supported");
            return Err(PeerError::Protocol("protocol version not supported"));
        }

        self.state.set_version(version.version.0);
        self.state.set_lastblock(version.best_block.0);
        self.state.set_useragent(version.user_agent.clone());
        debug!(version = %version.version, useragent = %version.user_agent, "got version");

        self.send(Message::Verack).await?;
        self.sent_verack = true;
        self.check_handshake();
        Ok(())
    }

    fn accept_verack(&mut self) -> Result<(), PeerError> {
        if self.got_verack {
            debug!("got unexpected verack");
            return Ok(());
        }
        // Use the verack round trip as the initial ping estimate.
        if let Some(started) = self.start_time.take() {
            let elapsed = started.elapsed().as_secs_f64();
            self.state.set_ping_time(elapsed);
            debug!(seconds = elapsed, "got verack");
        }
        self.got_verack = true;
        self.check_handshake();
        Ok(())
    }

    fn check_handshake(&mut self) {
        if self.sent_verack && self.got_verack && self.state.status() == PeerStatus::Connecting {
            info!("handshake completed");
            self.state.disconnect_deadline.clear();
            self.state.set_status(PeerStatus::Connected);
            info!(lastblock = self.state.lastblock(), "connected");
            self.events.connected();
        }
    }

    // ======== Address gossip =========

    fn accept_addr(&mut self, addrs: Vec<MetaAddr>) -> Result<(), PeerError> {
        // Simple anti-tarpitting tactic: don't accept unsolicited addresses.
        if !self.sent_getaddr {
            return Ok(());
        }
        if addrs.len() > constants::MAX_ADDRS_PER_MESSAGE {
            warn!(count = addrs.len(), "dropping addr message, too many addresses");
            return Ok(());
        }
        debug!(count = addrs.len(), "got addr");

        let now = Utc::now();
        let peers: Vec<MetaAddr> = addrs
            .into_iter()
            // Skip peers that don't carry full blocks, and non-IPv4 peers.
            .filter(|addr| addr.services.contains(PeerServices::NODE_NETWORK))
            .filter(|addr| addr.is_ipv4())
            .map(|addr| addr.sanitize_gossip_time(now))
            .collect();

        if !peers.is_empty() {
            self.events.relayed_peers(peers);
        }
        Ok(())
    }

    async fn accept_getaddr(&mut self) -> Result<(), PeerError> {
        debug!("got getaddr");
        // We track no address book of our own; answer with an empty list.
        self.send(Message::Addr(Vec::new())).await
    }

    // ======== Inventory =========

    async fn accept_inv(&mut self, items: Vec<InventoryHash>) -> Result<(), PeerError> {
        if items.len() > constants::MAX_GETDATA_HASHES {
            warn!(count = items.len(), "dropping inv message, too many items");
            return Ok(());
        }

        let mut announced_tx_hashes = Vec::new();
        let mut block_hashes: Vec<block::Hash> = Vec::new();
        for item in &items {
            // inv messages only carry tx or block entries.
            match item {
                InventoryHash::Tx(hash) => announced_tx_hashes.push(*hash),
                InventoryHash::Block(hash) => block_hashes.push(*hash),
                _ => {}
            }
        }
        debug!(count = items.len(), "got inv");

        if !announced_tx_hashes.is_empty()
            && !self.sent_filter
            && !self.sent_mempool
            && !self.sent_getblocks
        {
            return Err(PeerError::Protocol("got tx inv before loading a filter"));
        }
        if announced_tx_hashes.len() > constants::MAX_INV_TX_HASHES {
            return Err(PeerError::Protocol("too many transaction inv items"));
        }

        // Tarpit detection: a node that drips out a handful of blocks while
        // far behind its own advertised tip is stalling us on purpose.
        let current_height = self.state.current_block_height() as usize;
        if current_height > 0
            && block_hashes.len() > 2
            && block_hashes.len() < 500
            && current_height + self.known_block_hashes.len() + block_hashes.len()
                < self.state.lastblock() as usize
        {
            warn!(count = block_hashes.len(), "non-standard inv, fewer block hashes than expected");
            return Err(PeerError::Protocol("non-standard inv"));
        }

        if !self.sent_filter && !self.sent_getblocks {
            block_hashes.clear();
        }
        if block_hashes.len() == 1 && block_hashes[0] == self.last_block_hash {
            block_hashes.clear();
        }
        if block_hashes.len() == 1 {
            self.last_block_hash = block_hashes[0];
        }

        // Remember the hashes in case a filter update makes us re-request
        // them, trimming the oldest third past the cap.
        self.known_block_hashes.extend(block_hashes.iter().copied());
        while self.known_block_hashes.len() > constants::MAX_GETDATA_HASHES {
            let oldest_third = self.known_block_hashes.len() / 3;
            self.known_block_hashes.drain(0..oldest_third);
        }

        if self.state.needs_filter_update() {
            block_hashes.clear();
        }

        let mut fresh_tx_hashes = Vec::new();
        for hash in &announced_tx_hashes {
            if self.known_tx_hash_set.contains(hash) {
                self.events.has_tx(*hash);
            } else {
                fresh_tx_hashes.push(*hash);
            }
        }
        self.add_known_tx_hashes(&fresh_tx_hashes);

        if !fresh_tx_hashes.is_empty() || !block_hashes.is_empty() {
            self.send_getdata_message(fresh_tx_hashes, block_hashes.clone())
                .await?;
        }

        // To improve chain download performance, if we received a full batch
        // of block hashes, request the next batch without waiting for the
        // blocks themselves.
        if block_hashes.len() >= 500 {
            let locators = vec![
                *block_hashes.last().expect("batch is non-empty"),
                block_hashes[0],
            ];
            self.send_getblocks_message(locators, None).await?;
        }

        if !announced_tx_hashes.is_empty() && self.mempool_reply.is_some() {
            debug!("got initial mempool response");
            let done = self.mempool_reply.take();
            self.mempool_deadline = None;
            self.send_ping_message(done).await?;
        }

        Ok(())
    }

    // ======== Transactions and merkle blocks =========

    fn accept_tx(&mut self, tx: Arc<Transaction>) -> Result<(), PeerError> {
        if !self.sent_filter && !self.sent_getdata {
            return Err(PeerError::Protocol("got tx before loading a filter"));
        }
        let hash = tx.hash();
        debug!(%hash, "got tx");
        self.events.relayed_tx(tx);

        if self.current_block.is_some() {
            // We're collecting tx messages for a merkleblock; expected
            // hashes are queued in reverse so this scan usually stops at the
            // tail.
            if let Some(position) = self
                .current_block_tx_hashes
                .iter()
                .rposition(|expected| *expected == hash)
            {
                self.current_block_tx_hashes.remove(position);
            }
            if self.current_block_tx_hashes.is_empty() {
                // The entire block has arrived, including all matched tx.
                let block = self
                    .current_block
                    .take()
                    .expect("current_block checked above");
                self.events.relayed_block(block);
            }
        }
        Ok(())
    }

    fn accept_merkleblock(&mut self, block: MerkleBlock) -> Result<(), PeerError> {
        // Raven nodes don't support querying arbitrary historical
        // transactions; after a merkleblock the remote node is expected to
        // send tx messages for the matched hashes.
        let matches = match block.validate(Utc::now(), &*self.pow, self.network) {
            Ok(matches) => matches,
            Err(error) => {
                warn!(%error, "invalid merkleblock");
                return Err(PeerError::Protocol("invalid merkleblock"));
            }
        };
        if !self.sent_filter && !self.sent_getdata {
            return Err(PeerError::Protocol(
                "got merkleblock before loading a filter",
            ));
        }

        debug_assert!(self.current_block_tx_hashes.is_empty());
        // Reverse order for more efficient removal as tx arrive.
        for hash in matches.iter().rev() {
            if self.known_tx_hash_set.contains(hash) {
                continue;
            }
            self.current_block_tx_hashes.push(*hash);
        }

        if self.current_block_tx_hashes.is_empty() {
            self.events.relayed_block(block);
        } else {
            // Wait until we get all tx messages before processing the block.
            self.current_block = Some(block);
        }
        Ok(())
    }

    // ======== Headers sync =========

    async fn accept_headers(&mut self, batch: HeadersBatch) -> Result<(), PeerError> {
        let count = batch.len();
        debug!(count, "got headers");

        let timestamp_last = batch.last_timestamp() as u64;
        let earliest_key_time = self.state.earliest_key_time() as u64;

        // To improve chain download performance, a full batch triggers the
        // next getheaders immediately; once headers reach a week of the
        // wallet birthday the sync switches to filtered blocks.
        let wallet_horizon_reached =
            timestamp_last > 0 && timestamp_last + WEEK_AND_DRIFT >= earliest_key_time;
        if count < constants::MAX_HEADERS_PER_MESSAGE && !wallet_horizon_reached {
            warn!(count, "non-standard headers message, fewer headers than expected");
            return Err(PeerError::Protocol("non-standard headers message"));
        }

        let last_locator = self.header_locator(&batch, count - 1)?;
        let first_locator = self.header_locator(&batch, 0)?;

        if wallet_horizon_reached {
            // Request blocks for the remainder of the chain: advance to the
            // first header that is recent enough to matter and anchor the
            // locator there.
            let mut first_recent = 0;
            while first_recent + 1 < count
                && (batch.timestamp(first_recent) as u64) + WEEK_AND_DRIFT < earliest_key_time
            {
                first_recent += 1;
            }
            let anchor = self.header_locator(&batch, first_recent)?;
            self.send_getblocks_message(vec![anchor, first_locator], None)
                .await?;
        } else {
            self.send_getheaders_message(vec![last_locator, first_locator], None)
                .await?;
        }

        let now = Utc::now();
        let activation = self.network.kawpow_activation_time();
        for index in 0..count {
            let header = batch
                .header(index, activation)
                .map_err(PeerError::from)?;
            let block = MerkleBlock::from_header(header);
            if block.validate(now, &*self.pow, self.network).is_err() {
                warn!(index, "invalid block header");
                return Err(PeerError::Protocol("invalid block header"));
            }
            self.events.relayed_block(block);
        }
        Ok(())
    }

    /// The block hash of a batch record, by the proof-of-work rules its own
    /// timestamp selects.
    fn header_locator(
        &self,
        batch: &HeadersBatch,
        index: usize,
    ) -> Result<block::Hash, PeerError> {
        use raven_chain::serialization::sha256d;

        let timestamp = batch.timestamp(index);
        let prefix = batch.prefix80(index);
        if let Some((_height, nonce64, mix_hash)) = batch.kawpow_parts(index) {
            let header_hash = block::Hash(sha256d::digest(&prefix));
            self.pow
                .kawpow_light(header_hash, mix_hash, nonce64)
                .ok_or(PeerError::Protocol("kawpow light verification failed"))
        } else if timestamp >= self.network.x16rv2_activation_time() {
            Ok(self.pow.x16rv2(&prefix))
        } else {
            Ok(self.pow.x16r(&prefix))
        }
    }

    // ======== Serving getdata =========

    async fn accept_getdata(&mut self, items: Vec<InventoryHash>) -> Result<(), PeerError> {
        if items.len() > constants::MAX_GETDATA_HASHES {
            warn!(count = items.len(), "dropping getdata message, too many items");
            return Ok(());
        }
        debug!(count = items.len(), "got getdata");

        let mut notfound = Vec::new();
        for item in items {
            match item {
                InventoryHash::Tx(hash) => match self.events.requested_tx(hash) {
                    Some(tx) if tx.size() < constants::MAX_TX_SIZE => {
                        debug!(%hash, "publishing tx");
                        self.send(Message::Tx(tx)).await?;
                    }
                    _ => notfound.push(item),
                },
                other => notfound.push(other),
            }
        }

        if !notfound.is_empty() {
            self.send(Message::NotFound(notfound)).await?;
        }
        Ok(())
    }

    fn accept_notfound(&mut self, items: Vec<InventoryHash>) -> Result<(), PeerError> {
        if items.len() > constants::MAX_GETDATA_HASHES {
            warn!(count = items.len(), "dropping notfound message, too many items");
            return Ok(());
        }
        debug!(count = items.len(), "got notfound");

        let mut tx_hashes = Vec::new();
        let mut block_hashes = Vec::new();
        for item in items {
            match item {
                InventoryHash::Tx(hash) => tx_hashes.push(hash),
                InventoryHash::Block(hash) | InventoryHash::FilteredBlock(hash) => {
                    block_hashes.push(hash)
                }
                InventoryHash::Error => {}
            }
        }
        self.events.notfound(tx_hashes, block_hashes);
        Ok(())
    }

    // ======== Ping/pong and friends =========

    async fn accept_ping(&mut self, nonce: Nonce) -> Result<(), PeerError> {
        debug!("got ping");
        self.send(Message::Pong(nonce)).await
    }

    fn accept_pong(&mut self, nonce: Nonce) -> Result<(), PeerError> {
        if nonce != self.nonce {
            warn!(got = nonce.0, expected = self.nonce.0, "pong message has wrong nonce");
            return Err(PeerError::Protocol("pong nonce mismatch"));
        }
        if self.pong_queue.is_empty() {
            return Err(PeerError::Protocol("got unexpected pong"));
        }

        if let Some(started) = self.start_time.take() {
            let elapsed = started.elapsed().as_secs_f64();
            // 50% low pass filter on the current ping time.
            let previous = self.state.ping_time();
            let smoothed = if previous.is_finite() {
                previous * 0.5 + elapsed * 0.5
            } else {
                elapsed
            };
            self.state.set_ping_time(smoothed);
            debug!(seconds = elapsed, "got pong");
        } else {
            debug!("got pong");
        }

        if let Some(Some(done)) = self.pong_queue.pop_front() {
            done(true);
        }
        Ok(())
    }

    fn accept_reject(
        &mut self,
        message: String,
        ccode: RejectReason,
        reason: String,
        data: Option<[u8; 32]>,
    ) -> Result<(), PeerError> {
        match data {
            Some(hash) if message == "tx" && hash != [0u8; 32] => {
                let hash = transaction::Hash(hash);
                warn!(%message, code = ?ccode, %reason, txid = %hash, "message rejected");
                self.events.rejected_tx(hash, ccode as u8);
            }
            _ => warn!(%message, code = ?ccode, %reason, "message rejected"),
        }
        Ok(())
    }

    fn accept_feefilter(&mut self, rate: u64) -> Result<(), PeerError> {
        debug!(rate, "got feefilter");
        self.state.set_fee_per_kb(rate);
        self.events.set_fee_per_kb(rate);
        Ok(())
    }

    fn accept_assetdata(&mut self, asset: Option<AssetData>) -> Result<(), PeerError> {
        match self.asset_reply.take() {
            Some(reply) => {
                match &asset {
                    Some(asset) => debug!(name = %asset.name, "got asset data"),
                    None => debug!("asset not found"),
                }
                reply(asset);
            }
            None => debug!("dropping assetdata, no outstanding request"),
        }
        Ok(())
    }

    // ======== Owner requests =========

    async fn handle_request(&mut self, request: Request) -> Result<(), PeerError> {
        match request {
            Request::FilterLoad(filter) => {
                self.sent_filter = true;
                // A fresh filter re-arms mempool synchronization.
                self.sent_mempool = false;
                self.send(Message::FilterLoad(filter)).await
            }
            Request::Mempool {
                known_tx_hashes,
                done,
            } => {
                let already_sent = self.sent_mempool;
                self.sent_mempool = true;
                if already_sent || self.mempool_reply.is_some() {
                    debug!("mempool request already sent");
                    if let Some(done) = done {
                        done(false);
                    }
                    return Ok(());
                }
                self.add_known_tx_hashes(&known_tx_hashes);
                if let Some(done) = done {
                    self.mempool_deadline = Some(Instant::now() + self.config.mempool_timeout);
                    self.mempool_reply = Some(done);
                }
                self.send(Message::Mempool).await
            }
            Request::GetHeaders { locators, stop_hash } => {
                self.send_getheaders_message(locators, stop_hash).await
            }
            Request::GetBlocks { locators, stop_hash } => {
                self.send_getblocks_message(locators, stop_hash).await
            }
            Request::Inv { tx_hashes } => {
                let known_before = self.known_tx_hashes.len();
                self.add_known_tx_hashes(&tx_hashes);
                let fresh: Vec<InventoryHash> = self.known_tx_hashes[known_before..]
                    .iter()
                    .map(|hash| InventoryHash::Tx(*hash))
                    .collect();
                if fresh.is_empty() {
                    return Ok(());
                }
                self.send(Message::Inv(fresh)).await
            }
            Request::GetData {
                tx_hashes,
                block_hashes,
            } => self.send_getdata_message(tx_hashes, block_hashes).await,
            Request::GetAsset { name, reply } => {
                debug!(asset = %name, "requesting asset data");
                self.asset_reply = Some(reply);
                self.send(Message::GetAssetData(GetAssetData { names: vec![name] }))
                    .await
            }
            Request::GetAddr => {
                self.sent_getaddr = true;
                self.send(Message::GetAddr).await
            }
            Request::Ping(done) => self.send_ping_message(done).await,
            Request::RerequestBlocks { from_block } => {
                // Drop everything older than from_block and ask for the rest
                // again, this time through the updated filter.
                if let Some(position) = self
                    .known_block_hashes
                    .iter()
                    .rposition(|hash| *hash == from_block)
                {
                    self.known_block_hashes.drain(0..position);
                    debug!(count = self.known_block_hashes.len(), "re-requesting blocks");
                    let blocks = self.known_block_hashes.clone();
                    self.send_getdata_message(Vec::new(), blocks).await?;
                }
                Ok(())
            }
        }
    }

    // ======== Outbound messages =========

    async fn send(&mut self, message: Message) -> Result<(), PeerError> {
        let send = self.framed.send(message);
        match tokio::time::timeout(self.config.message_timeout, send).await {
            Ok(result) => result.map_err(PeerError::from),
            Err(_elapsed) => Err(PeerError::Timeout),
        }
    }

    async fn send_ping_message(&mut self, done: Option<PongCallback>) -> Result<(), PeerError> {
        self.start_time = Some(Instant::now());
        self.pong_queue.push_back(done);
        self.send(Message::Ping(self.nonce)).await
    }

    async fn send_getheaders_message(
        &mut self,
        locators: Vec<block::Hash>,
        stop_hash: Option<block::Hash>,
    ) -> Result<(), PeerError> {
        if locators.is_empty() {
            return Ok(());
        }
        debug!(first = %locators[0], last = %locators[locators.len() - 1], "calling getheaders");
        self.send(Message::GetHeaders(GetHeaders {
            locators,
            stop_hash,
        }))
        .await
    }

    async fn send_getblocks_message(
        &mut self,
        locators: Vec<block::Hash>,
        stop_hash: Option<block::Hash>,
    ) -> Result<(), PeerError> {
        if locators.is_empty() {
            return Ok(());
        }
        debug!(first = %locators[0], last = %locators[locators.len() - 1], "calling getblocks");
        self.sent_getblocks = true;
        self.send(Message::GetBlocks(GetBlocks {
            locators,
            stop_hash,
        }))
        .await
    }

    async fn send_getdata_message(
        &mut self,
        tx_hashes: Vec<transaction::Hash>,
        block_hashes: Vec<block::Hash>,
    ) -> Result<(), PeerError> {
        let count = tx_hashes.len() + block_hashes.len();
        if count > constants::MAX_GETDATA_HASHES {
            warn!(count, "couldn't send getdata, too many items");
            return Ok(());
        }
        if count == 0 {
            return Ok(());
        }

        let items: Vec<InventoryHash> = tx_hashes
            .into_iter()
            .map(InventoryHash::Tx)
            // Blocks are always requested filtered through the bloom filter.
            .chain(block_hashes.into_iter().map(InventoryHash::FilteredBlock))
            .collect();
        self.sent_getdata = true;
        self.send(Message::GetData(items)).await
    }

    /// Add hashes the remote peer now knows about, keeping the vector and
    /// the set in lockstep.
    fn add_known_tx_hashes(&mut self, hashes: &[transaction::Hash]) {
        for hash in hashes {
            if self.known_tx_hash_set.insert(*hash) {
                self.known_tx_hashes.push(*hash);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn known_tx_hashes(&self) -> (&[transaction::Hash], &HashSet<transaction::Hash>) {
        (&self.known_tx_hashes, &self.known_tx_hash_set)
    }

    #[cfg(test)]
    pub(crate) fn add_known_tx_hashes_for_test(&mut self, hashes: &[transaction::Hash]) {
        self.add_known_tx_hashes(hashes);
    }
}

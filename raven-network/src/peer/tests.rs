//! End-to-end session scenarios over an in-memory stream.
//!
//! Each test drives a [`Connection`] through a duplex pipe, playing the role
//! of the remote node with a second codec, and observes the session through
//! a recording event sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use raven_chain::block::{self, merkle, Header, PowData};
use raven_chain::parameters::Network;
use raven_chain::serialization::sha256d;
use raven_chain::transaction::{self, Transaction};
use raven_chain::work::tests::TestPow;
use raven_chain::work::{CompactDifficulty, PowHasher};
use raven_chain::RavenSerialize;

use crate::constants;
use crate::meta_addr::MetaAddr;
use crate::protocol::external::message::{GetBlocks, GetHeaders, HeadersBatch, MerkleBlock};
use crate::protocol::external::message::{RejectReason, Version};
use crate::protocol::external::types::{Magic, Nonce, PeerServices};
use crate::protocol::external::{Codec, InventoryHash, Message};

use super::connection::Connection;
use super::error::PeerError;
use super::event::PeerEvents;
use super::handle::{Config, Peer, PeerStatus, Request, SharedState};

const MAINNET_KAWPOW: u32 = 1_588_788_000;

#[derive(Debug)]
enum Event {
    Connected,
    Disconnected(PeerError),
    RelayedPeers(Vec<MetaAddr>),
    RelayedTx(transaction::Hash),
    HasTx(transaction::Hash),
    RejectedTx(transaction::Hash, u8),
    RelayedBlock(Box<MerkleBlock>),
    NotFound(Vec<transaction::Hash>, Vec<block::Hash>),
    FeePerKb(u64),
}

struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    serve: Mutex<HashMap<transaction::Hash, Arc<Transaction>>>,
}

impl Recorder {
    fn new(events: mpsc::UnboundedSender<Event>) -> Recorder {
        Recorder {
            events,
            serve: Mutex::new(HashMap::new()),
        }
    }

    fn record(&self, event: Event) {
        // The receiving side may be gone during teardown races.
        let _ = self.events.send(event);
    }

    fn serve_tx(&self, tx: Arc<Transaction>) {
        self.serve.lock().unwrap().insert(tx.hash(), tx);
    }
}

impl PeerEvents for Recorder {
    fn connected(&self) {
        self.record(Event::Connected);
    }
    fn disconnected(&self, error: PeerError) {
        self.record(Event::Disconnected(error));
    }
    fn relayed_peers(&self, peers: Vec<MetaAddr>) {
        self.record(Event::RelayedPeers(peers));
    }
    fn relayed_tx(&self, tx: Arc<Transaction>) {
        self.record(Event::RelayedTx(tx.hash()));
    }
    fn has_tx(&self, hash: transaction::Hash) {
        self.record(Event::HasTx(hash));
    }
    fn rejected_tx(&self, hash: transaction::Hash, code: u8) {
        self.record(Event::RejectedTx(hash, code));
    }
    fn relayed_block(&self, block: MerkleBlock) {
        self.record(Event::RelayedBlock(Box::new(block)));
    }
    fn notfound(&self, tx_hashes: Vec<transaction::Hash>, block_hashes: Vec<block::Hash>) {
        self.record(Event::NotFound(tx_hashes, block_hashes));
    }
    fn set_fee_per_kb(&self, fee_per_kb: u64) {
        self.record(Event::FeePerKb(fee_per_kb));
    }
    fn requested_tx(&self, hash: transaction::Hash) -> Option<Arc<Transaction>> {
        self.serve.lock().unwrap().get(&hash).cloned()
    }
}

struct Session {
    remote: Framed<DuplexStream, Codec>,
    requests: mpsc::UnboundedSender<Request>,
    state: Arc<SharedState>,
    recorder: Arc<Recorder>,
    events: mpsc::UnboundedReceiver<Event>,
    task: JoinHandle<PeerError>,
}

impl Session {
    async fn next_msg(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.remote.next())
            .await
            .expect("expected a message from the session")
            .expect("stream should stay open")
            .expect("message should decode")
    }

    async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("expected an event from the session")
            .expect("event channel should stay open")
    }

    fn no_pending_event(&mut self) {
        assert!(
            self.events.try_recv().is_err(),
            "session produced an unexpected event"
        );
    }

    fn request(&self, request: Request) {
        self.requests.send(request).expect("session is alive");
    }

    /// Write raw bytes below the codec, for frames the encoder refuses to
    /// build (garbage, unknown commands, assetdata).
    async fn write_raw(&mut self, bytes: &[u8]) {
        self.remote.get_mut().write_all(bytes).await.unwrap();
        self.remote.get_mut().flush().await.unwrap();
    }

    async fn join(self) -> PeerError {
        drop(self.remote);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session task should finish")
            .expect("session task should not panic")
    }

    /// Wait for the session to end on its own and return the error.
    async fn join_without_closing(self) -> PeerError {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session task should finish")
            .expect("session task should not panic")
    }
}

fn test_config() -> Config {
    let mut config = Config::new(Network::Mainnet);
    config.connect_timeout = Duration::from_millis(200);
    config.message_timeout = Duration::from_secs(2);
    config.mempool_timeout = Duration::from_millis(200);
    config
}

fn spawn_session(config: Config) -> Session {
    let (local, remote) = duplex(1 << 22);
    let network = config.network;

    let state = Arc::new(SharedState::new());
    state.set_status(PeerStatus::Connecting);
    state.disconnect_deadline.arm_in(config.connect_timeout);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let recorder = Arc::new(Recorder::new(event_tx));
    let (request_tx, request_rx) = mpsc::unbounded_channel();

    let meta = MetaAddr::new(
        "203.0.113.6:8767".parse().unwrap(),
        PeerServices::NODE_NETWORK,
        Utc::now(),
    );
    let connection = Connection::new(
        local,
        meta,
        config,
        state.clone(),
        recorder.clone(),
        Arc::new(TestPow),
        request_rx,
    );
    let task = tokio::spawn(connection.run());

    Session {
        remote: Framed::new(remote, Codec::builder().for_network(network).finish()),
        requests: request_tx,
        state,
        recorder,
        events: event_rx,
        task,
    }
}

fn remote_version() -> Version {
    Version::new(
        constants::CURRENT_VERSION,
        "127.0.0.1:8767".parse().unwrap(),
        PeerServices::empty(),
        PeerServices::NODE_NETWORK,
        "203.0.113.6:8767".parse().unwrap(),
        Nonce(0x1122_3344_5566_7788),
        "/x:1/".to_owned(),
        block::Height(1_000_000),
        false,
    )
}

async fn complete_handshake(session: &mut Session) {
    match session.next_msg().await {
        Message::Version(ours) => {
            assert_eq!(ours.version, constants::CURRENT_VERSION);
            assert_eq!(ours.services, constants::ENABLED_SERVICES);
            assert_eq!(ours.best_block, block::Height(0));
            assert!(!ours.relay);
        }
        other => panic!("expected version, got {:?}", other),
    }

    session
        .remote
        .send(Message::Version(remote_version()))
        .await
        .unwrap();
    assert_eq!(session.next_msg().await, Message::Verack);
    session.remote.send(Message::Verack).await.unwrap();

    match session.next_event().await {
        Event::Connected => {}
        other => panic!("expected connected event, got {:?}", other),
    }
    assert_eq!(session.state.status(), PeerStatus::Connected);
}

/// Fence: the session answers this ping only after it has fully processed
/// everything sent before it, and the reply proves nothing else was sent in
/// between.
async fn ping_fence(session: &mut Session, nonce: u64) {
    session.remote.send(Message::Ping(Nonce(nonce))).await.unwrap();
    assert_eq!(session.next_msg().await, Message::Pong(Nonce(nonce)));
}

fn classic_header(time: u32, merkle_root: merkle::Root) -> Header {
    Header {
        version: 0x2000_0000,
        previous_block_hash: block::Hash([1u8; 32]),
        merkle_root,
        time: Utc.timestamp(time as i64, 0),
        difficulty_threshold: CompactDifficulty(0x207f_ffff),
        pow_data: PowData::Classic { nonce: 0 },
    }
}

fn kawpow_header(time: u32) -> Header {
    Header {
        pow_data: PowData::Kawpow {
            height: block::Height(1_219_736),
            nonce64: 0x0102_0304_0506_0708,
            mix_hash: block::Hash([7u8; 32]),
        },
        ..classic_header(time, merkle::Root([2u8; 32]))
    }
}

fn headers_batch(headers: &[Header]) -> HeadersBatch {
    use raven_chain::compactint::CompactInt;

    let mut payload = CompactInt::from(headers.len())
        .raven_serialize_to_vec()
        .unwrap();
    for header in headers {
        payload.extend_from_slice(&header.raven_serialize_to_vec().unwrap());
        payload.push(0);
    }
    HeadersBatch::parse(&payload, MAINNET_KAWPOW).expect("test batch is well formed")
}

fn raw_frame(command: &[u8; 12], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(24 + payload.len());
    frame.extend_from_slice(&Magic::from(Network::Mainnet).0);
    frame.extend_from_slice(command);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&sha256d::Checksum::from(payload).0);
    frame.extend_from_slice(payload);
    frame
}

// ======== Scenarios =========

#[tokio::test]
async fn handshake_completes() {
    raven_test::init();
    let mut session = spawn_session(test_config());

    complete_handshake(&mut session).await;

    assert_eq!(session.state.lastblock(), 1_000_000);
    assert_eq!(session.state.version(), 70_027);
    assert_eq!(session.state.useragent(), "/x:1/");
    // The verack round trip seeded the ping estimate.
    assert!(session.state.ping_time().is_finite());
    // The handshake cleared the connect deadline.
    assert!(!session.state.disconnect_deadline.is_armed());
}

#[tokio::test]
async fn decoder_resynchronizes_inside_a_session() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.write_raw(&[0xff, 0xff, 0xff, 0xff]).await;
    ping_fence(&mut session, 0x4e4f4e43).await;
}

#[tokio::test]
async fn old_protocol_version_is_fatal() {
    raven_test::init();
    let mut session = spawn_session(test_config());

    let _our_version = session.next_msg().await;
    let mut version = remote_version();
    version.version = crate::protocol::external::types::ProtocolVersion(70_025);
    session.remote.send(Message::Version(version)).await.unwrap();

    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("protocol version not supported")
    );
}

#[tokio::test]
async fn inv_deduplicates_known_transactions() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::FilterLoad(vec![1, 2, 3]));
    assert_eq!(session.next_msg().await, Message::FilterLoad(vec![1, 2, 3]));

    let h1 = transaction::Hash([0xaa; 32]);
    let h2 = transaction::Hash([0xbb; 32]);
    session
        .remote
        .send(Message::Inv(vec![
            InventoryHash::Tx(h1),
            InventoryHash::Tx(h2),
        ]))
        .await
        .unwrap();
    assert_eq!(
        session.next_msg().await,
        Message::GetData(vec![InventoryHash::Tx(h1), InventoryHash::Tx(h2)])
    );

    // Announcing h1 again: the owner hears has_tx and no new getdata goes
    // out before the fence's pong.
    session
        .remote
        .send(Message::Inv(vec![InventoryHash::Tx(h1)]))
        .await
        .unwrap();
    ping_fence(&mut session, 1).await;
    match session.next_event().await {
        Event::HasTx(hash) => assert_eq!(hash, h1),
        other => panic!("expected has_tx, got {:?}", other),
    }
}

#[tokio::test]
async fn repeated_single_hash_block_inv_is_ignored() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::FilterLoad(vec![0]));
    let _filterload = session.next_msg().await;

    let tip = block::Hash([0xcc; 32]);
    session
        .remote
        .send(Message::Inv(vec![InventoryHash::Block(tip)]))
        .await
        .unwrap();
    assert_eq!(
        session.next_msg().await,
        Message::GetData(vec![InventoryHash::FilteredBlock(tip)])
    );

    // The same tip announced again is treated as already-seen.
    session
        .remote
        .send(Message::Inv(vec![InventoryHash::Block(tip)]))
        .await
        .unwrap();
    ping_fence(&mut session, 2).await;

    // A different tip goes through.
    let next_tip = block::Hash([0xcd; 32]);
    session
        .remote
        .send(Message::Inv(vec![InventoryHash::Block(next_tip)]))
        .await
        .unwrap();
    assert_eq!(
        session.next_msg().await,
        Message::GetData(vec![InventoryHash::FilteredBlock(next_tip)])
    );
}

#[tokio::test]
async fn unsolicited_tx_inv_is_fatal() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session
        .remote
        .send(Message::Inv(vec![InventoryHash::Tx(transaction::Hash(
            [3; 32],
        ))]))
        .await
        .unwrap();
    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("got tx inv before loading a filter")
    );
}

#[tokio::test]
async fn tarpit_inv_is_fatal() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::FilterLoad(vec![0]));
    let _filterload = session.next_msg().await;
    session.state.set_current_block_height(100);

    // Ten block hashes while a million behind the advertised tip.
    let items: Vec<InventoryHash> = (0u8..10)
        .map(|i| InventoryHash::Block(block::Hash([i; 32])))
        .collect();
    session.remote.send(Message::Inv(items)).await.unwrap();

    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("non-standard inv")
    );
}

#[tokio::test]
async fn merkleblock_assembles_from_interleaved_tx() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::FilterLoad(vec![0]));
    let _filterload = session.next_msg().await;

    let t1 = Arc::new(Transaction::from_bytes(vec![0x01, 0x02, 0x03]));
    let t2 = Arc::new(Transaction::from_bytes(vec![0x04, 0x05, 0x06]));
    let mut concat = [0u8; 64];
    concat[0..32].copy_from_slice(&t1.hash().0);
    concat[32..64].copy_from_slice(&t2.hash().0);
    let root = merkle::Root(sha256d::digest(&concat));

    let merkle_block = MerkleBlock {
        header: classic_header(1_500_000_000, root),
        transaction_count: 2,
        hashes: vec![t1.hash(), t2.hash()],
        flags: vec![0x07],
    };
    session
        .remote
        .send(Message::MerkleBlock(merkle_block.clone()))
        .await
        .unwrap();

    // Matched transactions arrive out of order.
    session.remote.send(Message::Tx(t2.clone())).await.unwrap();
    session.remote.send(Message::Tx(t1.clone())).await.unwrap();

    match session.next_event().await {
        Event::RelayedTx(hash) => assert_eq!(hash, t2.hash()),
        other => panic!("expected relayed_tx, got {:?}", other),
    }
    match session.next_event().await {
        Event::RelayedTx(hash) => assert_eq!(hash, t1.hash()),
        other => panic!("expected relayed_tx, got {:?}", other),
    }
    match session.next_event().await {
        Event::RelayedBlock(block) => assert_eq!(*block, merkle_block),
        other => panic!("expected relayed_block, got {:?}", other),
    }

    // Exactly one block emission, and the session is still healthy.
    ping_fence(&mut session, 3).await;
    session.no_pending_event();
}

#[tokio::test]
async fn non_tx_message_aborts_merkleblock_assembly() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::FilterLoad(vec![0]));
    let _filterload = session.next_msg().await;

    let t1 = transaction::Hash([0x44; 32]);
    let merkle_block = MerkleBlock {
        header: classic_header(1_500_000_000, merkle::Root(t1.0)),
        transaction_count: 1,
        hashes: vec![t1],
        flags: vec![0x01],
    };
    session
        .remote
        .send(Message::MerkleBlock(merkle_block))
        .await
        .unwrap();

    session.remote.send(Message::Ping(Nonce(9))).await.unwrap();
    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("incomplete merkleblock")
    );
}

#[tokio::test]
async fn tx_before_filter_is_fatal() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let tx = Arc::new(Transaction::from_bytes(vec![9, 9, 9]));
    session.remote.send(Message::Tx(tx)).await.unwrap();
    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("got tx before loading a filter")
    );
}

#[tokio::test]
async fn headers_straddling_activation() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;
    // Keep the sync in headers mode.
    session.state.set_earliest_key_time(u32::MAX);

    let mut headers = Vec::with_capacity(2000);
    for i in 0..1000u32 {
        headers.push(classic_header(1_560_000_000 + i, merkle::Root([2u8; 32])));
    }
    for i in 0..1000u32 {
        headers.push(kawpow_header(MAINNET_KAWPOW + i));
    }
    let batch = headers_batch(&headers);
    assert_eq!(batch.kawpow_start(), 1000);

    session
        .remote
        .send(Message::Headers(batch))
        .await
        .unwrap();

    // The follow-up getheaders carries [hash(last), hash(first)], each
    // derived by its own era's hash function.
    let pow = TestPow;
    let last = headers.last().unwrap();
    let (nonce64, mix_hash) = match last.pow_data {
        PowData::Kawpow {
            nonce64, mix_hash, ..
        } => (nonce64, mix_hash),
        _ => unreachable!(),
    };
    let expected_last = pow
        .kawpow_light(
            block::Hash(sha256d::digest(&last.prefix80())),
            mix_hash,
            nonce64,
        )
        .unwrap();
    let expected_first = pow.x16r(&headers[0].prefix80());

    match session.next_msg().await {
        Message::GetHeaders(GetHeaders {
            locators,
            stop_hash,
        }) => {
            assert_eq!(locators, vec![expected_last, expected_first]);
            assert_eq!(stop_hash, None);
        }
        other => panic!("expected getheaders, got {:?}", other),
    }

    // All 2000 headers surface upward, in wire order.
    for expected in &headers {
        match session.next_event().await {
            Event::RelayedBlock(block) => {
                assert_eq!(block.header, *expected);
                assert_eq!(block.transaction_count, 0);
            }
            other => panic!("expected relayed_block, got {:?}", other),
        }
    }
    session.no_pending_event();
}

#[tokio::test]
async fn headers_switch_to_getblocks_near_wallet_birthday() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    const WEEK_AND_DRIFT: u32 = 7 * 24 * 60 * 60 + 10 * 60;
    let earliest = 1_560_000_000u32;
    session.state.set_earliest_key_time(earliest);

    // Headers 0..=4 are older than a week before the wallet birthday;
    // header 5 is the first recent one.
    let headers: Vec<Header> = (0..10u32)
        .map(|i| {
            classic_header(
                earliest - WEEK_AND_DRIFT - 100 + i * 20,
                merkle::Root([2u8; 32]),
            )
        })
        .collect();
    session
        .remote
        .send(Message::Headers(headers_batch(&headers)))
        .await
        .unwrap();

    let pow = TestPow;
    let expected_anchor = pow.x16r(&headers[5].prefix80());
    let expected_first = pow.x16r(&headers[0].prefix80());

    match session.next_msg().await {
        Message::GetBlocks(GetBlocks {
            locators,
            stop_hash,
        }) => {
            assert_eq!(locators, vec![expected_anchor, expected_first]);
            assert_eq!(stop_hash, None);
        }
        other => panic!("expected getblocks, got {:?}", other),
    }

    for _ in 0..10 {
        match session.next_event().await {
            Event::RelayedBlock(_) => {}
            other => panic!("expected relayed_block, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn short_stale_headers_batch_is_fatal() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;
    session.state.set_earliest_key_time(u32::MAX);

    let headers: Vec<Header> = (0..5u32)
        .map(|i| classic_header(1_400_000_000 + i, merkle::Root([2u8; 32])))
        .collect();
    session
        .remote
        .send(Message::Headers(headers_batch(&headers)))
        .await
        .unwrap();

    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("non-standard headers message")
    );
}

#[tokio::test]
async fn pong_callbacks_fire_in_fifo_order_and_fail_on_disconnect() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    for id in 0..2u32 {
        let done_tx = done_tx.clone();
        session.request(Request::Ping(Some(Box::new(move |success| {
            done_tx.send((id, success)).unwrap();
        }))));
    }

    // Two pings carrying the session nonce, answered once.
    let nonce = match session.next_msg().await {
        Message::Ping(nonce) => nonce,
        other => panic!("expected ping, got {:?}", other),
    };
    assert_eq!(session.next_msg().await, Message::Ping(nonce));
    session.remote.send(Message::Pong(nonce)).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, (0, true));

    // Dropping the transport fails the remaining callback exactly once.
    assert_eq!(session.join().await, PeerError::ConnectionReset);
    let second = done_rx.recv().await.unwrap();
    assert_eq!(second, (1, false));
    assert!(done_rx.try_recv().is_err());
}

#[tokio::test]
async fn wrong_pong_nonce_is_fatal() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::Ping(None));
    let nonce = match session.next_msg().await {
        Message::Ping(nonce) => nonce,
        other => panic!("expected ping, got {:?}", other),
    };
    session
        .remote
        .send(Message::Pong(Nonce(nonce.0.wrapping_add(1))))
        .await
        .unwrap();
    assert_eq!(
        session.join_without_closing().await,
        PeerError::Protocol("pong nonce mismatch")
    );
}

#[tokio::test]
async fn mempool_completion_is_fenced_by_inv_and_ping() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    session.request(Request::Mempool {
        known_tx_hashes: vec![],
        done: Some(Box::new(move |success| {
            done_tx.send(success).unwrap();
        })),
    });
    assert_eq!(session.next_msg().await, Message::Mempool);

    // The remote announces its mempool; the session requests the unknown tx
    // and fences completion with a ping.
    let announced = transaction::Hash([0x77; 32]);
    session
        .remote
        .send(Message::Inv(vec![InventoryHash::Tx(announced)]))
        .await
        .unwrap();
    assert_eq!(
        session.next_msg().await,
        Message::GetData(vec![InventoryHash::Tx(announced)])
    );
    let nonce = match session.next_msg().await {
        Message::Ping(nonce) => nonce,
        other => panic!("expected mempool fence ping, got {:?}", other),
    };
    session.remote.send(Message::Pong(nonce)).await.unwrap();

    let success = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(success);
}

#[tokio::test]
async fn mempool_wait_expires_into_a_ping() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    session.request(Request::Mempool {
        known_tx_hashes: vec![],
        done: Some(Box::new(move |success| {
            done_tx.send(success).unwrap();
        })),
    });
    assert_eq!(session.next_msg().await, Message::Mempool);

    // No inv arrives; after the mempool deadline the session pings anyway.
    let nonce = match session.next_msg().await {
        Message::Ping(nonce) => nonce,
        other => panic!("expected expiry ping, got {:?}", other),
    };
    session.remote.send(Message::Pong(nonce)).await.unwrap();

    let success = tokio::time::timeout(Duration::from_secs(5), done_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(success);

    // A second mempool request on the same session is refused outright.
    let (again_tx, mut again_rx) = mpsc::unbounded_channel();
    session.request(Request::Mempool {
        known_tx_hashes: vec![],
        done: Some(Box::new(move |success| {
            again_tx.send(success).unwrap();
        })),
    });
    let refused = tokio::time::timeout(Duration::from_secs(5), again_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!refused);
}

#[tokio::test]
async fn addr_gossip_is_filtered_and_sanitized() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let now = Utc::now();
    let good = MetaAddr::new(
        "203.0.113.1:8767".parse().unwrap(),
        PeerServices::NODE_NETWORK,
        now - chrono::Duration::hours(1),
    );
    let future = MetaAddr::new(
        "203.0.113.2:8767".parse().unwrap(),
        PeerServices::NODE_NETWORK,
        now + chrono::Duration::hours(1),
    );
    let no_services = MetaAddr::new(
        "203.0.113.3:8767".parse().unwrap(),
        PeerServices::empty(),
        now,
    );
    let ipv6 = MetaAddr::new(
        "[2001:db8::1]:8767".parse().unwrap(),
        PeerServices::NODE_NETWORK,
        now,
    );

    // Unsolicited gossip is silently dropped.
    session
        .remote
        .send(Message::Addr(vec![good]))
        .await
        .unwrap();
    ping_fence(&mut session, 4).await;
    session.no_pending_event();

    // After getaddr the surviving entries come back sanitized.
    session.request(Request::GetAddr);
    assert_eq!(session.next_msg().await, Message::GetAddr);
    session
        .remote
        .send(Message::Addr(vec![good, future, no_services, ipv6]))
        .await
        .unwrap();

    match session.next_event().await {
        Event::RelayedPeers(peers) => {
            assert_eq!(peers.len(), 2);
            // The plausible entry only moved back two hours.
            assert_eq!(
                peers[0].last_seen.timestamp(),
                (good.last_seen - chrono::Duration::hours(2)).timestamp()
            );
            // The future entry was clamped to five days old.
            assert!(peers[1].last_seen < now - chrono::Duration::days(4));
        }
        other => panic!("expected relayed_peers, got {:?}", other),
    }

    // A getaddr from the remote side gets an empty addr back.
    session.remote.send(Message::GetAddr).await.unwrap();
    assert_eq!(session.next_msg().await, Message::Addr(vec![]));
}

#[tokio::test]
async fn getdata_serves_known_tx_and_reports_the_rest() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let served = Arc::new(Transaction::from_bytes(vec![0xde, 0xad, 0xbe, 0xef]));
    session.recorder.serve_tx(served.clone());

    let unknown = transaction::Hash([0x66; 32]);
    let block_hash = block::Hash([0x67; 32]);
    session
        .remote
        .send(Message::GetData(vec![
            InventoryHash::Tx(served.hash()),
            InventoryHash::Tx(unknown),
            InventoryHash::FilteredBlock(block_hash),
        ]))
        .await
        .unwrap();

    assert_eq!(session.next_msg().await, Message::Tx(served));
    assert_eq!(
        session.next_msg().await,
        Message::NotFound(vec![
            InventoryHash::Tx(unknown),
            InventoryHash::FilteredBlock(block_hash),
        ])
    );
}

#[tokio::test]
async fn notfound_splits_tx_and_block_hashes() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let tx_hash = transaction::Hash([0x10; 32]);
    let block_hash = block::Hash([0x20; 32]);
    session
        .remote
        .send(Message::NotFound(vec![
            InventoryHash::Tx(tx_hash),
            InventoryHash::Block(block_hash),
        ]))
        .await
        .unwrap();

    match session.next_event().await {
        Event::NotFound(tx_hashes, block_hashes) => {
            assert_eq!(tx_hashes, vec![tx_hash]);
            assert_eq!(block_hashes, vec![block_hash]);
        }
        other => panic!("expected notfound, got {:?}", other),
    }
}

#[tokio::test]
async fn rejected_tx_and_feefilter_surface_upward() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let rejected = transaction::Hash([0x31; 32]);
    session
        .remote
        .send(Message::Reject {
            message: "tx".to_owned(),
            ccode: RejectReason::Duplicate,
            reason: "txn-already-known".to_owned(),
            data: Some(rejected.0),
        })
        .await
        .unwrap();
    match session.next_event().await {
        Event::RejectedTx(hash, code) => {
            assert_eq!(hash, rejected);
            assert_eq!(code, 0x12);
        }
        other => panic!("expected rejected_tx, got {:?}", other),
    }

    session.remote.send(Message::FeeFilter(1_234)).await.unwrap();
    match session.next_event().await {
        Event::FeePerKb(rate) => assert_eq!(rate, 1_234),
        other => panic!("expected fee event, got {:?}", other),
    }
    ping_fence(&mut session, 5).await;
    assert_eq!(session.state.fee_per_kb(), 1_234);
}

#[tokio::test]
async fn asset_queries_complete_one_shot() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let sender = reply_tx.clone();
    session.request(Request::GetAsset {
        name: "ASSET_JEREMY".to_owned(),
        reply: Box::new(move |asset| {
            sender.send(asset).unwrap();
        }),
    });
    match session.next_msg().await {
        Message::GetAssetData(request) => assert_eq!(request.names, vec!["ASSET_JEREMY"]),
        other => panic!("expected getassetdata, got {:?}", other),
    }

    let mut payload = vec![0x0c];
    payload.extend_from_slice(b"ASSET_JEREMY");
    payload.extend_from_slice(&100_000_000u64.to_le_bytes());
    payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x00]);
    payload.extend_from_slice(&501u32.to_le_bytes());
    session.write_raw(&raw_frame(b"assetdata\0\0\0", &payload)).await;

    let asset = tokio::time::timeout(Duration::from_secs(5), reply_rx.recv())
        .await
        .unwrap()
        .unwrap()
        .expect("asset should be found");
    assert_eq!(asset.name, "ASSET_JEREMY");
    assert_eq!(asset.amount, 100_000_000);
    assert_eq!(asset.height, 501);

    // A second query that the node answers with the not-found sentinel.
    session.request(Request::GetAsset {
        name: "BAD_ASSET_NAME".to_owned(),
        reply: Box::new(move |asset| {
            reply_tx.send(asset).unwrap();
        }),
    });
    let _request = session.next_msg().await;
    let mut payload = vec![0x03];
    payload.extend_from_slice(b"_NF");
    session.write_raw(&raw_frame(b"assetdata\0\0\0", &payload)).await;

    let missing = tokio::time::timeout(Duration::from_secs(5), reply_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn send_inv_announces_only_fresh_hashes() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    let t1 = transaction::Hash([0x01; 32]);
    let t2 = transaction::Hash([0x02; 32]);
    let t3 = transaction::Hash([0x03; 32]);

    session.request(Request::Inv {
        tx_hashes: vec![t1, t2],
    });
    assert_eq!(
        session.next_msg().await,
        Message::Inv(vec![InventoryHash::Tx(t1), InventoryHash::Tx(t2)])
    );

    // t1 is already known to the peer, so only t3 is announced.
    session.request(Request::Inv {
        tx_hashes: vec![t1, t3],
    });
    assert_eq!(
        session.next_msg().await,
        Message::Inv(vec![InventoryHash::Tx(t3)])
    );
}

#[tokio::test]
async fn unknown_commands_are_ignored() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.write_raw(&raw_frame(b"sendheaders\0", &[])).await;
    ping_fence(&mut session, 6).await;
}

#[tokio::test]
async fn rerequest_blocks_replays_from_the_given_hash() {
    raven_test::init();
    let mut session = spawn_session(test_config());
    complete_handshake(&mut session).await;

    session.request(Request::FilterLoad(vec![0]));
    let _filterload = session.next_msg().await;

    let hashes: Vec<block::Hash> = (0u8..4).map(|i| block::Hash([i + 1; 32])).collect();
    let items: Vec<InventoryHash> = hashes.iter().map(|h| InventoryHash::Block(*h)).collect();
    session.remote.send(Message::Inv(items)).await.unwrap();
    let _getdata = session.next_msg().await;

    session.request(Request::RerequestBlocks {
        from_block: hashes[2],
    });
    assert_eq!(
        session.next_msg().await,
        Message::GetData(vec![
            InventoryHash::FilteredBlock(hashes[2]),
            InventoryHash::FilteredBlock(hashes[3]),
        ])
    );
}

#[tokio::test]
async fn silent_peer_is_disconnected_at_the_deadline() {
    raven_test::init();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let recorder = Arc::new(Recorder::new(event_tx));
    let peer = Peer::new(
        MetaAddr::new(addr, PeerServices::NODE_NETWORK, Utc::now()),
        test_config(),
        recorder,
        Arc::new(TestPow),
    );

    peer.connect();
    assert_eq!(peer.status(), PeerStatus::Connecting);

    // Accept the connection but never speak.
    let (_socket, _remote_addr) = listener.accept().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), event_rx.recv())
        .await
        .expect("the session should time out")
        .unwrap();
    match event {
        Event::Disconnected(error) => assert_eq!(error, PeerError::Timeout),
        other => panic!("expected disconnected, got {:?}", other),
    }
    assert_eq!(peer.status(), PeerStatus::Disconnected);
}

#[tokio::test]
async fn requested_disconnect_fails_pending_callbacks() {
    raven_test::init();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let recorder = Arc::new(Recorder::new(event_tx));
    let peer = Peer::new(
        MetaAddr::new(addr, PeerServices::NODE_NETWORK, Utc::now()),
        test_config(),
        recorder,
        Arc::new(TestPow),
    );

    peer.connect();
    let (_socket, _remote_addr) = listener.accept().await.unwrap();

    peer.disconnect();
    let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("the session should close")
        .unwrap();
    match event {
        Event::Disconnected(error) => assert_eq!(error, PeerError::Closed),
        other => panic!("expected disconnected, got {:?}", other),
    }

    // With no live session, callback-carrying requests fail immediately.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    peer.send_ping(Box::new(move |success| {
        done_tx.send(success).unwrap();
    }));
    assert_eq!(done_rx.recv().await, Some(false));
}

mod known_hashes {
    use super::*;
    use proptest::prelude::*;

    fn offline_connection() -> Connection<DuplexStream> {
        let (local, _remote) = duplex(64);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (_request_tx, request_rx) = mpsc::unbounded_channel();
        Connection::new(
            local,
            MetaAddr::new(
                "203.0.113.6:8767".parse().unwrap(),
                PeerServices::NODE_NETWORK,
                Utc::now(),
            ),
            test_config(),
            Arc::new(SharedState::new()),
            Arc::new(Recorder::new(event_tx)),
            Arc::new(TestPow),
            request_rx,
        )
    }

    proptest! {
        /// The insertion-ordered vector and the membership set always agree.
        #[test]
        fn sequence_and_set_stay_in_lockstep(
            raw in prop::collection::vec(any::<[u8; 32]>(), 0..64),
        ) {
            let hashes: Vec<transaction::Hash> =
                raw.iter().map(|bytes| transaction::Hash(*bytes)).collect();

            let mut connection = offline_connection();
            connection.add_known_tx_hashes_for_test(&hashes);
            // Re-adding must not duplicate anything.
            connection.add_known_tx_hashes_for_test(&hashes);

            let (sequence, set) = connection.known_tx_hashes();
            prop_assert_eq!(sequence.len(), set.len());
            for hash in sequence {
                prop_assert!(set.contains(hash));
            }
            let unique: std::collections::HashSet<_> = hashes.iter().collect();
            prop_assert_eq!(sequence.len(), unique.len());
        }
    }
}

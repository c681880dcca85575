//! In-memory host, syncer and diagnostics for driving a [`SyncCoordinator`]
//! without a network.

use core::time::Duration;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use blocksync_network::{CodecError, Host, PeerId, SendError, StreamProtocol, SyncStream};
use blocksync_primitives::block::{BlockData, BlockHash};
use blocksync_primitives::message::{
    decode_as_request, decode_as_response, BlockRequest, BlockResponse, SyncMessage,
};
use blocksync_sync::{BuildError, Diagnostics, SyncConfig, SyncCoordinator, SyncEvent, SyncerCore};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;

type Frame = Result<Bytes, CodecError>;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct HostState {
    peers: Vec<PeerId>,
    failing: HashSet<PeerId>,
    sent: Vec<(PeerId, Bytes)>,
    writers: HashMap<PeerId, mpsc::UnboundedSender<Frame>>,
    readers: HashMap<PeerId, mpsc::UnboundedReceiver<Frame>>,
    protections: Vec<(PeerId, bool)>,
}

impl HostState {
    fn writer(&mut self, peer: PeerId) -> mpsc::UnboundedSender<Frame> {
        if let Some(writer) = self.writers.get(&peer) {
            return writer.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ignored = self.writers.insert(peer, tx.clone());
        let _ignored = self.readers.insert(peer, rx);

        tx
    }
}

/// Host whose streams are channels the test writes into with
/// [`deliver`](Self::deliver).
#[derive(Debug, Default)]
pub struct MockHost {
    state: Mutex<HostState>,
}

impl MockHost {
    pub fn with_peers(peers: &[PeerId]) -> Self {
        let host = Self::default();
        host.state.lock().peers = peers.to_vec();
        host
    }

    pub fn fail(&self, peer: PeerId) {
        let _ignored = self.state.lock().failing.insert(peer);
    }

    pub fn deliver(&self, peer: PeerId, message: impl Into<SyncMessage>) {
        let message: SyncMessage = message.into();
        let bytes = message.encode().unwrap();
        self.push_frame(peer, Ok(Bytes::from(bytes)));
    }

    fn push_frame(&self, peer: PeerId, frame: Frame) {
        self.state.lock().writer(peer).send(frame).unwrap();
    }

    /// Whether the read side of the stream from `peer` has been handed out.
    pub fn is_streaming(&self, peer: PeerId) -> bool {
        let state = self.state.lock();
        state.writers.contains_key(&peer) && !state.readers.contains_key(&peer)
    }

    /// Ends the stream from `peer`.
    pub fn hang_up(&self, peer: PeerId) {
        let _ignored = self.state.lock().writers.remove(&peer);
    }

    pub fn sent_to(&self, peer: PeerId) -> Vec<Bytes> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|(to, _)| *to == peer)
            .map(|(_, bytes)| bytes.clone())
            .collect()
    }

    pub fn requests_sent_to(&self, peer: PeerId) -> Vec<BlockRequest> {
        self.sent_to(peer)
            .iter()
            .map(|bytes| decode_as_request(bytes).unwrap())
            .collect()
    }

    pub fn responses_sent_to(&self, peer: PeerId) -> Vec<BlockResponse> {
        self.sent_to(peer)
            .iter()
            .map(|bytes| decode_as_response(bytes).unwrap())
            .collect()
    }

    pub fn total_sent(&self) -> usize {
        self.state.lock().sent.len()
    }

    /// `(protect, unprotect)` calls seen for `peer`.
    pub fn protections(&self, peer: PeerId) -> (usize, usize) {
        self.state
            .lock()
            .protections
            .iter()
            .filter(|(to, _)| *to == peer)
            .fold((0, 0), |(on, off), (_, protect)| {
                if *protect {
                    (on + 1, off)
                } else {
                    (on, off + 1)
                }
            })
    }
}

#[async_trait]
impl Host for MockHost {
    async fn send(
        &self,
        peer: PeerId,
        _protocol: &StreamProtocol,
        data: Bytes,
    ) -> Result<(), SendError> {
        let result = {
            let mut state = self.state.lock();

            if state.failing.contains(&peer) {
                Err(SendError::NotConnected(Box::new(peer)))
            } else {
                state.sent.push((peer, data));
                Ok(())
            }
        };

        // Leave room for other tasks to run while the caller is mid-send.
        tokio::task::yield_now().await;

        result
    }

    async fn stream(&self, peer: PeerId, _protocol: &StreamProtocol) -> Option<SyncStream> {
        let mut state = self.state.lock();
        let _writer = state.writer(peer);
        let reader = state.readers.remove(&peer)?;

        Some(SyncStream::new(
            Some(peer),
            UnboundedReceiverStream::new(reader),
        ))
    }

    async fn peers(&self) -> Vec<PeerId> {
        self.state.lock().peers.clone()
    }

    fn protect(&self, peer: PeerId, _tag: &str) {
        self.state.lock().protections.push((peer, true));
    }

    fn unprotect(&self, peer: PeerId, _tag: &str) {
        self.state.lock().protections.push((peer, false));
    }
}

/// Serves blocks `0..=head` and answers responses from a script.
#[derive(Debug, Default)]
pub struct MockSyncer {
    head: u64,
    follow_ups: Mutex<VecDeque<BlockRequest>>,
    responses: Mutex<Vec<BlockResponse>>,
    requests: Mutex<Vec<BlockRequest>>,
}

impl MockSyncer {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            ..Self::default()
        }
    }

    /// Requests returned by successive `handle_block_response` calls, after
    /// which the exchange is complete.
    pub fn with_follow_ups(self, follow_ups: impl IntoIterator<Item = BlockRequest>) -> Self {
        self.follow_ups.lock().extend(follow_ups);
        self
    }

    pub fn responses(&self) -> Vec<BlockResponse> {
        self.responses.lock().clone()
    }

    pub fn requests(&self) -> Vec<BlockRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SyncerCore for MockSyncer {
    async fn handle_block_response(&self, response: BlockResponse) -> Option<BlockRequest> {
        self.responses.lock().push(response);
        self.follow_ups.lock().pop_front()
    }

    async fn create_block_response(
        &self,
        request: BlockRequest,
    ) -> Result<BlockResponse, BuildError> {
        self.requests.lock().push(request.clone());

        let Some((start, end)) = request.requested_range() else {
            return Err(BuildError::InvalidRange(format!(
                "{} is not a numbered range",
                request.starting_block
            )));
        };

        if start > self.head {
            return Err(BuildError::UnknownBlock(request.starting_block));
        }

        Ok(blocks(start, end.min(self.head)))
    }
}

#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingDiagnostics {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| matches(event)).count()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn record(&self, event: SyncEvent) {
        self.events.lock().push(event);
    }
}

#[derive(Debug)]
pub struct Harness {
    pub host: Arc<MockHost>,
    pub syncer: Arc<MockSyncer>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub coordinator: SyncCoordinator,
}

impl Harness {
    pub fn new(host: MockHost, syncer: MockSyncer) -> Self {
        let host = Arc::new(host);
        let syncer = Arc::new(syncer);
        let diagnostics = Arc::new(RecordingDiagnostics::default());

        let dyn_host: Arc<dyn Host> = Arc::<MockHost>::clone(&host);
        let dyn_syncer: Arc<dyn SyncerCore> = Arc::<MockSyncer>::clone(&syncer);
        let dyn_diagnostics: Arc<dyn Diagnostics> = Arc::<RecordingDiagnostics>::clone(&diagnostics);

        let coordinator = SyncCoordinator::with_diagnostics(
            SyncConfig::default(),
            dyn_host,
            dyn_syncer,
            dyn_diagnostics,
        );

        Self {
            host,
            syncer,
            diagnostics,
            coordinator,
        }
    }

    pub async fn is_syncing(&self, peer: PeerId) -> bool {
        self.coordinator.sessions().is_syncing(&peer).await
    }

    pub async fn wait_until_syncing(&self, peer: PeerId, syncing: bool) {
        timeout(WAIT_LIMIT, async {
            while self.is_syncing(peer).await != syncing {
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .expect("session state did not change in time");
    }
}

/// Contiguous blocks `start..=end`.
pub fn blocks(start: u64, end: u64) -> BlockResponse {
    BlockResponse::new(
        (start..=end)
            .map(|number| BlockData::new(BlockHash::from([7; 32]), number).with_header(vec![1]))
            .collect(),
    )
}

pub fn peers(count: usize) -> Vec<PeerId> {
    (0..count).map(|_| PeerId::random()).collect()
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(WAIT_LIMIT, async {
        while !condition() {
            sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .expect("condition not met in time");
}

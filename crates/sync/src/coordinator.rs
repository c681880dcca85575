use std::io;
use std::sync::Arc;

use blocksync_network::{Host, PeerId, StreamProtocol};
use blocksync_primitives::message::{BlockRequest, BlockResponse, SyncMessage};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::SyncConfig;
use crate::diagnostics::{Diagnostics, SyncEvent, TracingDiagnostics};
use crate::dispatcher::ReplyReaders;
use crate::error::SyncError;
use crate::session::SessionTracker;
use crate::syncer::SyncerCore;

/// Drives sync sessions with remote peers.
///
/// Cheap to clone; clones share sessions, reader tasks and shutdown state.
#[derive(Clone, Debug)]
pub struct SyncCoordinator {
    pub(crate) config: Arc<SyncConfig>,
    pub(crate) sessions: Arc<SessionTracker>,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) syncer: Arc<dyn SyncerCore>,
    pub(crate) diagnostics: Arc<dyn Diagnostics>,
    pub(crate) reply_readers: Arc<Mutex<ReplyReaders>>,
    pub(crate) tasks: TaskTracker,
    pub(crate) shutdown: CancellationToken,
}

impl SyncCoordinator {
    pub fn new(config: SyncConfig, host: Arc<dyn Host>, syncer: Arc<dyn SyncerCore>) -> Self {
        Self::with_diagnostics(config, host, syncer, Arc::new(TracingDiagnostics))
    }

    pub fn with_diagnostics(
        config: SyncConfig,
        host: Arc<dyn Host>,
        syncer: Arc<dyn SyncerCore>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let sessions = SessionTracker::new(Arc::clone(&host), config.protection_tag.clone());

        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            host,
            syncer,
            diagnostics,
            reply_readers: Arc::default(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn protocol(&self) -> &StreamProtocol {
        &self.config.protocol
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    /// Registers a session with `peer`, sends it `request` and starts reading
    /// the reply.
    ///
    /// A failed send rolls the session back and is returned to the caller.
    pub async fn begin_syncing(&self, peer: PeerId, request: BlockRequest) -> Result<(), SyncError> {
        let payload = encode(&SyncMessage::from(request)).map_err(SyncError::Encode)?;

        self.start_session(peer, payload).await
    }

    /// Like [`begin_syncing`](Self::begin_syncing), but a request that cannot
    /// be sent to `peer` is handed to a random other peer instead.
    pub async fn sync_with(&self, peer: PeerId, request: BlockRequest) -> Result<(), SyncError> {
        let payload = encode(&SyncMessage::from(request)).map_err(SyncError::Encode)?;

        match self.start_session(peer, payload.clone()).await {
            Err(SyncError::Send { peer, .. }) => {
                let _taken_by = self.retry_with_random_peer(payload, &[peer]).await;
                Ok(())
            }
            result => result,
        }
    }

    pub async fn handle_response(&self, peer: PeerId, response: BlockResponse) {
        if !self.sessions.is_syncing(&peer).await {
            self.diagnostics.record(SyncEvent::UnsolicitedResponse { peer });
            return;
        }

        let Some(next) = self.syncer.handle_block_response(response).await else {
            self.end_session(&peer).await;
            return;
        };

        let message = SyncMessage::from(next);

        let payload = match encode(&message) {
            Ok(payload) => payload,
            Err(err) => {
                self.record_encode_failure(&message, &err);
                self.end_session(&peer).await;
                return;
            }
        };

        if let Err(err) = self.host.send(peer, self.protocol(), payload.clone()).await {
            self.diagnostics.record(SyncEvent::RequestSendFailed {
                peer,
                error: err.to_string(),
            });
            self.end_session(&peer).await;

            let _taken_by = self.retry_with_random_peer(payload, &[peer]).await;
        }
    }

    /// Answers `request` from local chain state. Nothing is sent back when
    /// the response cannot be built.
    pub async fn handle_request(&self, peer: PeerId, request: BlockRequest) {
        let response = match self.syncer.create_block_response(request).await {
            Ok(response) => response,
            Err(err) => {
                self.diagnostics.record(SyncEvent::ResponseUnavailable {
                    peer,
                    error: err.to_string(),
                });
                return;
            }
        };

        let message = SyncMessage::from(response);

        let payload = match encode(&message) {
            Ok(payload) => payload,
            Err(err) => {
                self.record_encode_failure(&message, &err);
                return;
            }
        };

        if let Err(err) = self.host.send(peer, self.protocol(), payload).await {
            self.diagnostics.record(SyncEvent::ResponseSendFailed {
                peer,
                error: err.to_string(),
            });
        }
    }

    /// Tasks still running: stream read loops and stream acceptors.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.tasks.len()
    }

    /// Stops all read loops and waits for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let _was_open = self.tasks.close();
        self.tasks.wait().await;
    }

    /// Check, register and send as one unit under the session write lock.
    pub(crate) async fn start_session(&self, peer: PeerId, payload: Bytes) -> Result<(), SyncError> {
        let mut sessions = self.sessions.write().await;

        sessions.try_begin(peer)?;

        if let Err(source) = self.host.send(peer, self.protocol(), payload).await {
            let _ended = sessions.end(&peer);
            self.diagnostics.record(SyncEvent::RequestSendFailed {
                peer,
                error: source.to_string(),
            });
            return Err(SyncError::Send { peer, source });
        }

        self.diagnostics.record(SyncEvent::SessionStarted { peer });
        self.spawn_reader(peer);

        Ok(())
    }

    async fn end_session(&self, peer: &PeerId) {
        if self.sessions.end(peer).await {
            self.diagnostics.record(SyncEvent::SessionEnded { peer: *peer });
        }
    }

    pub(crate) fn record_encode_failure(&self, message: &SyncMessage, err: &io::Error) {
        self.diagnostics.record(SyncEvent::EncodeFailed {
            kind: message.kind(),
            error: err.to_string(),
        });
    }
}

pub(crate) fn encode(message: &SyncMessage) -> io::Result<Bytes> {
    message.encode().map(Bytes::from)
}

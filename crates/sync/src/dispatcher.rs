#![allow(
    clippy::allow_attributes,
    reason = "Needed for lints that don't follow expect"
)]

use std::collections::HashMap;

use blocksync_network::{PeerId, SyncStream};
use blocksync_primitives::message::{DecodeError, MessageKind, SyncMessage};
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream as FuturesStream, StreamExt};
use tokio::select;

use crate::coordinator::SyncCoordinator;
use crate::diagnostics::{DropReason, SyncEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReadEnd {
    /// End of stream or a read error.
    Closed,
    Shutdown,
}

/// Read loops over the streams our requests went out on, one per peer.
///
/// Only the most recent loop for a peer may end its session.
#[derive(Debug, Default)]
pub(crate) struct ReplyReaders {
    next_id: u64,
    live: HashMap<PeerId, u64>,
}

impl ReplyReaders {
    fn claim(&mut self, peer: PeerId) -> u64 {
        self.next_id = self.next_id.wrapping_add(1);
        drop(self.live.insert(peer, self.next_id));
        self.next_id
    }

    fn is_reading(&self, peer: &PeerId) -> bool {
        self.live.contains_key(peer)
    }

    /// Whether `id` was still the current loop for `peer`.
    fn release(&mut self, peer: &PeerId, id: u64) -> bool {
        if self.live.get(peer) != Some(&id) {
            return false;
        }

        drop(self.live.remove(peer));
        true
    }
}

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Stream handling is kept apart from session management"
)]
impl SyncCoordinator {
    /// Accepts streams from `incoming` until it ends or the coordinator shuts
    /// down, reading each one on its own task.
    pub fn serve<S>(&self, incoming: S)
    where
        S: FuturesStream<Item = SyncStream> + Send + 'static,
    {
        let coordinator = self.clone();
        let mut incoming = Box::pin(incoming);

        drop(self.tasks.spawn(async move {
            loop {
                let stream = select! {
                    () = coordinator.shutdown.cancelled() => break,
                    stream = incoming.next() => stream,
                };

                let Some(stream) = stream else { break };

                let reader = coordinator.clone();
                drop(
                    coordinator
                        .tasks
                        .spawn(async move { reader.handle_sync_stream(Some(stream)).await }),
                );
            }
        }));
    }

    /// Reads `stream` until it ends, dispatching every frame.
    ///
    /// Streams that are missing or whose remote peer is unknown are dropped.
    pub async fn handle_sync_stream(&self, stream: Option<SyncStream>) {
        let Some(stream) = stream else {
            self.diagnostics.record(SyncEvent::StreamDropped {
                reason: DropReason::MissingStream,
            });
            return;
        };

        let Some(peer) = stream.remote_peer() else {
            self.diagnostics.record(SyncEvent::StreamDropped {
                reason: DropReason::UnknownPeer,
            });
            return;
        };

        let _end = self.read_stream(peer, stream).await;
    }

    /// Decodes `bytes` from `peer` as a response if we are syncing with it
    /// and as a request otherwise.
    pub async fn decode_sync_message(
        &self,
        peer: PeerId,
        bytes: &[u8],
    ) -> Result<SyncMessage, DecodeError> {
        let sessions = self.sessions.read().await;

        let kind = if sessions.is_syncing(&peer) {
            MessageKind::BlockResponse
        } else {
            MessageKind::BlockRequest
        };

        SyncMessage::decode(kind, bytes)
    }

    pub async fn handle_sync_message(&self, peer: PeerId, message: SyncMessage) {
        match message {
            SyncMessage::BlockRequest(request) => self.handle_request(peer, request).await,
            SyncMessage::BlockResponse(response) => self.handle_response(peer, response).await,
        }
    }

    /// Reads the reply to a request we just sent `peer`.
    ///
    /// When the stream is already being read by an earlier loop, that loop
    /// gets the reply and nothing new is started. A stream that closes under
    /// the loop ends the session with `peer`.
    pub(crate) fn spawn_reader(&self, peer: PeerId) {
        let coordinator = self.clone();

        drop(self.tasks.spawn(async move {
            let Some(stream) = coordinator
                .host
                .stream(peer, coordinator.protocol())
                .await
            else {
                if !coordinator.reply_readers.lock().is_reading(&peer) {
                    coordinator.diagnostics.record(SyncEvent::StreamDropped {
                        reason: DropReason::MissingStream,
                    });
                }
                return;
            };

            let id = coordinator.reply_readers.lock().claim(peer);
            let end = coordinator.read_stream(peer, stream).await;

            coordinator.release_reader(peer, id, end).await;
        }));
    }

    async fn release_reader(&self, peer: PeerId, id: u64, end: ReadEnd) {
        let mut sessions = self.sessions.write().await;

        let current = self.reply_readers.lock().release(&peer, id);

        if current && end == ReadEnd::Closed && sessions.end(&peer) {
            self.diagnostics.record(SyncEvent::SessionEnded { peer });
        }
    }

    // Boxed: handling a frame can start another session, which spawns
    // another read loop.
    fn read_stream(&self, peer: PeerId, mut stream: SyncStream) -> BoxFuture<'static, ReadEnd> {
        let coordinator = self.clone();

        async move {
            loop {
                let frame = select! {
                    () = coordinator.shutdown.cancelled() => break ReadEnd::Shutdown,
                    frame = stream.next() => frame,
                };

                let bytes = match frame {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(err)) => {
                        coordinator.diagnostics.record(SyncEvent::StreamReadFailed {
                            peer,
                            error: err.to_string(),
                        });
                        break ReadEnd::Closed;
                    }
                    None => {
                        coordinator
                            .diagnostics
                            .record(SyncEvent::StreamClosed { peer });
                        break ReadEnd::Closed;
                    }
                };

                let message = match coordinator.decode_sync_message(peer, &bytes).await {
                    Ok(message) => message,
                    Err(err) => {
                        coordinator.diagnostics.record(SyncEvent::DecodeFailed {
                            peer,
                            kind: err.kind(),
                            error: err.to_string(),
                        });
                        continue;
                    }
                };

                coordinator.handle_sync_message(peer, message).await;
            }
        }
        .boxed()
    }
}

#![allow(
    clippy::allow_attributes,
    reason = "Needed for lints that don't follow expect"
)]

use blocksync_network::PeerId;
use blocksync_primitives::message::{BlockRequest, SyncMessage};
use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::coordinator::{encode, SyncCoordinator};
use crate::diagnostics::SyncEvent;

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Peer retry is kept apart from session management"
)]
impl SyncCoordinator {
    /// Hands `request` to the first connected peer, in random order, that
    /// takes it. Returns that peer, or `None` once every candidate failed.
    pub async fn attempt_sync_with_random_peer(&self, request: BlockRequest) -> Option<PeerId> {
        self.attempt_sync_with_random_peer_excluding(request, &[]).await
    }

    pub async fn attempt_sync_with_random_peer_excluding(
        &self,
        request: BlockRequest,
        excluded: &[PeerId],
    ) -> Option<PeerId> {
        let message = SyncMessage::from(request);

        match encode(&message) {
            Ok(payload) => self.retry_with_random_peer(payload, excluded).await,
            Err(err) => {
                self.record_encode_failure(&message, &err);
                None
            }
        }
    }

    /// Each candidate is its own critical section. Peers that already have a
    /// session are skipped.
    pub(crate) async fn retry_with_random_peer(
        &self,
        payload: Bytes,
        excluded: &[PeerId],
    ) -> Option<PeerId> {
        let mut candidates = self.host.peers().await;
        candidates.retain(|peer| !excluded.contains(peer));
        candidates.shuffle(&mut thread_rng());

        for &peer in &candidates {
            if self.start_session(peer, payload.clone()).await.is_ok() {
                self.diagnostics.record(SyncEvent::RetrySucceeded { peer });
                return Some(peer);
            }
        }

        self.diagnostics.record(SyncEvent::RetryExhausted {
            candidates: candidates.len(),
        });

        None
    }
}

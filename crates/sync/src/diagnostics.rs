#[cfg(test)]
#[path = "tests/diagnostics.rs"]
mod tests;

use core::fmt;

use blocksync_network::PeerId;
use blocksync_primitives::message::MessageKind;
use tracing::{debug, error, trace, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DropReason {
    /// The transport had no stream to hand out.
    MissingStream,
    /// The stream could not tell who is on the other end.
    UnknownPeer,
}

/// Everything the sync layer reports about its own progress and failures.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SyncEvent {
    StreamDropped {
        reason: DropReason,
    },
    StreamClosed {
        peer: PeerId,
    },
    StreamReadFailed {
        peer: PeerId,
        error: String,
    },
    DecodeFailed {
        peer: PeerId,
        kind: MessageKind,
        error: String,
    },
    SessionStarted {
        peer: PeerId,
    },
    SessionEnded {
        peer: PeerId,
    },
    /// A response from a peer we are not waiting on.
    UnsolicitedResponse {
        peer: PeerId,
    },
    ResponseUnavailable {
        peer: PeerId,
        error: String,
    },
    ResponseSendFailed {
        peer: PeerId,
        error: String,
    },
    RequestSendFailed {
        peer: PeerId,
        error: String,
    },
    RetrySucceeded {
        peer: PeerId,
    },
    /// No candidate took the request; it is abandoned.
    RetryExhausted {
        candidates: usize,
    },
    EncodeFailed {
        kind: MessageKind,
        error: String,
    },
}

impl SyncEvent {
    #[must_use]
    pub const fn peer(&self) -> Option<PeerId> {
        match self {
            Self::StreamClosed { peer }
            | Self::StreamReadFailed { peer, .. }
            | Self::DecodeFailed { peer, .. }
            | Self::SessionStarted { peer }
            | Self::SessionEnded { peer }
            | Self::UnsolicitedResponse { peer }
            | Self::ResponseUnavailable { peer, .. }
            | Self::ResponseSendFailed { peer, .. }
            | Self::RequestSendFailed { peer, .. }
            | Self::RetrySucceeded { peer } => Some(*peer),
            Self::StreamDropped { .. } | Self::RetryExhausted { .. } | Self::EncodeFailed { .. } => {
                None
            }
        }
    }
}

/// Sink for [`SyncEvent`]s, injected into the coordinator.
pub trait Diagnostics: Send + Sync + fmt::Debug {
    fn record(&self, event: SyncEvent);
}

/// Emits every event as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, event: SyncEvent) {
        match event {
            SyncEvent::StreamDropped { reason } => debug!(?reason, "Dropping sync stream"),
            SyncEvent::StreamClosed { peer } => trace!(%peer, "Sync stream closed"),
            SyncEvent::StreamReadFailed { peer, error } => {
                debug!(%peer, %error, "Failed to read from sync stream");
            }
            SyncEvent::DecodeFailed { peer, kind, error } => {
                trace!(%peer, %kind, %error, "Failed to decode sync message");
            }
            SyncEvent::SessionStarted { peer } => debug!(%peer, "Started syncing"),
            SyncEvent::SessionEnded { peer } => debug!(%peer, "Stopped syncing"),
            SyncEvent::UnsolicitedResponse { peer } => {
                debug!(%peer, "Ignoring response from peer we are not syncing with");
            }
            SyncEvent::ResponseUnavailable { peer, error } => {
                debug!(%peer, %error, "Cannot answer block request");
            }
            SyncEvent::ResponseSendFailed { peer, error } => {
                error!(%peer, %error, "Failed to send block response");
            }
            SyncEvent::RequestSendFailed { peer, error } => {
                debug!(%peer, %error, "Failed to send block request");
            }
            SyncEvent::RetrySucceeded { peer } => debug!(%peer, "Handed block request to peer"),
            SyncEvent::RetryExhausted { candidates } => {
                warn!(candidates, "No peer accepted block request, giving up");
            }
            SyncEvent::EncodeFailed { kind, error } => {
                error!(%kind, %error, "Failed to encode sync message");
            }
        }
    }
}

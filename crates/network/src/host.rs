use core::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use libp2p::{PeerId, StreamProtocol};
use thiserror::Error;

use crate::stream::{CodecError, SyncStream};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SendError {
    #[error("peer {0} is not connected")]
    NotConnected(Box<PeerId>),
    #[error("failed to open stream: {0}")]
    OpenStream(String),
    #[error("failed to write frame: {0}")]
    Codec(#[from] CodecError),
    #[error("network is shut down")]
    Closed,
}

/// The peer-to-peer transport as seen by the sync protocol.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait Host: Send + Sync + fmt::Debug {
    /// Writes one frame to `peer` on `protocol`, opening a stream if none is
    /// open yet.
    async fn send(
        &self,
        peer: PeerId,
        protocol: &StreamProtocol,
        data: Bytes,
    ) -> Result<(), SendError>;

    /// The read side of the stream `send` writes to, if it has not been
    /// claimed yet.
    async fn stream(&self, peer: PeerId, protocol: &StreamProtocol) -> Option<SyncStream>;

    async fn peers(&self) -> Vec<PeerId>;

    /// Asks the transport not to prune connections to `peer` while `tag`
    /// holds it.
    fn protect(&self, peer: PeerId, tag: &str);

    fn unprotect(&self, peer: PeerId, tag: &str);
}

use std::error::Error as StdError;
use std::io;

use blocksync_network::{PeerId, SendError};
use blocksync_primitives::message::StartingBlock;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error("already syncing with {peer}")]
    AlreadySyncing { peer: PeerId },
    #[error("failed to encode request")]
    Encode(#[source] io::Error),
    #[error("failed to send request to {peer}")]
    Send {
        peer: PeerId,
        #[source]
        source: SendError,
    },
}

/// Why a block response could not be built for a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("unknown starting block {0}")]
    UnknownBlock(StartingBlock),
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("chain state unavailable")]
    Unavailable(#[source] Box<dyn StdError + Send + Sync>),
}

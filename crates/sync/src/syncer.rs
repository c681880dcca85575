use core::fmt;

use async_trait::async_trait;
use blocksync_primitives::message::{BlockRequest, BlockResponse};

use crate::error::BuildError;

/// Chain-side half of the sync protocol.
///
/// Picks block ranges, validates and imports what peers send back, and
/// answers other peers' requests from local chain state.
#[async_trait]
pub trait SyncerCore: Send + Sync + fmt::Debug {
    /// Consumes a response to one of our requests. `None` means the exchange
    /// with that peer is complete.
    async fn handle_block_response(&self, response: BlockResponse) -> Option<BlockRequest>;

    async fn create_block_response(
        &self,
        request: BlockRequest,
    ) -> Result<BlockResponse, BuildError>;
}

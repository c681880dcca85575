#[cfg(test)]
#[path = "tests/message.rs"]
mod tests;

use core::fmt;
use core::ops::BitOr;
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::block::{BlockData, BlockHash, BlockNumber};

/// Upper bound on the number of blocks a single response may carry.
pub const MAX_BLOCKS_IN_RESPONSE: u32 = 128;

/// Bit set describing which parts of each block a request wants back.
#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct RequestedData(u8);

impl RequestedData {
    pub const HEADER: Self = Self(0x01);
    pub const BODY: Self = Self(0x02);
    pub const RECEIPT: Self = Self(0x04);
    pub const MESSAGE_QUEUE: Self = Self(0x08);
    pub const JUSTIFICATION: Self = Self(0x10);

    /// What a node catching up on the chain asks for.
    pub const BOOTSTRAP: Self = Self(Self::HEADER.0 | Self::BODY.0 | Self::JUSTIFICATION.0);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RequestedData {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StartingBlock {
    Hash(BlockHash),
    Number(BlockNumber),
}

impl fmt::Display for StartingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "{hash}"),
            Self::Number(number) => write!(f, "#{number}"),
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct BlockRequest {
    pub requested_data: RequestedData,
    pub starting_block: StartingBlock,
    pub end_block_hash: Option<BlockHash>,
    pub direction: Direction,
    pub max: Option<u32>,
}

impl BlockRequest {
    #[must_use]
    pub const fn new(
        requested_data: RequestedData,
        starting_block: StartingBlock,
        end_block_hash: Option<BlockHash>,
        direction: Direction,
        max: Option<u32>,
    ) -> Self {
        Self {
            requested_data,
            starting_block,
            end_block_hash,
            direction,
            max,
        }
    }

    /// Ascending request for up to `max` blocks, capped at
    /// [`MAX_BLOCKS_IN_RESPONSE`].
    #[must_use]
    pub fn ascending(starting_block: StartingBlock, max: u32) -> Self {
        Self::new(
            RequestedData::BOOTSTRAP,
            starting_block,
            None,
            Direction::Ascending,
            Some(max.min(MAX_BLOCKS_IN_RESPONSE)),
        )
    }

    /// Ascending request covering `start..=end` by number.
    #[must_use]
    pub fn range(start: BlockNumber, end: BlockNumber) -> Self {
        let count = end.saturating_sub(start).saturating_add(1);
        let max = u32::try_from(count).unwrap_or(u32::MAX);

        Self::ascending(StartingBlock::Number(start), max)
    }

    /// The numbered range this request covers, when it can be known without
    /// chain state (numbered start and bounded length).
    #[must_use]
    pub fn requested_range(&self) -> Option<(BlockNumber, BlockNumber)> {
        let StartingBlock::Number(start) = self.starting_block else {
            return None;
        };

        let span = BlockNumber::from(self.max?.checked_sub(1)?);

        match self.direction {
            Direction::Ascending => Some((start, start.saturating_add(span))),
            Direction::Descending => Some((start.saturating_sub(span), start)),
        }
    }
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct BlockResponse {
    pub block_data: Vec<BlockData>,
}

impl BlockResponse {
    #[must_use]
    pub const fn new(block_data: Vec<BlockData>) -> Self {
        Self { block_data }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block_data.is_empty()
    }

    #[must_use]
    pub fn first_number(&self) -> Option<BlockNumber> {
        self.block_data.first().map(|block| block.number)
    }

    #[must_use]
    pub fn last_number(&self) -> Option<BlockNumber> {
        self.block_data.last().map(|block| block.number)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MessageKind {
    BlockRequest,
    BlockResponse,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BlockRequest => "BlockRequest",
            Self::BlockResponse => "BlockResponse",
        })
    }
}

#[derive(Debug, Error)]
#[error("failed to decode {kind}: {source}")]
pub struct DecodeError {
    kind: MessageKind,
    source: io::Error,
}

impl DecodeError {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }
}

/// A message on the sync protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SyncMessage {
    BlockRequest(BlockRequest),
    BlockResponse(BlockResponse),
}

impl SyncMessage {
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::BlockRequest(_) => MessageKind::BlockRequest,
            Self::BlockResponse(_) => MessageKind::BlockResponse,
        }
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        match self {
            Self::BlockRequest(request) => borsh::to_vec(request),
            Self::BlockResponse(response) => borsh::to_vec(response),
        }
    }

    /// Decodes `bytes` as the given kind. Nothing in the payload says which
    /// kind it is, so the caller has to know.
    pub fn decode(kind: MessageKind, bytes: &[u8]) -> Result<Self, DecodeError> {
        match kind {
            MessageKind::BlockRequest => decode_as_request(bytes).map(Self::BlockRequest),
            MessageKind::BlockResponse => decode_as_response(bytes).map(Self::BlockResponse),
        }
    }
}

impl From<BlockRequest> for SyncMessage {
    fn from(request: BlockRequest) -> Self {
        Self::BlockRequest(request)
    }
}

impl From<BlockResponse> for SyncMessage {
    fn from(response: BlockResponse) -> Self {
        Self::BlockResponse(response)
    }
}

pub fn decode_as_request(bytes: &[u8]) -> Result<BlockRequest, DecodeError> {
    borsh::from_slice(bytes).map_err(|source| DecodeError {
        kind: MessageKind::BlockRequest,
        source,
    })
}

pub fn decode_as_response(bytes: &[u8]) -> Result<BlockResponse, DecodeError> {
    borsh::from_slice(bytes).map_err(|source| DecodeError {
        kind: MessageKind::BlockResponse,
        source,
    })
}

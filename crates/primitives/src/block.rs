#[cfg(test)]
#[path = "tests/block.rs"]
mod tests;

use core::fmt;
use core::ops::Deref;

use borsh::{BorshDeserialize, BorshSerialize};

const HASH_LEN: usize = 32;

pub type BlockNumber = u64;

#[derive(
    BorshSerialize, BorshDeserialize, Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub struct BlockHash([u8; HASH_LEN]);

impl BlockHash {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }
}

impl From<[u8; HASH_LEN]> for BlockHash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<BlockHash> for [u8; HASH_LEN] {
    fn from(hash: BlockHash) -> Self {
        hash.0
    }
}

impl Deref for BlockHash {
    type Target = [u8; HASH_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A single block as carried by a block response.
///
/// Everything except the hash and number is optional, mirroring which parts
/// of the block the request asked for.
#[derive(BorshSerialize, BorshDeserialize, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct BlockData {
    pub hash: BlockHash,
    pub number: BlockNumber,
    pub header: Option<Vec<u8>>,
    pub body: Option<Vec<Vec<u8>>>,
    pub receipt: Option<Vec<u8>>,
    pub message_queue: Option<Vec<u8>>,
    pub justification: Option<Vec<u8>>,
}

impl BlockData {
    #[must_use]
    pub const fn new(hash: BlockHash, number: BlockNumber) -> Self {
        Self {
            hash,
            number,
            header: None,
            body: None,
            receipt: None,
            message_queue: None,
            justification: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: Vec<u8>) -> Self {
        self.header = Some(header);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<Vec<u8>>) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_justification(mut self, justification: Vec<u8>) -> Self {
        self.justification = Some(justification);
        self
    }
}

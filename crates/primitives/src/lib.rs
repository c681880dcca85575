//! Wire-level types exchanged on the block sync protocol.
//!
//! Both message kinds are borsh-encoded without a kind prefix, so a payload
//! cannot be classified from its bytes alone. Callers pick the kind to decode
//! as (see [`message::SyncMessage::decode`]).

pub mod block;
pub mod message;

//! Block sync sessions.
//!
//! The same wire format carries both block requests and block responses, so
//! an inbound payload is classified by whether we are currently waiting on
//! the sending peer. [`SyncCoordinator`] owns that bookkeeping: it registers a
//! session and sends the request as one step under the [`SessionTracker`]
//! write lock, decodes inbound frames under its read lock, and hands requests
//! it cannot deliver to a random other peer.
//!
//! ```rust,ignore
//! let coordinator = SyncCoordinator::new(config.sync.clone(), host, syncer);
//!
//! coordinator.serve(client.incoming(config.sync.protocol.clone())?);
//! coordinator.sync_with(peer_id, BlockRequest::range(100, 200)).await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod diagnostics;
mod dispatcher;
pub mod error;
mod retry;
pub mod session;
pub mod syncer;

pub use config::{NodeConfig, SyncConfig};
pub use coordinator::SyncCoordinator;
pub use diagnostics::{Diagnostics, DropReason, SyncEvent, TracingDiagnostics};
pub use error::{BuildError, SyncError};
pub use session::SessionTracker;
pub use syncer::SyncerCore;

//! Runs peer state machines on tokio: one task per peer owning its
//! transport, timers and pending transactions.

// Per-peer task and its handle
pub mod actor;

// Stream framing
pub mod codec;

// Application handler registry
pub mod dispatch;

// Request/answer correlation
pub mod transaction;

pub use actor::{spawn_peer, PeerContext, PeerFramed, PeerHandle, PeerId, PeerSettings};
pub use codec::{DiameterCodec, Frame};
pub use dispatch::{Dispatcher, FnHandler, MessageHandler, RouteId};
pub use transaction::PendingTransactions;

//! Diameter node: the peer table, outbound routing, the inbound listener
//! and the [`DiameterStack`] facade tying them to the peer runtime.

// Inbound TCP accept path
pub mod listener;

// Destination-Host / Destination-Realm peer selection
pub mod routing;

// Stack facade
pub mod stack;

// Copy-on-write peer table
pub mod table;

pub use routing::{RouteCandidate, RouteMatch, RoutingDecision, RoutingEngine};
pub use stack::DiameterStack;
pub use table::{PeerEntry, PeerSet, PeerTable};

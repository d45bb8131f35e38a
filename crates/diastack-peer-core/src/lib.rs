// CER/CEA, DWR/DWA, DPR/DPA construction and application negotiation
pub mod capabilities;

// Peer state machine
pub mod fsm;

// States, events, actions and peer settings
pub mod types;

pub use fsm::PeerFsm;
pub use types::*;

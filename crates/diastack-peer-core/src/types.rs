use diastack_message::DiameterMessage;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

// RFC 6733 Sec 5.6 Peer State Machine, reduced to the states this stack needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Closed,
    Connecting,                 // transport connect in progress (active only)
    AwaitingCapabilityExchange, // CER sent and waiting for CEA, or waiting for CER
    Open,
    Closing, // DPR/DPA exchanged, waiting for the transport to go away
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::Connecting => "Connecting",
            Self::AwaitingCapabilityExchange => "AwaitingCapabilityExchange",
            Self::Open => "Open",
            Self::Closing => "Closing",
        };
        f.write_str(name)
    }
}

/// Who opens the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerMode {
    #[default]
    Active,
    Passive,
}

/// Timers owned by one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Connect plus CER/CEA must finish within this
    CapabilityExchange,
    /// Tw
    Watchdog,
    Reconnect,
    /// Closing waits this long for the transport to close
    Disconnect,
}

// FSM input
#[derive(Debug)]
pub enum FsmEvent {
    /// connect(): open an active peer, re-arm a stopped one
    Start,
    ConnectionUp,
    ConnectionFailed(String),
    /// A transport for this peer was accepted by the listener
    InboundAccepted,
    MessageReceived(DiameterMessage),
    MalformedReceived(String),
    TimerExpired(TimerKind),
    /// Local disconnect with a Disconnect-Cause value
    DisconnectRequest(u32),
    ConnectionClosed,
    /// Forced teardown; no DPR, no reconnect
    Stop,
}

// FSM output
#[derive(Debug, PartialEq)]
pub enum FsmAction {
    Connect,
    Disconnect,
    Send(DiameterMessage),
    ArmTimer(TimerKind, Duration),
    CancelTimer(TimerKind),
    /// Entered Open: the peer is a routing candidate
    RegisterRoute,
    /// Left Open
    DeregisterRoute,
    /// Application traffic for the dispatch layer
    Deliver(DiameterMessage),
    HandshakeFailed(String),
    Log(String),
}

/// How a step changed the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Transitioned { from: PeerState, to: PeerState },
    /// Handled without a state change
    Stayed,
    /// Not meaningful in the current state; nothing done
    Ignored,
}

/// Result of feeding one event
#[derive(Debug, PartialEq)]
pub struct Step {
    pub outcome: StepOutcome,
    pub actions: Vec<FsmAction>,
}

/// Timer settings for one peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerTimers {
    pub handshake_timeout: Duration,
    pub watchdog_interval: Duration, // Tw
    pub max_watchdog_failures: u32,  // unanswered DWRs tolerated
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub disconnect_timeout: Duration,
}

impl Default for PeerTimers {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(30),
            max_watchdog_failures: 3,
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

/// Remote peer settings
#[derive(Debug, Clone, PartialEq)]
pub struct PeerConfig {
    pub host: String,
    pub realm: String,
    pub mode: PeerMode,
    pub retry: bool,
    pub timers: PeerTimers,
}

/// What this node advertises in CER/CEA and stamps on base messages
#[derive(Debug, Clone, PartialEq)]
pub struct LocalIdentity {
    pub host: String,
    pub realm: String,
    pub host_ip_addresses: Vec<IpAddr>,
    pub vendor_id: u32,
    pub product_name: String,
    pub origin_state_id: u32,
    pub auth_application_ids: Vec<u32>,
    pub acct_application_ids: Vec<u32>,
}

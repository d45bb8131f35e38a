use thiserror::Error;

/// Main error type for the Diameter stack
#[derive(Error, Debug)]
pub enum DiameterError {
    // ========================================
    // Framing Errors
    // ========================================
    #[error("Malformed Diameter message: {0}")]
    MalformedMessage(String),

    #[error("Not a Diameter message: unsupported protocol version {0}")]
    ProtocolVersionMismatch(u8),

    // ========================================
    // AVP Access Errors
    // ========================================
    #[error("Missing required AVP: {name} ({code})")]
    MissingRequiredAvp { code: u32, name: &'static str },

    #[error("AVP {code} is {actual}, not {expected}")]
    AvpTypeMismatch {
        code: u32,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Invalid AVP value for code {code}: {reason}")]
    InvalidAvpValue { code: u32, reason: String },

    // ========================================
    // Routing Errors
    // ========================================
    #[error("No route available for realm {realm:?} host {host:?}")]
    NoRouteAvailable {
        realm: Option<String>,
        host: Option<String>,
    },

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    // ========================================
    // Peer Errors
    // ========================================
    #[error("Capabilities exchange with {peer} failed: {reason}")]
    CapabilityExchangeFailure { peer: String, reason: String },

    #[error("Peer {peer} is not open (state {state})")]
    PeerNotOpen { peer: String, state: String },

    #[error("Peer {0} closed")]
    PeerClosed(String),

    #[error("Transaction timeout after {0}ms")]
    TransactionTimeout(u64),

    // ========================================
    // System Errors
    // ========================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    // ========================================
    // Network Errors
    // ========================================
    #[error("Transport I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl DiameterError {
    /// Shorthand for a malformed message error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage(reason.into())
    }

    /// Convert error to Diameter Result-Code
    pub fn to_result_code(&self) -> u32 {
        match self {
            Self::MalformedMessage(_) => 3008, // DIAMETER_INVALID_HDR_BITS
            Self::ProtocolVersionMismatch(_) => 5011, // DIAMETER_UNSUPPORTED_VERSION
            Self::MissingRequiredAvp { .. } => 5005, // DIAMETER_MISSING_AVP
            Self::AvpTypeMismatch { .. } | Self::InvalidAvpValue { .. } => 5004, // DIAMETER_INVALID_AVP_VALUE
            Self::NoRouteAvailable { .. } => 3003, // DIAMETER_REALM_NOT_SERVED
            Self::UnknownPeer(_) => 3010,           // DIAMETER_UNKNOWN_PEER
            Self::PeerNotOpen { .. } | Self::PeerClosed(_) => 3002, // DIAMETER_UNABLE_TO_DELIVER
            Self::TransactionTimeout(_) => 3002,
            _ => 5012, // DIAMETER_UNABLE_TO_COMPLY
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ProtocolVersionMismatch(_) => ErrorSeverity::Info,
            Self::MalformedMessage(_)
            | Self::MissingRequiredAvp { .. }
            | Self::AvpTypeMismatch { .. }
            | Self::InvalidAvpValue { .. } => ErrorSeverity::Warning,
            Self::NoRouteAvailable { .. }
            | Self::CapabilityExchangeFailure { .. }
            | Self::PeerNotOpen { .. } => ErrorSeverity::Error,
            Self::Config(_) => ErrorSeverity::Critical,
            _ => ErrorSeverity::Warning,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionTimeout(_)
                | Self::Io(_)
                | Self::PeerClosed(_)
                | Self::CapabilityExchangeFailure { .. }
        )
    }

    /// Framing failures that drop the message (and the connection during a handshake)
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedMessage(_) | Self::ProtocolVersionMismatch(_)
        )
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Result type alias for Diameter stack operations
pub type Result<T> = std::result::Result<T, DiameterError>;

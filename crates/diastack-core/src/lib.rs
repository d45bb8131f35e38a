// Error types module
pub mod error;

// Wire codec module
pub mod codec;

// Transport abstraction module
pub mod transport;

// Re-export commonly used types
pub use codec::{could_be_diameter, decode_avps, encode_avps, DiameterHeader, FramedAvp};
pub use error::{DiameterError, ErrorSeverity, Result};
pub use transport::{BoxTransport, ConnectionId, Connector, TcpConnector, Transport, TransportKind};

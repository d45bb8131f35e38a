use crate::error::{DiameterError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Abstract transport layer trait
/// Allows switching between TCP and SCTP (or mocks) transparently
#[async_trait]
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {
    /// Get remote peer address
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// Get local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

// Implement Transport for tokio::net::TcpStream
#[async_trait]
impl Transport for tokio::net::TcpStream {
    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.peer_addr()?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr()?)
    }
}

// In-memory pipe; has no socket addresses of its own
#[async_trait]
impl Transport for tokio::io::DuplexStream {
    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }
}

/// Boxed transport handed to a peer once a connection exists
pub type BoxTransport = Box<dyn Transport>;

/// Transport protocol a peer is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Sctp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Sctp => write!(f, "sctp"),
        }
    }
}

/// Identity of one transport connection, unique for the life of a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Establishes outbound transport connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, kind: TransportKind, addr: SocketAddr) -> Result<BoxTransport>;
}

/// Connector for plain TCP; SCTP is not available through tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, kind: TransportKind, addr: SocketAddr) -> Result<BoxTransport> {
        match kind {
            TransportKind::Tcp => {
                let stream = tokio::net::TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            TransportKind::Sctp => Err(DiameterError::UnsupportedTransport(kind.to_string())),
        }
    }
}

use crate::stack::DiameterStack;
use diastack_core::{BoxTransport, DiameterError, Result};
use diastack_message::{DiameterMessage, RESULT_CODE_UNKNOWN_PEER};
use diastack_peer_core::capabilities;
use diastack_peer_runtime::{Frame, PeerFramed};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

impl DiameterStack {
    /// Accept loop; every connection gets its own task
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr().ok(), "Diameter listening");

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    debug!(%addr, "New connection");
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    let stack = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = stack.accept(Box::new(socket)).await {
                            warn!(%addr, error = %e, "Inbound connection rejected");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                }
            }
        }
    }

    /// Take an inbound transport: its first message must be a CER from a
    /// configured peer, which then owns the connection. Anything else is
    /// refused and the transport dropped.
    pub async fn accept(&self, transport: BoxTransport) -> Result<()> {
        let mut framed = self.ctx.framed(transport);
        let first = self.first_message(&mut framed).await?;

        if !first.is_cer() {
            self.ctx.metrics.handshake_failures.inc();
            return Err(DiameterError::CapabilityExchangeFailure {
                peer: first.origin_host().unwrap_or("unknown").to_string(),
                reason: format!("expected CER, got command {}", first.command_code()),
            });
        }

        let origin_host = first.origin_host()?.to_string();
        let Some(peer) = self.peer_by_host(&origin_host) else {
            self.ctx.metrics.handshake_failures.inc();
            let cea = capabilities::cea(&first, RESULT_CODE_UNKNOWN_PEER, &self.ctx.local);
            if let Err(e) = framed.send(cea).await {
                debug!(peer = %origin_host, error = %e, "Failed to send CEA");
            }
            return Err(DiameterError::UnknownPeer(origin_host));
        };

        let connection = self.ctx.next_connection_id();
        debug!(peer = %peer.id(), connection = %connection, "Attaching inbound connection");
        peer.attach(connection, framed, first).await
    }

    async fn first_message(&self, framed: &mut PeerFramed) -> Result<DiameterMessage> {
        let frame = tokio::time::timeout(self.handshake_timeout, framed.next())
            .await
            .map_err(|_| DiameterError::CapabilityExchangeFailure {
                peer: "unknown".to_string(),
                reason: "no CER before the handshake timeout".to_string(),
            })?;

        match frame {
            Some(Ok(Frame::Message(message))) => {
                self.ctx.metrics.messages_received.inc();
                Ok(message)
            }
            Some(Ok(Frame::Malformed(e))) | Some(Err(e)) => {
                self.ctx.metrics.framing_errors.inc();
                Err(e)
            }
            None => Err(DiameterError::PeerClosed("unknown".to_string())),
        }
    }
}

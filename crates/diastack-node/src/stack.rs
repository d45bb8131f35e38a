use crate::routing::RoutingEngine;
use crate::table::{PeerEntry, PeerTable};
use diastack_config::StackConfig;
use diastack_core::{BoxTransport, ConnectionId, Connector, DiameterError, Result, TcpConnector, TransportKind};
use diastack_dict::{Dictionary, DictionaryBuilder};
use diastack_message::{DiameterMessage, IdGenerator};
use diastack_metrics::StackMetrics;
use diastack_peer_core::{LocalIdentity, PeerMode};
use diastack_peer_runtime::{
    spawn_peer, MessageHandler, PeerContext, PeerHandle, PeerId, PeerSettings, RouteId,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One Diameter node: its peers, their routing and the handlers
/// application code registers for inbound messages.
pub struct DiameterStack {
    pub(crate) ctx: Arc<PeerContext>,
    table: PeerTable,
    routing: RoutingEngine,
    dictionary: Arc<Dictionary>,
    pub(crate) handshake_timeout: Duration,
    running: AtomicBool,
}

impl DiameterStack {
    pub fn new(ctx: PeerContext, dictionary: Dictionary) -> Self {
        Self {
            ctx: Arc::new(ctx),
            table: PeerTable::new(),
            routing: RoutingEngine::new(),
            dictionary: Arc::new(dictionary),
            handshake_timeout: Duration::from_secs(10),
            running: AtomicBool::new(false),
        }
    }

    /// Build a stack dialling over TCP and record every configured peer
    pub async fn from_config(config: &StackConfig) -> Result<Self> {
        Self::from_config_with(config, Arc::new(TcpConnector)).await
    }

    pub async fn from_config_with(config: &StackConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let metrics = StackMetrics::new().map_err(|e| DiameterError::Config(e.to_string()))?;
        let mut ctx = PeerContext::new(config.local.identity(), connector, metrics);
        ctx.max_message_len = config.max_message_len;
        ctx.transaction_timeout = config.timers.transaction_timeout();
        ctx.drain_timeout = config.timers.drain_timeout();

        let mut builder = DictionaryBuilder::with_base().map_err(|e| DiameterError::Config(e.to_string()))?;
        if let Some(path) = &config.dictionary {
            let document = tokio::fs::read_to_string(path).await?;
            builder
                .extend_xml(&document)
                .map_err(|e| DiameterError::Config(format!("{path}: {e}")))?;
        }

        let mut stack = Self::new(ctx, builder.build());
        stack.handshake_timeout = config.timers.peer_timers().handshake_timeout;

        for peer in &config.peers {
            stack
                .add_peer(PeerSettings {
                    config: peer.peer_config(&config.timers),
                    address: peer.address,
                    transport: peer.transport,
                })
                .await?;
        }

        info!(
            host = %stack.ctx.local.host,
            realm = %stack.ctx.local.realm,
            peers = stack.table.snapshot().len(),
            avps = stack.dictionary.len(),
            "Diameter stack configured"
        );
        Ok(stack)
    }

    /// Time an accepted connection has to send its CER
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn context(&self) -> &Arc<PeerContext> {
        &self.ctx
    }

    pub fn local(&self) -> &LocalIdentity {
        &self.ctx.local
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ctx.ids
    }

    pub fn dictionary(&self) -> &Arc<Dictionary> {
        &self.dictionary
    }

    pub fn metrics(&self) -> &StackMetrics {
        &self.ctx.metrics
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start dialling every active peer
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = self.table.snapshot();
        info!(peers = snapshot.len(), "Starting Diameter stack");
        for entry in snapshot.in_order() {
            if entry.handle.mode() == PeerMode::Active {
                entry.handle.connect().await?;
            }
        }
        Ok(())
    }

    /// Gracefully remove every peer and stop
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);

        let snapshot = self.table.snapshot();
        info!(peers = snapshot.len(), "Shutting down Diameter stack");
        let removals = snapshot.in_order().into_iter().map(|entry| {
            let id = entry.handle.id().clone();
            async move {
                if let Err(e) = self.remove_peer(&id, false).await {
                    debug!(peer = %id, error = %e, "Peer already removed");
                }
            }
        });
        futures::future::join_all(removals).await;
    }

    /// Add a peer. Adding an identity that is already present returns the
    /// running peer and changes nothing. An active peer is dialled straight
    /// away when the stack is running.
    pub async fn add_peer(&self, settings: PeerSettings) -> Result<PeerHandle> {
        let id = settings.id();
        let ctx = self.ctx.clone();
        let (entry, created) = self
            .table
            .insert_with(&id, settings, |settings| spawn_peer(settings.clone(), ctx));

        if !created {
            debug!(peer = %id, "Peer already present");
            return Ok(entry.handle);
        }

        info!(
            peer = %id,
            realm = %id.realm(),
            mode = ?entry.handle.mode(),
            address = ?entry.settings.address,
            "Peer added"
        );
        if self.is_running() && entry.handle.mode() == PeerMode::Active {
            entry.handle.connect().await?;
        }
        Ok(entry.handle)
    }

    /// Take a peer out of the table and stop it. Routing stops picking it
    /// before the drain starts.
    pub async fn remove_peer(&self, id: &PeerId, force: bool) -> Result<()> {
        let entry = self
            .table
            .remove(id)
            .ok_or_else(|| DiameterError::UnknownPeer(id.to_string()))?;

        info!(peer = %id, force, "Removing peer");
        entry.handle.remove(force).await
    }

    pub fn peer(&self, id: &PeerId) -> Option<PeerHandle> {
        self.table.snapshot().get(id).map(|entry| entry.handle.clone())
    }

    pub fn peer_by_host(&self, host: &str) -> Option<PeerHandle> {
        self.table.snapshot().by_host(host).map(|entry| entry.handle.clone())
    }

    /// Every peer in insertion order
    pub fn peers(&self) -> Vec<PeerHandle> {
        self.table
            .snapshot()
            .in_order()
            .into_iter()
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// The peer owning a live transport
    pub fn peer_for_connection(&self, connection: ConnectionId) -> Option<PeerHandle> {
        let id = self.ctx.peer_for_connection(connection)?;
        self.peer(&id)
    }

    /// Pick the peer that should carry `message`
    pub fn route(&self, message: &DiameterMessage) -> Result<PeerHandle> {
        let snapshot = self.table.snapshot();
        let candidates: Vec<&PeerEntry> = snapshot.in_order();
        match self.routing.route(candidates.iter().copied(), message) {
            Ok(decision) => {
                debug!(
                    peer = %decision.peer.handle.id(),
                    matched = ?decision.matched,
                    command = message.command_code(),
                    "Routed message"
                );
                Ok(decision.peer.handle.clone())
            }
            Err(e) => {
                self.ctx.metrics.routing_failures.inc();
                warn!(
                    command = message.command_code(),
                    destination_host = ?message.destination_host(),
                    destination_realm = ?message.destination_realm(),
                    "No route for message"
                );
                Err(e)
            }
        }
    }

    /// Route and write a message without waiting for an answer
    pub async fn send(&self, message: DiameterMessage) -> Result<()> {
        self.route(&message)?.send(message).await
    }

    /// Route a request and wait for its answer
    pub async fn request(&self, message: DiameterMessage) -> Result<DiameterMessage> {
        self.route(&message)?.request(message).await
    }

    /// Open a raw transport through the stack's connector
    pub async fn connect(&self, kind: TransportKind, addr: SocketAddr) -> Result<BoxTransport> {
        self.ctx.connector.connect(kind, addr).await
    }

    /// Run `handler` for inbound requests (and unawaited answers) matching `predicate`
    pub fn on<P, F, Fut>(&self, predicate: P, handler: F) -> RouteId
    where
        P: Fn(&DiameterMessage) -> bool + Send + Sync + 'static,
        F: Fn(PeerHandle, DiameterMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ctx.dispatcher.on(predicate, handler)
    }

    pub fn register<P>(&self, predicate: P, handler: Arc<dyn MessageHandler>) -> RouteId
    where
        P: Fn(&DiameterMessage) -> bool + Send + Sync + 'static,
    {
        self.ctx.dispatcher.register(predicate, handler)
    }

    pub fn off(&self, id: RouteId) -> bool {
        self.ctx.dispatcher.unregister(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diastack_config::load_from_yaml;
    use diastack_peer_core::PeerState;

    const YAML: &str = r#"
local:
  host: dra.example.com
  realm: example.com
  host_ip_addresses: ["127.0.0.1"]
  auth_application_ids: [16777251]
peers:
  - host: hss1.example.com
    realm: example.com
    address: "192.0.2.1:3868"
  - host: HSS1.example.com
    realm: example.com
    address: "192.0.2.2:3868"
  - host: mme.example.com
    realm: example.com
    mode: passive
timers:
  transaction_timeout_ms: 2500
"#;

    #[tokio::test]
    async fn test_from_config_records_peers() {
        let config: StackConfig = load_from_yaml(YAML).unwrap();
        let stack = DiameterStack::from_config(&config).await.unwrap();

        // duplicate identity kept once
        let peers = stack.peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0].id().host(), "hss1.example.com");
        assert_eq!(peers[1].mode(), PeerMode::Passive);
        assert!(peers.iter().all(|p| p.state() == PeerState::Closed));

        assert!(!stack.is_running());
        assert_eq!(stack.context().transaction_timeout, Duration::from_millis(2500));
        assert!(!stack.dictionary().is_empty());
        assert!(stack.peer_by_host("MME.example.com").is_some());
    }

    #[tokio::test]
    async fn test_remove_unknown_peer() {
        let config: StackConfig = load_from_yaml(YAML).unwrap();
        let stack = DiameterStack::from_config(&config).await.unwrap();

        let err = stack
            .remove_peer(&PeerId::new("nobody.example.com", "example.com"), true)
            .await
            .unwrap_err();
        assert!(matches!(err, DiameterError::UnknownPeer(_)));

        let id = PeerId::new("mme.example.com", "example.com");
        stack.remove_peer(&id, true).await.unwrap();
        assert!(stack.peer(&id).is_none());
        assert_eq!(stack.peers().len(), 1);
    }

    #[tokio::test]
    async fn test_route_without_open_peers_fails() {
        let config: StackConfig = load_from_yaml(YAML).unwrap();
        let stack = DiameterStack::from_config(&config).await.unwrap();

        let message = DiameterMessage::request(316, 16777251, stack.ids())
            .origin_host("dra.example.com")
            .origin_realm("example.com")
            .destination_realm("example.com")
            .build();
        let err = stack.send(message).await.unwrap_err();
        assert!(matches!(err, DiameterError::NoRouteAvailable { .. }));
        assert_eq!(stack.metrics().routing_failures.get(), 1);
    }
}

use crate::codec::{DiameterCodec, Frame};
use crate::dispatch::Dispatcher;
use crate::transaction::{AnswerSender, Expired, PendingTransactions};
use dashmap::DashMap;
use diastack_core::{BoxTransport, ConnectionId, Connector, DiameterError, Result, TransportKind};
use diastack_message::*;
use diastack_metrics::StackMetrics;
use diastack_peer_core::{
    FsmAction, FsmEvent, LocalIdentity, PeerConfig, PeerFsm, PeerMode, PeerState, StepOutcome,
    TimerKind,
};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tokio_util::codec::Framed;
use tokio_util::time::{delay_queue::Key, DelayQueue};
use tracing::{debug, info, warn};

/// A transport wrapped in the Diameter stream codec
pub type PeerFramed = Framed<BoxTransport, DiameterCodec>;

const COMMAND_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Peer identity; Diameter identities compare case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    host: String,
    realm: String,
}

impl PeerId {
    pub fn new(host: &str, realm: &str) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            realm: realm.to_ascii_lowercase(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.host)
    }
}

/// Everything needed to run one peer
#[derive(Debug, Clone)]
pub struct PeerSettings {
    pub config: PeerConfig,
    pub address: Option<SocketAddr>,
    pub transport: TransportKind,
}

impl PeerSettings {
    pub fn id(&self) -> PeerId {
        PeerId::new(&self.config.host, &self.config.realm)
    }
}

/// State shared by all peers of one stack
pub struct PeerContext {
    pub local: Arc<LocalIdentity>,
    pub ids: Arc<IdGenerator>,
    pub connector: Arc<dyn Connector>,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: StackMetrics,
    /// Which peer owns each live transport
    pub connections: DashMap<ConnectionId, PeerId>,
    pub max_message_len: usize,
    pub transaction_timeout: Duration,
    pub drain_timeout: Duration,
    next_connection: AtomicU64,
}

impl PeerContext {
    pub fn new(local: LocalIdentity, connector: Arc<dyn Connector>, metrics: StackMetrics) -> Self {
        Self {
            local: Arc::new(local),
            ids: Arc::new(IdGenerator::new()),
            connector,
            dispatcher: Arc::new(Dispatcher::new()),
            metrics,
            connections: DashMap::new(),
            max_message_len: 65535,
            transaction_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            next_connection: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    pub fn framed(&self, transport: BoxTransport) -> PeerFramed {
        Framed::new(transport, DiameterCodec::new(self.max_message_len))
    }

    pub fn peer_for_connection(&self, connection: ConnectionId) -> Option<PeerId> {
        self.connections.get(&connection).map(|entry| entry.value().clone())
    }
}

enum PeerCommand {
    Connect,
    Attach {
        connection: ConnectionId,
        framed: PeerFramed,
        first: DiameterMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    Send {
        message: DiameterMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    Request {
        message: DiameterMessage,
        timeout: Option<Duration>,
        reply: AnswerSender,
    },
    Disconnect {
        cause: u32,
    },
    Remove {
        force: bool,
        done: oneshot::Sender<()>,
    },
}

#[derive(Default)]
struct PeerShared {
    routable: AtomicBool,
    removing: AtomicBool,
    pending: AtomicUsize,
    /// 0 while no transport is bound
    connection: AtomicU64,
}

/// Cheap, cloneable front end of a running peer
#[derive(Clone)]
pub struct PeerHandle {
    id: PeerId,
    mode: PeerMode,
    commands: mpsc::Sender<PeerCommand>,
    state: watch::Receiver<PeerState>,
    shared: Arc<PeerShared>,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("routable", &self.is_routable())
            .finish()
    }
}

impl PeerHandle {
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn mode(&self) -> PeerMode {
        self.mode
    }

    pub fn state(&self) -> PeerState {
        *self.state.borrow()
    }

    /// Open and not being removed
    pub fn is_routable(&self) -> bool {
        self.shared.routable.load(Ordering::Acquire)
    }

    pub fn is_removing(&self) -> bool {
        self.shared.removing.load(Ordering::Acquire)
    }

    /// Outstanding requests in either direction
    pub fn pending_transactions(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self.shared.connection.load(Ordering::Acquire) {
            0 => None,
            id => Some(ConnectionId(id)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.state.clone()
    }

    fn closed(&self) -> DiameterError {
        DiameterError::PeerClosed(self.id.to_string())
    }

    async fn command(&self, command: PeerCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| self.closed())
    }

    /// Start the peer: dial out if active, wait for an inbound transport if passive
    pub async fn connect(&self) -> Result<()> {
        self.command(PeerCommand::Connect).await
    }

    /// Hand an accepted transport to this peer. `first` is the CER read from it.
    pub async fn attach(
        &self,
        connection: ConnectionId,
        framed: PeerFramed,
        first: DiameterMessage,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(PeerCommand::Attach {
            connection,
            framed,
            first,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Write a message without waiting for an answer. Fails at once unless
    /// the peer is Open; answers may still go out while Closing.
    pub async fn send(&self, message: DiameterMessage) -> Result<()> {
        let state = self.state();
        if !may_send(state, &message, self.is_removing()) {
            return Err(DiameterError::PeerNotOpen {
                peer: self.id.to_string(),
                state: state.to_string(),
            });
        }

        let (reply, rx) = oneshot::channel();
        self.command(PeerCommand::Send { message, reply }).await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Send a request and wait for its answer
    pub async fn request(&self, message: DiameterMessage) -> Result<DiameterMessage> {
        self.request_inner(message, None).await
    }

    pub async fn request_with_timeout(
        &self,
        message: DiameterMessage,
        timeout: Duration,
    ) -> Result<DiameterMessage> {
        self.request_inner(message, Some(timeout)).await
    }

    async fn request_inner(
        &self,
        message: DiameterMessage,
        timeout: Option<Duration>,
    ) -> Result<DiameterMessage> {
        if !message.is_request() {
            return Err(DiameterError::malformed("request() needs a message with the R bit"));
        }
        let state = self.state();
        if !may_send(state, &message, self.is_removing()) {
            return Err(DiameterError::PeerNotOpen {
                peer: self.id.to_string(),
                state: state.to_string(),
            });
        }

        let (reply, rx) = oneshot::channel();
        self.command(PeerCommand::Request {
            message,
            timeout,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Orderly DPR/DPA disconnect; the peer is not redialled
    pub async fn disconnect(&self, cause: u32) -> Result<()> {
        self.command(PeerCommand::Disconnect { cause }).await
    }

    /// Take the peer out of service and stop its task.
    ///
    /// Without `force` outstanding transactions get up to the drain timeout
    /// to finish and the connection is closed with DPR; with `force` it is
    /// dropped at once.
    pub async fn remove(&self, force: bool) -> Result<()> {
        let (done, rx) = oneshot::channel();
        if self.command(PeerCommand::Remove { force, done }).await.is_err() {
            // already gone
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }

    pub async fn wait_for_state(&self, target: PeerState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| self.closed())
    }
}

fn may_send(state: PeerState, message: &DiameterMessage, removing: bool) -> bool {
    match state {
        PeerState::Open => !(removing && message.is_request()),
        PeerState::Closing => message.is_answer(),
        PeerState::Closed | PeerState::Connecting | PeerState::AwaitingCapabilityExchange => false,
    }
}

/// Spawn the task driving one peer and return its handle
pub fn spawn_peer(settings: PeerSettings, ctx: Arc<PeerContext>) -> PeerHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (state_tx, state_rx) = watch::channel(PeerState::Closed);
    let shared = Arc::new(PeerShared::default());

    let handle = PeerHandle {
        id: settings.id(),
        mode: settings.config.mode,
        commands: tx.clone(),
        state: state_rx,
        shared: shared.clone(),
    };

    let actor = PeerActor {
        id: settings.id(),
        mode: settings.config.mode,
        address: settings.address,
        transport: settings.transport,
        fsm: PeerFsm::new(settings.config, ctx.local.clone(), ctx.ids.clone()),
        ctx,
        commands: rx,
        myself: tx.downgrade(),
        state_tx,
        shared,
        framed: None,
        connection: None,
        connecting: None,
        timers: DelayQueue::new(),
        timer_keys: HashMap::new(),
        transactions: PendingTransactions::new(),
        removal: None,
        drain_deadline: None,
    };
    tokio::spawn(actor.run());

    handle
}

struct Removal {
    waiters: Vec<oneshot::Sender<()>>,
    tearing_down: bool,
}

enum Input {
    Command(Option<PeerCommand>),
    Frame(Option<Result<Frame>>),
    Connected(Result<BoxTransport>),
    Timer(TimerKind),
    TransactionExpired(Expired),
    DrainExpired,
}

/// The task owning one peer: its state machine, transport, timers and
/// transactions. Every event for the peer is handled here, in order.
struct PeerActor {
    id: PeerId,
    mode: PeerMode,
    address: Option<SocketAddr>,
    transport: TransportKind,
    fsm: PeerFsm,
    ctx: Arc<PeerContext>,
    commands: mpsc::Receiver<PeerCommand>,
    myself: mpsc::WeakSender<PeerCommand>,
    state_tx: watch::Sender<PeerState>,
    shared: Arc<PeerShared>,
    framed: Option<PeerFramed>,
    connection: Option<ConnectionId>,
    connecting: Option<BoxFuture<'static, Result<BoxTransport>>>,
    timers: DelayQueue<TimerKind>,
    timer_keys: HashMap<TimerKind, Key>,
    transactions: PendingTransactions,
    removal: Option<Removal>,
    drain_deadline: Option<Pin<Box<Sleep>>>,
}

async fn next_frame(framed: &mut Option<PeerFramed>) -> Option<Result<Frame>> {
    match framed.as_mut() {
        Some(framed) => framed.next().await,
        None => std::future::pending().await,
    }
}

async fn connect_done(
    connecting: &mut Option<BoxFuture<'static, Result<BoxTransport>>>,
) -> Result<BoxTransport> {
    match connecting.as_mut() {
        Some(fut) => {
            let result = fut.await;
            *connecting = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn drain_done(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

impl PeerActor {
    async fn run(mut self) {
        debug!(peer = %self.id, mode = ?self.mode, "Peer task started");

        loop {
            let input = tokio::select! {
                command = self.commands.recv() => Input::Command(command),
                frame = next_frame(&mut self.framed) => Input::Frame(frame),
                result = connect_done(&mut self.connecting) => Input::Connected(result),
                Some(expired) = self.timers.next() => Input::Timer(expired.into_inner()),
                Some(expired) = self.transactions.next_expired() => Input::TransactionExpired(expired),
                _ = drain_done(&mut self.drain_deadline) => Input::DrainExpired,
            };

            if !self.handle_input(input).await {
                break;
            }
            if !self.advance_removal().await {
                break;
            }
        }

        if let Some(connection) = self.connection.take() {
            self.ctx.connections.remove(&connection);
        }
        info!(peer = %self.id, "Peer task stopped");
    }

    /// Returns false when the task should stop
    async fn handle_input(&mut self, input: Input) -> bool {
        match input {
            Input::Command(Some(command)) => self.handle_command(command).await,
            Input::Command(None) => {
                // every handle is gone
                self.process(FsmEvent::Stop).await;
                return false;
            }
            Input::Frame(Some(Ok(Frame::Message(message)))) => {
                self.ctx.metrics.messages_received.inc();
                debug!(
                    peer = %self.id,
                    command = message.command_code(),
                    request = message.is_request(),
                    hop_by_hop = message.hop_by_hop_id(),
                    "Message received"
                );
                self.process(FsmEvent::MessageReceived(message)).await;
            }
            Input::Frame(Some(Ok(Frame::Malformed(e)))) => {
                self.ctx.metrics.framing_errors.inc();
                warn!(peer = %self.id, error = %e, "Malformed message");
                self.process(FsmEvent::MalformedReceived(e.to_string())).await;
            }
            Input::Frame(Some(Err(e))) if e.is_malformed() => {
                // the stream cannot be resynchronised after this
                self.ctx.metrics.framing_errors.inc();
                warn!(peer = %self.id, error = %e, "Framing lost, dropping transport");
                self.process(FsmEvent::MalformedReceived(e.to_string())).await;
                self.process(FsmEvent::ConnectionClosed).await;
            }
            Input::Frame(Some(Err(e))) => {
                info!(peer = %self.id, error = %e, "Transport failed");
                self.process(FsmEvent::ConnectionClosed).await;
            }
            Input::Frame(None) => {
                info!(peer = %self.id, "Transport closed by remote");
                self.process(FsmEvent::ConnectionClosed).await;
            }
            Input::Connected(Ok(transport)) => {
                if self.fsm.current_state() == PeerState::Connecting {
                    let connection = self.ctx.next_connection_id();
                    let framed = self.ctx.framed(transport);
                    self.bind(connection, framed);
                    self.process(FsmEvent::ConnectionUp).await;
                }
            }
            Input::Connected(Err(e)) => {
                warn!(peer = %self.id, error = %e, "Connect failed");
                self.process(FsmEvent::ConnectionFailed(e.to_string())).await;
            }
            Input::Timer(kind) => {
                self.timer_keys.remove(&kind);
                self.process(FsmEvent::TimerExpired(kind)).await;
            }
            Input::TransactionExpired(Expired::Outbound {
                hop_by_hop,
                timeout,
                waiter,
            }) => {
                self.ctx.metrics.transaction_timeouts.inc();
                warn!(peer = %self.id, hop_by_hop, "Request timed out");
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Err(DiameterError::TransactionTimeout(
                        timeout.as_millis() as u64,
                    )));
                }
                self.sync_pending();
            }
            Input::TransactionExpired(Expired::Inbound { hop_by_hop, timeout }) => {
                self.ctx.metrics.transaction_timeouts.inc();
                warn!(
                    peer = %self.id,
                    hop_by_hop,
                    ?timeout,
                    "Inbound request never answered, forgetting it"
                );
                self.sync_pending();
            }
            Input::DrainExpired => {
                self.drain_deadline = None;
                warn!(
                    peer = %self.id,
                    pending = self.transactions.len(),
                    "Drain timed out, closing anyway"
                );
                self.teardown(true).await;
            }
        }
        true
    }

    async fn handle_command(&mut self, command: PeerCommand) {
        match command {
            PeerCommand::Connect => {
                if self.removal.is_none() {
                    self.process(FsmEvent::Start).await;
                }
            }
            PeerCommand::Attach {
                connection,
                framed,
                first,
                reply,
            } => {
                let state = self.fsm.current_state();
                if self.removal.is_some() || state != PeerState::Closed {
                    warn!(peer = %self.id, state = %state, "Refusing second transport");
                    let _ = reply.send(Err(DiameterError::CapabilityExchangeFailure {
                        peer: self.id.to_string(),
                        reason: format!("peer already {state}"),
                    }));
                    return;
                }

                self.bind(connection, framed);
                let _ = reply.send(Ok(()));
                self.process(FsmEvent::InboundAccepted).await;
                self.ctx.metrics.messages_received.inc();
                self.process(FsmEvent::MessageReceived(first)).await;
            }
            PeerCommand::Send { message, reply } => {
                let result = self.send_message(message).await;
                let _ = reply.send(result);
            }
            PeerCommand::Request {
                message,
                timeout,
                reply,
            } => self.send_request(message, timeout, reply).await,
            PeerCommand::Disconnect { cause } => {
                self.process(FsmEvent::DisconnectRequest(cause)).await;
            }
            PeerCommand::Remove { force, done } => self.begin_removal(force, done).await,
        }
    }

    fn not_open(&self) -> DiameterError {
        DiameterError::PeerNotOpen {
            peer: self.id.to_string(),
            state: self.fsm.current_state().to_string(),
        }
    }

    /// Oversized messages are refused before they touch the connection
    fn check_size(&self, message: &DiameterMessage) -> Result<()> {
        if message.len() > self.ctx.max_message_len {
            return Err(DiameterError::malformed(format!(
                "message length {} above limit {}",
                message.len(),
                self.ctx.max_message_len
            )));
        }
        Ok(())
    }

    async fn send_message(&mut self, message: DiameterMessage) -> Result<()> {
        if !may_send(self.fsm.current_state(), &message, self.removal.is_some()) {
            return Err(self.not_open());
        }
        self.check_size(&message)?;

        let hop_by_hop = message.hop_by_hop_id();
        if message.is_request() {
            self.transactions
                .track_outbound(hop_by_hop, None, self.ctx.transaction_timeout);
        } else {
            self.transactions.answer_inbound(hop_by_hop);
        }
        self.sync_pending();

        let result = self.write(message).await;
        if result.is_err() {
            self.process(FsmEvent::ConnectionClosed).await;
        }
        result
    }

    async fn send_request(
        &mut self,
        message: DiameterMessage,
        timeout: Option<Duration>,
        reply: AnswerSender,
    ) {
        if !may_send(self.fsm.current_state(), &message, self.removal.is_some()) {
            let _ = reply.send(Err(self.not_open()));
            return;
        }
        if let Err(e) = self.check_size(&message) {
            let _ = reply.send(Err(e));
            return;
        }

        let timeout = timeout.unwrap_or(self.ctx.transaction_timeout);
        self.transactions
            .track_outbound(message.hop_by_hop_id(), Some(reply), timeout);
        self.sync_pending();

        // a failed write fails the waiter through the connection teardown
        if self.write(message).await.is_err() {
            self.process(FsmEvent::ConnectionClosed).await;
        }
    }

    async fn write(&mut self, message: DiameterMessage) -> Result<()> {
        let Some(framed) = self.framed.as_mut() else {
            return Err(self.not_open());
        };

        let command = message.command_code();
        let hop_by_hop = message.hop_by_hop_id();
        match framed.send(message).await {
            Ok(()) => {
                self.ctx.metrics.messages_sent.inc();
                debug!(peer = %self.id, command, hop_by_hop, "Message sent");
                Ok(())
            }
            Err(e) => {
                warn!(peer = %self.id, command, error = %e, "Write failed");
                Err(e)
            }
        }
    }

    // ========================================
    // State machine plumbing
    // ========================================

    /// Feed an event and carry out the resulting actions. Actions that
    /// produce further events (a failed write) queue them behind.
    async fn process(&mut self, event: FsmEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let step = self.fsm.step(event);
            for action in step.actions {
                self.execute(action, &mut queue).await;
            }

            match step.outcome {
                StepOutcome::Transitioned { from, to } => {
                    info!(peer = %self.id, from = %from, to = %to, "Peer state changed");
                    self.state_tx.send_replace(to);
                }
                StepOutcome::Stayed => {}
                StepOutcome::Ignored => {
                    debug!(peer = %self.id, state = %self.fsm.current_state(), "Event ignored");
                }
            }
        }
    }

    async fn execute(&mut self, action: FsmAction, queue: &mut VecDeque<FsmEvent>) {
        match action {
            FsmAction::Connect => match self.address {
                Some(addr) => {
                    let connector = self.ctx.connector.clone();
                    let kind = self.transport;
                    debug!(peer = %self.id, %addr, transport = %kind, "Connecting");
                    self.connecting =
                        Some(Box::pin(async move { connector.connect(kind, addr).await }));
                }
                None => queue.push_back(FsmEvent::ConnectionFailed(
                    "no address configured".to_string(),
                )),
            },
            FsmAction::Disconnect => self.drop_connection().await,
            FsmAction::Send(message) => {
                if self.write(message).await.is_err() {
                    queue.push_back(FsmEvent::ConnectionClosed);
                }
            }
            FsmAction::ArmTimer(kind, after) => {
                if let Some(key) = self.timer_keys.remove(&kind) {
                    self.timers.remove(&key);
                }
                let key = self.timers.insert(kind, after);
                self.timer_keys.insert(kind, key);
            }
            FsmAction::CancelTimer(kind) => {
                if let Some(key) = self.timer_keys.remove(&kind) {
                    self.timers.remove(&key);
                }
            }
            FsmAction::RegisterRoute => {
                self.shared
                    .routable
                    .store(self.removal.is_none(), Ordering::Release);
                self.ctx.metrics.open_peers.inc();
            }
            FsmAction::DeregisterRoute => {
                self.shared.routable.store(false, Ordering::Release);
                self.ctx.metrics.open_peers.dec();
            }
            FsmAction::Deliver(message) => self.deliver(message, queue).await,
            FsmAction::HandshakeFailed(reason) => {
                self.ctx.metrics.handshake_failures.inc();
                warn!(peer = %self.id, %reason, "Capabilities exchange failed");
            }
            FsmAction::Log(line) => info!(peer = %self.id, "{line}"),
        }
    }

    fn bind(&mut self, connection: ConnectionId, framed: PeerFramed) {
        self.framed = Some(framed);
        self.connection = Some(connection);
        self.ctx.connections.insert(connection, self.id.clone());
        self.shared.connection.store(connection.0, Ordering::Release);
    }

    async fn drop_connection(&mut self) {
        self.connecting = None;
        if let Some(mut framed) = self.framed.take() {
            // flush whatever is queued (a DPA, a CEA with an error) before closing
            let _ = tokio::time::timeout(CLOSE_GRACE, framed.close()).await;
        }
        if let Some(connection) = self.connection.take() {
            self.ctx.connections.remove(&connection);
        }
        self.shared.connection.store(0, Ordering::Release);

        let failed = self.transactions.fail_all(&self.id.to_string());
        if failed > 0 {
            warn!(peer = %self.id, failed, "Dropped pending transactions");
        }
        self.sync_pending();
    }

    fn handle(&self) -> Option<PeerHandle> {
        Some(PeerHandle {
            id: self.id.clone(),
            mode: self.mode,
            commands: self.myself.upgrade()?,
            state: self.state_tx.subscribe(),
            shared: self.shared.clone(),
        })
    }

    fn dispatch(&self, message: DiameterMessage) -> Option<DiameterMessage> {
        match self.handle() {
            Some(handle) => self.ctx.dispatcher.dispatch(&handle, message),
            None => Some(message),
        }
    }

    async fn deliver(&mut self, message: DiameterMessage, queue: &mut VecDeque<FsmEvent>) {
        let hop_by_hop = message.hop_by_hop_id();

        if message.is_answer() {
            match self.transactions.complete(hop_by_hop) {
                Some(done) => {
                    self.ctx
                        .metrics
                        .transaction_seconds
                        .observe(done.elapsed.as_secs_f64());
                    match done.waiter {
                        Some(waiter) => {
                            let _ = waiter.send(Ok(message));
                        }
                        None => {
                            if let Some(unhandled) = self.dispatch(message) {
                                debug!(
                                    peer = %self.id,
                                    command = unhandled.command_code(),
                                    "No handler for answer, dropped"
                                );
                            }
                        }
                    }
                }
                None => warn!(peer = %self.id, hop_by_hop, "Unmatched answer dropped"),
            }
            self.sync_pending();
            return;
        }

        self.transactions
            .track_inbound(hop_by_hop, self.ctx.transaction_timeout);
        self.sync_pending();

        if let Some(unhandled) = self.dispatch(message) {
            debug!(
                peer = %self.id,
                command = unhandled.command_code(),
                "No handler for request, answering COMMAND_UNSUPPORTED"
            );
            let answer = unhandled
                .create_answer_from(
                    RESULT_CODE_COMMAND_UNSUPPORTED,
                    &self.ctx.local.host,
                    &self.ctx.local.realm,
                )
                .build();
            self.transactions.answer_inbound(hop_by_hop);
            self.sync_pending();
            if self.write(answer).await.is_err() {
                queue.push_back(FsmEvent::ConnectionClosed);
            }
        }
    }

    fn sync_pending(&self) {
        self.shared
            .pending
            .store(self.transactions.len(), Ordering::Release);
    }

    // ========================================
    // Removal
    // ========================================

    async fn begin_removal(&mut self, force: bool, done: oneshot::Sender<()>) {
        self.shared.removing.store(true, Ordering::Release);
        self.shared.routable.store(false, Ordering::Release);

        match self.removal.as_mut() {
            Some(removal) => removal.waiters.push(done),
            None => {
                self.removal = Some(Removal {
                    waiters: vec![done],
                    tearing_down: false,
                })
            }
        }

        if force {
            info!(peer = %self.id, "Removing peer now");
            self.teardown(true).await;
        } else if !self.transactions.is_empty() && self.drain_deadline.is_none() {
            info!(
                peer = %self.id,
                pending = self.transactions.len(),
                "Draining before removal"
            );
            self.drain_deadline = Some(Box::pin(tokio::time::sleep(self.ctx.drain_timeout)));
        }
    }

    async fn teardown(&mut self, force: bool) {
        let Some(removal) = self.removal.as_mut() else {
            return;
        };
        if removal.tearing_down && !force {
            return;
        }
        removal.tearing_down = true;
        self.drain_deadline = None;

        let event = if !force && self.fsm.current_state() == PeerState::Open {
            FsmEvent::DisconnectRequest(DISCONNECT_CAUSE_DO_NOT_WANT_TO_TALK_TO_YOU)
        } else {
            FsmEvent::Stop
        };
        self.process(event).await;
    }

    /// Returns false once a removed peer has fully closed
    async fn advance_removal(&mut self) -> bool {
        let Some(removal) = self.removal.as_ref() else {
            return true;
        };

        if !removal.tearing_down && self.transactions.is_empty() {
            self.teardown(false).await;
        }

        let finished = self.removal.as_ref().is_some_and(|r| r.tearing_down)
            && self.fsm.current_state() == PeerState::Closed;
        if finished {
            if let Some(removal) = self.removal.take() {
                for waiter in removal.waiters {
                    let _ = waiter.send(());
                }
            }
            return false;
        }
        true
    }
}

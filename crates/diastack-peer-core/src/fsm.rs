use crate::capabilities;
use crate::types::*;
use diastack_message::*;
use std::sync::Arc;
use std::time::Duration;

/// Per-peer connection state machine.
///
/// Sans-IO: every event yields a list of actions for the runtime to carry
/// out. Every (state, event) pair is handled explicitly.
#[derive(Debug)]
pub struct PeerFsm {
    state: PeerState,
    config: PeerConfig,
    local: Arc<LocalIdentity>,
    ids: Arc<IdGenerator>,
    watchdog_failures: u32,
    backoff: Duration,
    /// Set by a local disconnect or Stop; suppresses reconnects until Start
    stopped: bool,
    /// Disconnect-Cause the remote sent with its DPR
    remote_cause: Option<u32>,
}

impl PeerFsm {
    pub fn new(config: PeerConfig, local: Arc<LocalIdentity>, ids: Arc<IdGenerator>) -> Self {
        let backoff = config.timers.reconnect_base;
        Self {
            state: PeerState::Closed,
            config,
            local,
            ids,
            watchdog_failures: 0,
            backoff,
            stopped: false,
            remote_cause: None,
        }
    }

    pub fn current_state(&self) -> PeerState {
        self.state
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.config.mode == PeerMode::Active
    }

    pub fn watchdog_failures(&self) -> u32 {
        self.watchdog_failures
    }

    /// Delay the next reconnect would use
    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }

    // ★ Core Logic: transition function
    pub fn step(&mut self, event: FsmEvent) -> Step {
        let from = self.state;
        let mut actions = Vec::new();

        let handled = match event {
            FsmEvent::Start => self.on_start(&mut actions),
            FsmEvent::ConnectionUp => self.on_connection_up(&mut actions),
            FsmEvent::ConnectionFailed(reason) => self.on_connection_failed(reason, &mut actions),
            FsmEvent::InboundAccepted => self.on_inbound(&mut actions),
            FsmEvent::MessageReceived(msg) => self.on_message(msg, &mut actions),
            FsmEvent::MalformedReceived(reason) => self.on_malformed(reason, &mut actions),
            FsmEvent::TimerExpired(kind) => self.on_timer(kind, &mut actions),
            FsmEvent::DisconnectRequest(cause) => self.on_disconnect_request(cause, &mut actions),
            FsmEvent::ConnectionClosed => self.on_connection_closed(&mut actions),
            FsmEvent::Stop => self.on_stop(&mut actions),
        };

        let outcome = if self.state != from {
            StepOutcome::Transitioned {
                from,
                to: self.state,
            }
        } else if handled {
            StepOutcome::Stayed
        } else {
            StepOutcome::Ignored
        };

        Step { outcome, actions }
    }

    // ========================================
    // State changes
    // ========================================

    /// Move to `to`, cancelling whatever the old state armed and arming
    /// what the new one needs
    fn enter(&mut self, to: PeerState, reason: &str, actions: &mut Vec<FsmAction>) {
        let from = self.state;
        if from == to {
            return;
        }

        match from {
            PeerState::Closed => actions.push(FsmAction::CancelTimer(TimerKind::Reconnect)),
            PeerState::Connecting | PeerState::AwaitingCapabilityExchange => {
                if !matches!(to, PeerState::Connecting | PeerState::AwaitingCapabilityExchange) {
                    actions.push(FsmAction::CancelTimer(TimerKind::CapabilityExchange));
                }
            }
            PeerState::Open => {
                actions.push(FsmAction::CancelTimer(TimerKind::Watchdog));
                actions.push(FsmAction::DeregisterRoute);
            }
            PeerState::Closing => actions.push(FsmAction::CancelTimer(TimerKind::Disconnect)),
        }

        self.state = to;
        actions.push(FsmAction::Log(format!("{from} -> {to}: {reason}")));

        match to {
            PeerState::Open => {
                self.watchdog_failures = 0;
                self.backoff = self.config.timers.reconnect_base;
                actions.push(FsmAction::RegisterRoute);
                self.arm_watchdog(actions);
            }
            PeerState::Closing => actions.push(FsmAction::ArmTimer(
                TimerKind::Disconnect,
                self.config.timers.disconnect_timeout,
            )),
            PeerState::Closed | PeerState::Connecting | PeerState::AwaitingCapabilityExchange => {}
        }
    }

    fn arm_watchdog(&self, actions: &mut Vec<FsmAction>) {
        actions.push(FsmAction::ArmTimer(
            TimerKind::Watchdog,
            self.config.timers.watchdog_interval,
        ));
    }

    fn arm_handshake(&self, actions: &mut Vec<FsmAction>) {
        actions.push(FsmAction::ArmTimer(
            TimerKind::CapabilityExchange,
            self.config.timers.handshake_timeout,
        ));
    }

    fn may_reconnect(&self) -> bool {
        self.is_active()
            && self.config.retry
            && !self.stopped
            && self.remote_cause != Some(DISCONNECT_CAUSE_DO_NOT_WANT_TO_TALK_TO_YOU)
    }

    /// Drop the transport and go to Closed, scheduling a reconnect if allowed
    fn close(&mut self, reason: &str, actions: &mut Vec<FsmAction>) {
        actions.push(FsmAction::Disconnect);
        self.enter(PeerState::Closed, reason, actions);

        if self.may_reconnect() {
            actions.push(FsmAction::ArmTimer(TimerKind::Reconnect, self.backoff));
            actions.push(FsmAction::Log(format!("Reconnecting in {:?}", self.backoff)));
            self.backoff = (self.backoff * 2).min(self.config.timers.reconnect_max);
        }
    }

    fn handshake_failed(&mut self, reason: String, actions: &mut Vec<FsmAction>) {
        actions.push(FsmAction::HandshakeFailed(reason.clone()));
        self.close(&reason, actions);
    }

    fn connect(&mut self, actions: &mut Vec<FsmAction>) {
        self.enter(PeerState::Connecting, "connecting", actions);
        actions.push(FsmAction::Connect);
        self.arm_handshake(actions);
    }

    // ========================================
    // Events
    // ========================================

    fn on_start(&mut self, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Closed => {
                self.stopped = false;
                self.remote_cause = None;
                match self.config.mode {
                    PeerMode::Active => self.connect(actions),
                    PeerMode::Passive => {
                        actions.push(FsmAction::Log("Passive peer waits for an inbound connection".into()));
                    }
                }
                true
            }
            // at most one exchange in flight; duplicates are dropped
            PeerState::Connecting
            | PeerState::AwaitingCapabilityExchange
            | PeerState::Open
            | PeerState::Closing => false,
        }
    }

    fn on_connection_up(&mut self, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Connecting => {
                self.enter(PeerState::AwaitingCapabilityExchange, "transport up, CER sent", actions);
                actions.push(FsmAction::Send(capabilities::cer(&self.local, &self.ids)));
                true
            }
            PeerState::Closed
            | PeerState::AwaitingCapabilityExchange
            | PeerState::Open
            | PeerState::Closing => false,
        }
    }

    fn on_connection_failed(&mut self, reason: String, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Connecting => {
                self.close(&format!("connect failed: {reason}"), actions);
                true
            }
            PeerState::Closed
            | PeerState::AwaitingCapabilityExchange
            | PeerState::Open
            | PeerState::Closing => false,
        }
    }

    fn on_inbound(&mut self, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Closed => {
                self.stopped = false;
                self.remote_cause = None;
                self.enter(
                    PeerState::AwaitingCapabilityExchange,
                    "inbound connection, waiting for CER",
                    actions,
                );
                self.arm_handshake(actions);
                true
            }
            // an exchange is already under way on another transport
            PeerState::Connecting
            | PeerState::AwaitingCapabilityExchange
            | PeerState::Open
            | PeerState::Closing => false,
        }
    }

    fn on_message(&mut self, msg: DiameterMessage, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Closed | PeerState::Connecting => false,
            PeerState::AwaitingCapabilityExchange => self.on_handshake_message(msg, actions),
            PeerState::Open => {
                self.on_open_message(msg, actions);
                true
            }
            PeerState::Closing => self.on_closing_message(msg, actions),
        }
    }

    /// Returns false for a message that is dropped without a state change
    fn on_handshake_message(&mut self, msg: DiameterMessage, actions: &mut Vec<FsmAction>) -> bool {
        match (self.config.mode, msg.is_cea(), msg.is_cer()) {
            (PeerMode::Active, true, _) => self.on_cea(msg, actions),
            // our CER is already out; a second exchange would race it
            (PeerMode::Active, _, true) => return false,
            (PeerMode::Passive, _, true) => self.on_cer(msg, actions),
            (PeerMode::Passive, true, _) => {
                self.handshake_failed("CEA without a CER sent".to_string(), actions)
            }
            _ => self.handshake_failed(
                format!("Command {} before capabilities exchange", msg.command_code()),
                actions,
            ),
        }
        true
    }

    fn on_cea(&mut self, msg: DiameterMessage, actions: &mut Vec<FsmAction>) {
        match msg.result_code() {
            Some(code) if is_success(code) => {
                if let Err(reason) = self.check_origin(&msg) {
                    self.handshake_failed(reason, actions);
                    return;
                }
                let remote = capabilities::advertised_applications(&msg);
                if !capabilities::has_common_application(&self.local, &remote) {
                    self.handshake_failed(format!("No common application with {remote:?}"), actions);
                    return;
                }
                self.enter(PeerState::Open, "CEA received", actions);
            }
            Some(code) => self.handshake_failed(format!("CEA with Result-Code {code}"), actions),
            None => self.handshake_failed("CEA without Result-Code".to_string(), actions),
        }
    }

    fn on_cer(&mut self, msg: DiameterMessage, actions: &mut Vec<FsmAction>) {
        if let Err(reason) = self.check_origin(&msg) {
            actions.push(FsmAction::Send(capabilities::cea(
                &msg,
                RESULT_CODE_UNKNOWN_PEER,
                &self.local,
            )));
            self.handshake_failed(reason, actions);
            return;
        }

        let remote = capabilities::advertised_applications(&msg);
        if !capabilities::has_common_application(&self.local, &remote) {
            actions.push(FsmAction::Send(capabilities::cea(
                &msg,
                RESULT_CODE_NO_COMMON_APPLICATION,
                &self.local,
            )));
            self.handshake_failed(format!("No common application with {remote:?}"), actions);
            return;
        }

        actions.push(FsmAction::Send(capabilities::cea(
            &msg,
            RESULT_CODE_SUCCESS,
            &self.local,
        )));
        self.enter(PeerState::Open, "CER answered", actions);
    }

    fn check_origin(&self, msg: &DiameterMessage) -> Result<(), String> {
        match msg.origin_host() {
            Ok(host) if host.eq_ignore_ascii_case(&self.config.host) => Ok(()),
            Ok(host) => Err(format!("Origin-Host {host} is not {}", self.config.host)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn on_open_message(&mut self, msg: DiameterMessage, actions: &mut Vec<FsmAction>) {
        // any traffic proves the peer alive
        self.watchdog_failures = 0;
        self.arm_watchdog(actions);

        if msg.is_dwr() {
            actions.push(FsmAction::Send(capabilities::dwa(&msg, &self.local)));
        } else if msg.is_dwa() {
            actions.push(FsmAction::Log("DWA received".into()));
        } else if msg.is_dpr() {
            let cause = msg.unsigned32(AVP_DISCONNECT_CAUSE);
            self.remote_cause = cause;
            actions.push(FsmAction::Send(capabilities::dpa(&msg, &self.local)));
            self.enter(
                PeerState::Closing,
                &format!("DPR received (cause {cause:?})"),
                actions,
            );
        } else if msg.is_cer() || msg.is_cea() || msg.is_dpa() {
            actions.push(FsmAction::Log(format!(
                "Unexpected {} in Open, dropped",
                if msg.is_request() { "request" } else { "answer" }
            )));
        } else {
            actions.push(FsmAction::Deliver(msg));
        }
    }

    fn on_closing_message(&mut self, msg: DiameterMessage, actions: &mut Vec<FsmAction>) -> bool {
        if msg.is_dpa() {
            self.close("DPA received", actions);
            true
        } else if msg.is_dpr() {
            actions.push(FsmAction::Send(capabilities::dpa(&msg, &self.local)));
            true
        } else if msg.is_answer() && !msg.is_base_protocol() {
            // late answers still complete their transactions
            actions.push(FsmAction::Deliver(msg));
            true
        } else {
            false
        }
    }

    fn on_malformed(&mut self, reason: String, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::AwaitingCapabilityExchange => {
                self.handshake_failed(format!("Malformed message during handshake: {reason}"), actions);
                true
            }
            PeerState::Open | PeerState::Closing => {
                actions.push(FsmAction::Log(format!("Dropped malformed message: {reason}")));
                true
            }
            PeerState::Closed | PeerState::Connecting => false,
        }
    }

    fn on_timer(&mut self, kind: TimerKind, actions: &mut Vec<FsmAction>) -> bool {
        match (kind, self.state) {
            (TimerKind::CapabilityExchange, PeerState::Connecting)
            | (TimerKind::CapabilityExchange, PeerState::AwaitingCapabilityExchange) => {
                self.handshake_failed("Capabilities exchange timed out".to_string(), actions);
                true
            }
            (TimerKind::Watchdog, PeerState::Open) => {
                if self.watchdog_failures >= self.config.timers.max_watchdog_failures {
                    self.close("Watchdog failed too many times", actions);
                } else {
                    self.watchdog_failures += 1;
                    actions.push(FsmAction::Send(capabilities::dwr(&self.local, &self.ids)));
                    self.arm_watchdog(actions);
                }
                true
            }
            (TimerKind::Reconnect, PeerState::Closed) if self.may_reconnect() => {
                self.connect(actions);
                true
            }
            (TimerKind::Disconnect, PeerState::Closing) => {
                self.close("Disconnect timed out", actions);
                true
            }
            // stale expiries from a state already left
            (TimerKind::CapabilityExchange, _)
            | (TimerKind::Watchdog, _)
            | (TimerKind::Reconnect, _)
            | (TimerKind::Disconnect, _) => false,
        }
    }

    fn on_disconnect_request(&mut self, cause: u32, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Open => {
                self.stopped = true;
                actions.push(FsmAction::Send(capabilities::dpr(&self.local, cause, &self.ids)));
                self.enter(PeerState::Closing, "DPR sent", actions);
                true
            }
            PeerState::Connecting | PeerState::AwaitingCapabilityExchange => {
                self.stopped = true;
                self.close("Disconnected before Open", actions);
                true
            }
            PeerState::Closed => {
                self.stopped = true;
                actions.push(FsmAction::CancelTimer(TimerKind::Reconnect));
                true
            }
            PeerState::Closing => false,
        }
    }

    fn on_connection_closed(&mut self, actions: &mut Vec<FsmAction>) -> bool {
        match self.state {
            PeerState::Connecting => {
                self.close("Transport closed while connecting", actions);
                true
            }
            PeerState::AwaitingCapabilityExchange => {
                self.handshake_failed("Transport closed during handshake".to_string(), actions);
                true
            }
            PeerState::Open => {
                self.close("Transport failed", actions);
                true
            }
            PeerState::Closing => {
                self.close("Transport closed", actions);
                true
            }
            PeerState::Closed => false,
        }
    }

    fn on_stop(&mut self, actions: &mut Vec<FsmAction>) -> bool {
        self.stopped = true;
        match self.state {
            PeerState::Closed => {
                actions.push(FsmAction::CancelTimer(TimerKind::Reconnect));
                true
            }
            PeerState::Connecting
            | PeerState::AwaitingCapabilityExchange
            | PeerState::Open
            | PeerState::Closing => {
                self.close("Stopped", actions);
                true
            }
        }
    }
}

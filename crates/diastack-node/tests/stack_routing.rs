use async_trait::async_trait;
use diastack_core::{BoxTransport, Connector, DiameterError, TransportKind};
use diastack_dict::Dictionary;
use diastack_message::*;
use diastack_metrics::StackMetrics;
use diastack_node::DiameterStack;
use diastack_peer_core::{capabilities, LocalIdentity, PeerConfig, PeerMode, PeerState, PeerTimers};
use diastack_peer_runtime::{DiameterCodec, Frame, PeerContext, PeerHandle, PeerId, PeerSettings};
use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

type Remote = Framed<DuplexStream, DiameterCodec>;

/// Hands the far end of every dialled pipe to the test, tagged with the
/// address that was dialled
struct PipeConnector {
    dials: mpsc::UnboundedSender<(SocketAddr, DuplexStream)>,
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self, _kind: TransportKind, addr: SocketAddr) -> diastack_core::Result<BoxTransport> {
        let (near, far) = tokio::io::duplex(64 * 1024);
        self.dials
            .send((addr, far))
            .map_err(|_| DiameterError::UnsupportedTransport("pipe".to_string()))?;
        Ok(Box::new(near))
    }
}

const ADDR_A: &str = "192.0.2.1:3868";
const ADDR_B: &str = "192.0.2.2:3868";

fn identity(host: &str) -> LocalIdentity {
    LocalIdentity {
        host: host.to_string(),
        realm: "example.com".to_string(),
        host_ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        vendor_id: 0,
        product_name: "diastack".to_string(),
        origin_state_id: 1,
        auth_application_ids: vec![16777251],
        acct_application_ids: vec![],
    }
}

fn settings(host: &str, mode: PeerMode, address: Option<&str>) -> PeerSettings {
    PeerSettings {
        config: PeerConfig {
            host: host.to_string(),
            realm: "example.com".to_string(),
            mode,
            retry: true,
            timers: PeerTimers::default(),
        },
        address: address.map(|a| a.parse().unwrap()),
        transport: TransportKind::Tcp,
    }
}

fn stack() -> (DiameterStack, mpsc::UnboundedReceiver<(SocketAddr, DuplexStream)>) {
    let (dials, rx) = mpsc::unbounded_channel();
    let ctx = PeerContext::new(
        identity("dra.example.com"),
        Arc::new(PipeConnector { dials }),
        StackMetrics::new().unwrap(),
    );
    let stack = DiameterStack::new(ctx, Dictionary::base().unwrap())
        .with_handshake_timeout(Duration::from_secs(2));
    (stack, rx)
}

async fn next_message(remote: &mut Remote) -> DiameterMessage {
    match remote.next().await {
        Some(Ok(Frame::Message(msg))) => msg,
        other => panic!("expected a message, got {other:?}"),
    }
}

/// Answer the CER arriving on a dialled pipe as `host`
async fn answer_cer(far: DuplexStream, host: &str) -> Remote {
    let mut remote = Framed::new(far, DiameterCodec::default());
    let cer = next_message(&mut remote).await;
    assert!(cer.is_cer());
    remote
        .send(capabilities::cea(&cer, RESULT_CODE_SUCCESS, &identity(host)))
        .await
        .unwrap();
    remote
}

/// Two open peers in example.com, a.example.com added first
async fn two_open_peers() -> (DiameterStack, PeerHandle, Remote, PeerHandle, Remote) {
    let (stack, mut dials) = stack();
    let a = stack
        .add_peer(settings("a.example.com", PeerMode::Active, Some(ADDR_A)))
        .await
        .unwrap();
    let b = stack
        .add_peer(settings("b.example.com", PeerMode::Active, Some(ADDR_B)))
        .await
        .unwrap();
    stack.start().await.unwrap();

    let mut remote_a = None;
    let mut remote_b = None;
    for _ in 0..2 {
        let (addr, far) = dials.recv().await.unwrap();
        if addr == ADDR_A.parse::<SocketAddr>().unwrap() {
            remote_a = Some(answer_cer(far, "a.example.com").await);
        } else {
            remote_b = Some(answer_cer(far, "b.example.com").await);
        }
    }
    a.wait_for_state(PeerState::Open).await.unwrap();
    b.wait_for_state(PeerState::Open).await.unwrap();

    (stack, a, remote_a.unwrap(), b, remote_b.unwrap())
}

fn request(stack: &DiameterStack, host: Option<&str>) -> DiameterMessage {
    let mut builder = DiameterMessage::request(316, 16777251, stack.ids())
        .session_id("dra.example.com;1;1")
        .origin_host("dra.example.com")
        .origin_realm("example.com")
        .destination_realm("example.com");
    if let Some(host) = host {
        builder = builder.destination_host(host);
    }
    builder.build()
}

#[tokio::test]
async fn test_destination_host_wins_over_first_added_peer() {
    let (stack, a, mut remote_a, b, mut remote_b) = two_open_peers().await;
    assert!(a.is_routable() && b.is_routable());

    let routed = stack.route(&request(&stack, Some("b.example.com"))).unwrap();
    assert_eq!(routed.id(), b.id());

    stack.send(request(&stack, Some("b.example.com"))).await.unwrap();
    let seen = next_message(&mut remote_b).await;
    assert_eq!(seen.destination_host(), Some("b.example.com"));

    // realm only: first added
    stack.send(request(&stack, None)).await.unwrap();
    let seen = next_message(&mut remote_a).await;
    assert_eq!(seen.destination_host(), None);
    assert_eq!(stack.route(&request(&stack, None)).unwrap().id(), a.id());
}

#[tokio::test]
async fn test_request_through_stack_gets_answer() {
    let (stack, _a, mut remote_a, _b, _remote_b) = two_open_peers().await;

    let answering = tokio::spawn(async move {
        let seen = next_message(&mut remote_a).await;
        let answer = seen
            .create_answer(RESULT_CODE_SUCCESS)
            .origin_host("a.example.com")
            .origin_realm("example.com")
            .build();
        remote_a.send(answer).await.unwrap();
        remote_a
    });

    let answer = stack.request(request(&stack, None)).await.unwrap();
    assert_eq!(answer.result_code(), Some(RESULT_CODE_SUCCESS));
    assert_eq!(answer.origin_host().unwrap(), "a.example.com");
    answering.await.unwrap();
}

#[tokio::test]
async fn test_removed_peer_is_not_routed() {
    let (stack, a, _remote_a, b, _remote_b) = two_open_peers().await;

    stack.remove_peer(a.id(), true).await.unwrap();
    assert_eq!(a.state(), PeerState::Closed);
    assert!(stack.peer(a.id()).is_none());

    let routed = stack.route(&request(&stack, None)).unwrap();
    assert_eq!(routed.id(), b.id());
    assert_eq!(stack.peers().len(), 1);
}

#[tokio::test]
async fn test_add_peer_is_idempotent_and_dials_when_running() {
    let (stack, mut dials) = stack();
    stack.start().await.unwrap();

    let first = stack
        .add_peer(settings("a.example.com", PeerMode::Active, Some(ADDR_A)))
        .await
        .unwrap();
    let (addr, far) = dials.recv().await.unwrap();
    assert_eq!(addr, ADDR_A.parse::<SocketAddr>().unwrap());
    let _remote = answer_cer(far, "a.example.com").await;
    first.wait_for_state(PeerState::Open).await.unwrap();

    // same identity, different case and address
    let again = stack
        .add_peer(settings("A.Example.Com", PeerMode::Active, Some(ADDR_B)))
        .await
        .unwrap();
    assert_eq!(again.id(), first.id());
    assert_eq!(again.connection_id(), first.connection_id());
    assert_eq!(stack.peers().len(), 1);
    assert!(dials.try_recv().is_err());
}

#[tokio::test]
async fn test_passive_peer_is_dormant_until_it_calls_in() {
    let (stack, mut dials) = stack();
    let mme = stack
        .add_peer(settings("mme.example.com", PeerMode::Passive, None))
        .await
        .unwrap();
    stack.start().await.unwrap();
    assert!(dials.try_recv().is_err());
    assert_eq!(mme.state(), PeerState::Closed);

    let (near, far) = tokio::io::duplex(64 * 1024);
    let mut remote = Framed::new(far, DiameterCodec::default());
    remote
        .send(capabilities::cer(&identity("mme.example.com"), &IdGenerator::new()))
        .await
        .unwrap();
    stack.accept(Box::new(near)).await.unwrap();

    let cea = next_message(&mut remote).await;
    assert!(cea.is_cea());
    assert_eq!(cea.result_code(), Some(RESULT_CODE_SUCCESS));
    mme.wait_for_state(PeerState::Open).await.unwrap();

    let connection = mme.connection_id().unwrap();
    assert_eq!(stack.peer_for_connection(connection).unwrap().id(), mme.id());
}

#[tokio::test]
async fn test_unknown_peer_gets_cea_3010() {
    let (stack, _dials) = stack();
    let (near, far) = tokio::io::duplex(64 * 1024);
    let mut remote = Framed::new(far, DiameterCodec::default());
    remote
        .send(capabilities::cer(&identity("stranger.example.com"), &IdGenerator::new()))
        .await
        .unwrap();

    let err = stack.accept(Box::new(near)).await.unwrap_err();
    assert!(matches!(err, DiameterError::UnknownPeer(host) if host == "stranger.example.com"));

    let cea = next_message(&mut remote).await;
    assert!(cea.is_cea());
    assert_eq!(cea.result_code(), Some(RESULT_CODE_UNKNOWN_PEER));
    assert!(remote.next().await.is_none());
    assert_eq!(stack.metrics().handshake_failures.get(), 1);
}

#[tokio::test]
async fn test_inbound_connection_must_start_with_cer() {
    let (stack, _dials) = stack();
    stack
        .add_peer(settings("mme.example.com", PeerMode::Passive, None))
        .await
        .unwrap();

    let (near, far) = tokio::io::duplex(64 * 1024);
    let mut remote = Framed::new(far, DiameterCodec::default());
    remote
        .send(capabilities::dwr(&identity("mme.example.com"), &IdGenerator::new()))
        .await
        .unwrap();

    let err = stack.accept(Box::new(near)).await.unwrap_err();
    assert!(matches!(err, DiameterError::CapabilityExchangeFailure { .. }));
    // dropped without an answer
    assert!(remote.next().await.is_none());
    let id = PeerId::new("mme.example.com", "example.com");
    assert_eq!(stack.peer(&id).unwrap().state(), PeerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_silent_inbound_connection_times_out() {
    let (stack, _dials) = stack();
    let (near, _far) = tokio::io::duplex(1024);

    let err = stack.accept(Box::new(near)).await.unwrap_err();
    assert!(matches!(err, DiameterError::CapabilityExchangeFailure { .. }));
}

#[tokio::test]
async fn test_shutdown_closes_every_peer() {
    let (stack, a, mut remote_a, b, mut remote_b) = two_open_peers().await;

    let shutdown = tokio::spawn(async move {
        stack.shutdown().await;
        stack
    });

    // each remote sees a DPR and answers it
    for (remote, host) in [(&mut remote_a, "a.example.com"), (&mut remote_b, "b.example.com")] {
        let dpr = next_message(remote).await;
        assert!(dpr.is_dpr());
        remote
            .send(capabilities::dpa(&dpr, &identity(host)))
            .await
            .unwrap();
    }

    let stack = shutdown.await.unwrap();
    assert!(!stack.is_running());
    assert!(stack.peers().is_empty());
    assert_eq!(a.state(), PeerState::Closed);
    assert_eq!(b.state(), PeerState::Closed);
}

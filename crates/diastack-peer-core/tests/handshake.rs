use diastack_message::{DiameterMessage, IdGenerator, APP_RELAY};
use diastack_peer_core::*;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn identity(host: &str, apps: Vec<u32>) -> Arc<LocalIdentity> {
    Arc::new(LocalIdentity {
        host: host.to_string(),
        realm: "example.com".to_string(),
        host_ip_addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        vendor_id: 0,
        product_name: "diastack".to_string(),
        origin_state_id: 1,
        auth_application_ids: apps,
        acct_application_ids: vec![],
    })
}

fn peer(remote_host: &str, mode: PeerMode, local: Arc<LocalIdentity>) -> PeerFsm {
    PeerFsm::new(
        PeerConfig {
            host: remote_host.to_string(),
            realm: "example.com".to_string(),
            mode,
            retry: true,
            timers: PeerTimers::default(),
        },
        local,
        Arc::new(IdGenerator::new()),
    )
}

fn outbound(step: Step) -> Vec<DiameterMessage> {
    step.actions
        .into_iter()
        .filter_map(|a| match a {
            FsmAction::Send(msg) => Some(msg),
            _ => None,
        })
        .collect()
}

/// Feed messages back and forth over an imaginary wire until both sides are quiet
fn exchange(a: &mut PeerFsm, b: &mut PeerFsm, mut to_b: Vec<DiameterMessage>) -> usize {
    let mut exchanged = 0;
    let mut to_a = Vec::new();
    while !to_a.is_empty() || !to_b.is_empty() {
        for msg in std::mem::take(&mut to_b) {
            // every frame goes through the codec
            let msg = DiameterMessage::decode(&msg.encode()).unwrap();
            exchanged += 1;
            to_a.extend(outbound(b.step(FsmEvent::MessageReceived(msg))));
        }
        for msg in std::mem::take(&mut to_a) {
            let msg = DiameterMessage::decode(&msg.encode()).unwrap();
            exchanged += 1;
            to_b.extend(outbound(a.step(FsmEvent::MessageReceived(msg))));
        }
    }
    exchanged
}

#[test]
fn test_active_and_passive_reach_open() {
    let mut client = peer("server.example.com", PeerMode::Active, identity("client.example.com", vec![16777251]));
    let mut server = peer("client.example.com", PeerMode::Passive, identity("server.example.com", vec![APP_RELAY]));

    client.step(FsmEvent::Start);
    server.step(FsmEvent::InboundAccepted);
    let cer = outbound(client.step(FsmEvent::ConnectionUp));

    assert_eq!(exchange(&mut client, &mut server, cer), 2);
    assert_eq!(client.current_state(), PeerState::Open);
    assert_eq!(server.current_state(), PeerState::Open);
}

#[test]
fn test_second_exchange_attempt_is_a_no_op() {
    let mut client = peer("server.example.com", PeerMode::Active, identity("client.example.com", vec![4]));
    let mut server = peer("client.example.com", PeerMode::Passive, identity("server.example.com", vec![4]));

    client.step(FsmEvent::Start);
    server.step(FsmEvent::InboundAccepted);
    let cer = outbound(client.step(FsmEvent::ConnectionUp));
    assert_eq!(cer.len(), 1);

    // retrying while the first CER is still unanswered
    let again = client.step(FsmEvent::Start);
    assert_eq!(again.outcome, StepOutcome::Ignored);
    assert!(outbound(again).is_empty());
    assert_eq!(client.current_state(), PeerState::AwaitingCapabilityExchange);

    // a second inbound transport is refused the same way
    assert_eq!(server.step(FsmEvent::InboundAccepted).outcome, StepOutcome::Ignored);

    assert_eq!(exchange(&mut client, &mut server, cer), 2);
    assert_eq!(client.current_state(), PeerState::Open);
}

#[test]
fn test_orderly_disconnect_between_peers() {
    let mut client = peer("server.example.com", PeerMode::Active, identity("client.example.com", vec![4]));
    let mut server = peer("client.example.com", PeerMode::Passive, identity("server.example.com", vec![4]));

    client.step(FsmEvent::Start);
    server.step(FsmEvent::InboundAccepted);
    let cer = outbound(client.step(FsmEvent::ConnectionUp));
    exchange(&mut client, &mut server, cer);

    let dpr = outbound(client.step(FsmEvent::DisconnectRequest(0)));
    exchange(&mut client, &mut server, dpr);

    assert_eq!(client.current_state(), PeerState::Closed);
    assert_eq!(server.current_state(), PeerState::Closing);

    server.step(FsmEvent::ConnectionClosed);
    assert_eq!(server.current_state(), PeerState::Closed);
}

use crate::table::PeerEntry;
use diastack_core::{DiameterError, Result};
use diastack_message::DiameterMessage;
use diastack_peer_runtime::{PeerHandle, PeerId};

/// Anything the routing engine can pick
pub trait RouteCandidate {
    fn peer_id(&self) -> &PeerId;
    /// Open and accepting new requests
    fn is_routable(&self) -> bool;
}

impl RouteCandidate for PeerHandle {
    fn peer_id(&self) -> &PeerId {
        self.id()
    }

    fn is_routable(&self) -> bool {
        PeerHandle::is_routable(self)
    }
}

impl RouteCandidate for PeerEntry {
    fn peer_id(&self) -> &PeerId {
        self.handle.id()
    }

    fn is_routable(&self) -> bool {
        self.handle.is_routable()
    }
}

/// Which rule selected the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMatch {
    DestinationHost,
    DestinationRealm,
}

#[derive(Debug)]
pub struct RoutingDecision<'a, C> {
    pub peer: &'a C,
    pub matched: RouteMatch,
}

/// Picks the peer for an outbound message.
///
/// 1. A routable peer whose host equals Destination-Host.
/// 2. Otherwise the first routable peer, in candidate order, whose realm
///    equals Destination-Realm.
///
/// Candidates must come in insertion order; that order is the tie-break.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoutingEngine;

impl RoutingEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn route<'a, C, I>(&self, candidates: I, message: &DiameterMessage) -> Result<RoutingDecision<'a, C>>
    where
        C: RouteCandidate + 'a,
        I: IntoIterator<Item = &'a C>,
    {
        let candidates: Vec<&'a C> = candidates
            .into_iter()
            .filter(|c| c.is_routable())
            .collect();
        let host = message.destination_host();
        let realm = message.destination_realm();

        if let Some(host) = host {
            if let Some(peer) = candidates
                .iter()
                .copied()
                .find(|c| c.peer_id().host().eq_ignore_ascii_case(host))
            {
                return Ok(RoutingDecision {
                    peer,
                    matched: RouteMatch::DestinationHost,
                });
            }
        }

        if let Some(realm) = realm {
            if let Some(peer) = candidates
                .iter()
                .copied()
                .find(|c| c.peer_id().realm().eq_ignore_ascii_case(realm))
            {
                return Ok(RoutingDecision {
                    peer,
                    matched: RouteMatch::DestinationRealm,
                });
            }
        }

        Err(DiameterError::NoRouteAvailable {
            realm: realm.map(str::to_string),
            host: host.map(str::to_string),
        })
    }
}

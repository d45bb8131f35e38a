use diastack_core::{DiameterError, Result};
use diastack_message::DiameterMessage;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::time::{delay_queue::Key, DelayQueue};

/// Receives the answer of a request made with `PeerHandle::request`
pub type AnswerSender = oneshot::Sender<Result<DiameterMessage>>;

struct Outbound {
    key: Key,
    started: Instant,
    timeout: Duration,
    waiter: Option<AnswerSender>,
}

/// A finished outbound transaction
pub struct Completed {
    pub elapsed: Duration,
    /// None for requests sent without waiting for the answer
    pub waiter: Option<AnswerSender>,
}

/// A transaction that ran out of time
pub enum Expired {
    /// A request we sent got no answer
    Outbound {
        hop_by_hop: u32,
        timeout: Duration,
        waiter: Option<AnswerSender>,
    },
    /// A request from the peer was never answered locally
    Inbound { hop_by_hop: u32, timeout: Duration },
}

#[derive(Debug, Clone, Copy)]
enum Tracked {
    Outbound(u32),
    Inbound(u32),
}

/// Request/answer correlation for one peer connection.
///
/// Both directions are keyed by hop-by-hop id and expire after their
/// timeout, so a request nobody answers cannot hold a drain open.
#[derive(Default)]
pub struct PendingTransactions {
    outbound: HashMap<u32, Outbound>,
    inbound: HashMap<u32, (Key, Duration)>,
    expiries: DelayQueue<Tracked>,
}

impl PendingTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_outbound(&mut self, hop_by_hop: u32, waiter: Option<AnswerSender>, timeout: Duration) {
        let key = self.expiries.insert(Tracked::Outbound(hop_by_hop), timeout);
        let previous = self.outbound.insert(
            hop_by_hop,
            Outbound {
                key,
                started: Instant::now(),
                timeout,
                waiter,
            },
        );
        if let Some(previous) = previous {
            self.expiries.remove(&previous.key);
        }
    }

    /// Match an answer to its request
    pub fn complete(&mut self, hop_by_hop: u32) -> Option<Completed> {
        let entry = self.outbound.remove(&hop_by_hop)?;
        self.expiries.remove(&entry.key);
        Some(Completed {
            elapsed: entry.started.elapsed(),
            waiter: entry.waiter,
        })
    }

    /// Wait for the next transaction to time out. Resolves to None
    /// straight away when nothing is outstanding.
    pub async fn next_expired(&mut self) -> Option<Expired> {
        match self.expiries.next().await?.into_inner() {
            Tracked::Outbound(hop_by_hop) => {
                let entry = self.outbound.remove(&hop_by_hop)?;
                Some(Expired::Outbound {
                    hop_by_hop,
                    timeout: entry.timeout,
                    waiter: entry.waiter,
                })
            }
            Tracked::Inbound(hop_by_hop) => {
                let (_, timeout) = self.inbound.remove(&hop_by_hop)?;
                Some(Expired::Inbound { hop_by_hop, timeout })
            }
        }
    }

    pub fn track_inbound(&mut self, hop_by_hop: u32, timeout: Duration) {
        let key = self.expiries.insert(Tracked::Inbound(hop_by_hop), timeout);
        if let Some((previous, _)) = self.inbound.insert(hop_by_hop, (key, timeout)) {
            self.expiries.remove(&previous);
        }
    }

    /// Returns false if no such request was waiting for an answer
    pub fn answer_inbound(&mut self, hop_by_hop: u32) -> bool {
        match self.inbound.remove(&hop_by_hop) {
            Some((key, _)) => {
                self.expiries.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Drop every transaction; waiters get `PeerClosed`
    pub fn fail_all(&mut self, peer: &str) -> usize {
        let count = self.outbound.len() + self.inbound.len();
        for (_, entry) in self.outbound.drain() {
            if let Some(waiter) = entry.waiter {
                let _ = waiter.send(Err(DiameterError::PeerClosed(peer.to_string())));
            }
        }
        self.expiries.clear();
        self.inbound.clear();
        count
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn len(&self) -> usize {
        self.outbound.len() + self.inbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_complete_before_timeout() {
        let mut pending = PendingTransactions::new();
        let (tx, _rx) = oneshot::channel();
        pending.track_outbound(7, Some(tx), Duration::from_secs(5));
        assert_eq!(pending.len(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        let done = pending.complete(7).unwrap();
        assert!(done.waiter.is_some());
        assert_eq!(done.elapsed, Duration::from_millis(250));
        assert!(pending.is_empty());

        // nothing left to expire
        assert!(pending.next_expired().await.is_none());
        assert!(pending.complete(7).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let mut pending = PendingTransactions::new();
        pending.track_outbound(1, None, Duration::from_secs(2));
        pending.track_outbound(2, None, Duration::from_secs(1));

        match pending.next_expired().await.unwrap() {
            Expired::Outbound { hop_by_hop, timeout, .. } => {
                assert_eq!(hop_by_hop, 2);
                assert_eq!(timeout, Duration::from_secs(1));
            }
            Expired::Inbound { .. } => panic!("expected the outbound request to expire"),
        }
        assert_eq!(pending.outbound_len(), 1);
    }

    #[tokio::test]
    async fn test_fail_all_notifies_waiters() {
        let mut pending = PendingTransactions::new();
        let (tx, rx) = oneshot::channel();
        pending.track_outbound(9, Some(tx), Duration::from_secs(5));
        pending.track_inbound(10, Duration::from_secs(5));

        assert_eq!(pending.fail_all("hss.example.com"), 2);
        assert!(pending.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(DiameterError::PeerClosed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_tracking() {
        let mut pending = PendingTransactions::new();
        pending.track_inbound(3, Duration::from_secs(5));
        assert_eq!(pending.inbound_len(), 1);
        assert!(pending.answer_inbound(3));
        assert!(!pending.answer_inbound(3));

        // answered requests leave no timer behind
        assert!(pending.next_expired().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_inbound_request_expires() {
        let mut pending = PendingTransactions::new();
        pending.track_inbound(4, Duration::from_secs(10));
        pending.track_outbound(4, None, Duration::from_secs(20));

        let started = Instant::now();
        match pending.next_expired().await.unwrap() {
            Expired::Inbound { hop_by_hop, timeout } => {
                assert_eq!(hop_by_hop, 4);
                assert_eq!(timeout, Duration::from_secs(10));
            }
            Expired::Outbound { .. } => panic!("expected the inbound request to expire"),
        }
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(pending.inbound_len(), 0);
        assert_eq!(pending.outbound_len(), 1);

        // a late answer finds nothing to match
        assert!(!pending.answer_inbound(4));
    }
}

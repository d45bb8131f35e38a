use crate::actor::PeerHandle;
use async_trait::async_trait;
use diastack_message::DiameterMessage;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Application code reacting to inbound messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, peer: PeerHandle, message: DiameterMessage);
}

/// Adapts an async closure into a [`MessageHandler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(PeerHandle, DiameterMessage) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, peer: PeerHandle, message: DiameterMessage) {
        (self.0)(peer, message).await
    }
}

pub type Predicate = Arc<dyn Fn(&DiameterMessage) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

struct Route {
    id: RouteId,
    predicate: Predicate,
    handler: Arc<dyn MessageHandler>,
}

/// Predicate/handler pairs shared by every peer of a stack.
///
/// Routes are tried in registration order; the first match gets the
/// message on its own task.
#[derive(Default)]
pub struct Dispatcher {
    routes: RwLock<Vec<Arc<Route>>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P>(&self, predicate: P, handler: Arc<dyn MessageHandler>) -> RouteId
    where
        P: Fn(&DiameterMessage) -> bool + Send + Sync + 'static,
    {
        let id = RouteId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes.write().push(Arc::new(Route {
            id,
            predicate: Arc::new(predicate),
            handler,
        }));
        id
    }

    /// Register an async closure
    pub fn on<P, F, Fut>(&self, predicate: P, handler: F) -> RouteId
    where
        P: Fn(&DiameterMessage) -> bool + Send + Sync + 'static,
        F: Fn(PeerHandle, DiameterMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(predicate, Arc::new(FnHandler(handler)))
    }

    pub fn unregister(&self, id: RouteId) -> bool {
        let mut routes = self.routes.write();
        let before = routes.len();
        routes.retain(|r| r.id != id);
        routes.len() != before
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find(&self, message: &DiameterMessage) -> Option<Arc<Route>> {
        self.routes
            .read()
            .iter()
            .find(|r| (r.predicate)(message))
            .cloned()
    }

    /// Hand `message` to the first matching handler. Gives the message
    /// back when nothing matched.
    pub fn dispatch(&self, peer: &PeerHandle, message: DiameterMessage) -> Option<DiameterMessage> {
        let Some(route) = self.find(&message) else {
            return Some(message);
        };

        debug!(
            peer = %peer.id(),
            command = message.command_code(),
            route = route.id.0,
            "Dispatching message"
        );
        let peer = peer.clone();
        tokio::spawn(async move {
            route.handler.handle(peer, message).await;
        });
        None
    }
}

//! Topic-keyed publish/subscribe registry.
//!
//! Registrations are serialized by a mutex; a publish snapshots the
//! handlers registered at that instant (removing one-shots atomically with
//! the snapshot) and runs handler bodies with the lock released, so a
//! handler may freely subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::context::Context;

/// Boxed async event handler.
pub(crate) type Handler = Arc<dyn Fn(Context) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifies one subscription for removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    id: u64,
}

impl SubscriptionHandle {
    /// Topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

struct Subscription {
    id: u64,
    once: bool,
    handler: Handler,
}

/// Thread-safe topic registry with persistent and one-shot subscriptions.
pub struct Emitter {
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Emitter {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe a persistent handler; it fires on every publish until
    /// removed.
    pub fn on<F, Fut>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(topic, false, wrap(handler))
    }

    /// Subscribe a one-shot handler; it fires exactly once, even under
    /// concurrent publishes to the same topic.
    pub fn once<F, Fut>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.insert(topic, true, wrap(handler))
    }

    fn insert(&self, topic: &str, once: bool, handler: Handler) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut topics = self.topics.lock();
        topics.entry(topic.to_owned()).or_default().push(Subscription { id, once, handler });
        SubscriptionHandle {
            topic: topic.to_owned(),
            id,
        }
    }

    /// Remove one subscription. No-op when it already fired or was removed.
    pub fn off(&self, handle: &SubscriptionHandle) {
        let mut topics = self.topics.lock();
        if let Some(subs) = topics.get_mut(&handle.topic) {
            subs.retain(|s| s.id != handle.id);
            if subs.is_empty() {
                let _ = topics.remove(&handle.topic);
            }
        }
    }

    /// Remove every subscription on `topic`.
    pub fn off_topic(&self, topic: &str) {
        let _ = self.topics.lock().remove(topic);
    }

    /// Whether any subscription is registered for `topic`.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.lock().contains_key(topic)
    }

    /// Fire `topic` with `ctx`, invoking the handlers registered at this
    /// instant in registration order. Returns the number of handlers
    /// invoked. Handlers added during the fire do not receive it.
    pub async fn publish(&self, topic: &str, ctx: Context) -> usize {
        let snapshot: Vec<Handler> = {
            let mut topics = self.topics.lock();
            let Some(subs) = topics.get_mut(topic) else {
                return 0;
            };
            let fired: Vec<Handler> = subs.iter().map(|s| Arc::clone(&s.handler)).collect();
            subs.retain(|s| !s.once);
            if subs.is_empty() {
                let _ = topics.remove(topic);
            }
            fired
        };
        let count = snapshot.len();
        for handler in snapshot {
            handler(ctx.clone()).await;
        }
        count
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap<F, Fut>(handler: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| -> BoxFuture<'static, ()> { Box::pin(handler(ctx)) })
}

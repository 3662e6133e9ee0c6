//! # courier-sessions
//!
//! Reference plugin: a per-connection key/value store with TTL expiry,
//! exposed over the `sessions|set`, `sessions|get`, `sessions|ttl`, and
//! `sessions|clean` topics. One storage instance exists per connection
//! id, created lazily through a caller-supplied factory and evicted when
//! the connection disconnects.
//!
//! Replies use the generic status envelope from [`envelope`]; plugin and
//! application errors travel inside it as ordinary payload data, never as
//! protocol-level faults.

#![deny(unsafe_code)]

pub mod envelope;
pub mod storage;

pub use storage::{MemoryStorage, Storage, StorageError};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use courier_core::{Context, Hub, Plugin, lifecycle};

/// Plugin name and topic namespace.
pub const PLUGIN_NAME: &str = "sessions";

/// Factory producing one storage instance per connection.
pub type StorageFactory = Box<dyn Fn() -> Arc<dyn Storage> + Send + Sync>;

/// Per-connection session stores behind the `sessions|*` topics.
///
/// Application code reaches the active store for a handler's connection
/// through the companion accessor:
///
/// ```ignore
/// let sessions: Arc<Sessions> = hub.plugin(courier_sessions::PLUGIN_NAME).unwrap();
/// let store = sessions.store_for(&ctx);
/// ```
pub struct Sessions {
    factory: StorageFactory,
    stores: Mutex<HashMap<String, Arc<dyn Storage>>>,
}

impl Sessions {
    /// Sessions backed by [`MemoryStorage`].
    pub fn new() -> Self {
        Self::with_factory(Box::new(|| Arc::new(MemoryStorage::new())))
    }

    /// Sessions with a custom backend factory.
    pub fn with_factory(factory: StorageFactory) -> Self {
        Self {
            factory,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// The store for `connection_id`, created on first access.
    pub fn store(&self, connection_id: &str) -> Arc<dyn Storage> {
        Arc::clone(
            self.stores
                .lock()
                .entry(connection_id.to_owned())
                .or_insert_with(|| (self.factory)()),
        )
    }

    /// The store backing `ctx`'s connection.
    pub fn store_for(&self, ctx: &Context) -> Arc<dyn Storage> {
        self.store(ctx.connection_id())
    }

    /// Number of connections with a live store.
    pub fn connection_count(&self) -> usize {
        self.stores.lock().len()
    }

    fn evict(&self, connection_id: &str) {
        let removed = self.stores.lock().remove(connection_id);
        if let Some(store) = removed {
            store.remove_all();
            debug!(conn_id = connection_id, "session store evicted");
        }
    }

    async fn on_set(&self, ctx: Context) {
        let reply = match envelope::parse_set(ctx.data()) {
            Ok(req) => match self.store_for(&ctx).set(&req.key, &req.value, req.ttl) {
                Ok(()) => envelope::ok_body(&[]),
                Err(err) => envelope::error_body(&err.to_string()),
            },
            Err(err) => envelope::error_body(&err.to_string()),
        };
        self.reply(&ctx, reply).await;
    }

    async fn on_get(&self, ctx: Context) {
        let reply = match envelope::parse_get(ctx.data()) {
            Ok(key) => match self.store_for(&ctx).get(&key) {
                Ok(value) => envelope::ok_body(&value),
                Err(err) => envelope::error_body(&err.to_string()),
            },
            Err(err) => envelope::error_body(&err.to_string()),
        };
        self.reply(&ctx, reply).await;
    }

    async fn on_ttl(&self, ctx: Context) {
        let reply = match envelope::parse_ttl(ctx.data()) {
            Ok(req) => match self.store_for(&ctx).ttl(&req.key, req.ttl) {
                Ok(()) => envelope::ok_body(&[]),
                Err(err) => envelope::error_body(&err.to_string()),
            },
            Err(err) => envelope::error_body(&err.to_string()),
        };
        self.reply(&ctx, reply).await;
    }

    async fn on_clean(&self, ctx: Context) {
        self.store_for(&ctx).remove_all();
        self.reply(&ctx, envelope::ok_body(&[])).await;
    }

    async fn reply(&self, ctx: &Context, body: bytes::Bytes) {
        if let Err(err) = ctx.write(body).await {
            debug!(conn_id = ctx.connection_id(), error = %err, "session reply failed");
        }
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for Sessions {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn install(self: Arc<Self>, hub: &Hub) {
        let me = Arc::clone(&self);
        let _ = hub.on(&format!("{PLUGIN_NAME}|set"), move |ctx| {
            let me = Arc::clone(&me);
            async move { me.on_set(ctx).await }
        });

        let me = Arc::clone(&self);
        let _ = hub.on(&format!("{PLUGIN_NAME}|get"), move |ctx| {
            let me = Arc::clone(&me);
            async move { me.on_get(ctx).await }
        });

        let me = Arc::clone(&self);
        let _ = hub.on(&format!("{PLUGIN_NAME}|ttl"), move |ctx| {
            let me = Arc::clone(&me);
            async move { me.on_ttl(ctx).await }
        });

        let me = Arc::clone(&self);
        let _ = hub.on(&format!("{PLUGIN_NAME}|clean"), move |ctx| {
            let me = Arc::clone(&me);
            async move { me.on_clean(ctx).await }
        });

        let me = Arc::clone(&self);
        let _ = hub.on(lifecycle::DISCONNECT, move |ctx| {
            let me = Arc::clone(&me);
            async move { me.evict(ctx.connection_id()) }
        });
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

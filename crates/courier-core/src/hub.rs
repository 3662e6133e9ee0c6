//! The hub: one instance owning the subscription table, the plugin
//! registry, and the configuration — constructed once at startup and
//! passed by reference, never ambient.

use std::sync::Arc;

use crate::config::HubConfig;
use crate::connection::{self, Accept};
use crate::context::Context;
use crate::emitter::{Emitter, SubscriptionHandle};
use crate::plugin::{Plugin, PluginRegistry};
use crate::socket::{FrameSink, FrameStream};

/// Entry point for hosts: subscriptions, plugins, and connection driving.
pub struct Hub {
    emitter: Arc<Emitter>,
    plugins: PluginRegistry,
    config: HubConfig,
}

impl Hub {
    /// A hub with default configuration.
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// A hub with explicit configuration.
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            emitter: Arc::new(Emitter::new()),
            plugins: PluginRegistry::default(),
            config,
        }
    }

    /// The hub's configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Subscribe a persistent handler on `topic`.
    pub fn on<F, Fut>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.emitter.on(topic, handler)
    }

    /// Subscribe a one-shot handler on `topic`.
    pub fn once<F, Fut>(&self, topic: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.emitter.once(topic, handler)
    }

    /// Remove one subscription.
    pub fn off(&self, handle: &SubscriptionHandle) {
        self.emitter.off(handle);
    }

    /// Remove every subscription on `topic`.
    pub fn off_topic(&self, topic: &str) {
        self.emitter.off_topic(topic);
    }

    /// Install a plugin: runs its `install` hook and records it under its
    /// name, overwriting any prior registration with the same name.
    pub fn use_plugin<P: Plugin>(&self, plugin: P) -> Arc<P> {
        let plugin = Arc::new(plugin);
        Arc::clone(&plugin).install(self);
        self.plugins.insert(plugin.clone());
        plugin
    }

    /// Retrieve an installed plugin by name, downcast to its concrete
    /// type. `None` when no plugin of that name and type is installed.
    pub fn plugin<P: Plugin>(&self, name: &str) -> Option<Arc<P>> {
        self.plugins.get(name)?.as_any().downcast::<P>().ok()
    }

    /// Installed plugin names, sorted.
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.names()
    }

    /// Drive one accepted socket until it closes. The host supplies the
    /// two halves of an already-upgraded, message-oriented connection and
    /// the per-request [`Accept`] options.
    pub async fn drive<S, K>(&self, stream: S, sink: K, accept: Accept)
    where
        S: FrameStream,
        K: FrameSink + 'static,
    {
        connection::run(
            Arc::clone(&self.emitter),
            self.config.clone(),
            stream,
            Box::new(sink),
            accept,
        )
        .await;
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

//! Named extensions installed once at startup.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::hub::Hub;

/// A named extension wired into the system purely through event
/// subscriptions on the hub.
pub trait Plugin: Send + Sync + 'static {
    /// Registry name; re-installing under the same name overwrites the
    /// prior registration.
    fn name(&self) -> &str;

    /// Subscribe to lifecycle and topic events. Called once per install.
    fn install(self: Arc<Self>, hub: &Hub);

    /// Typed self, so companion accessors can recover the concrete plugin
    /// through [`Hub::plugin`].
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Name-keyed plugin registry owned by the hub.
#[derive(Default)]
pub(crate) struct PluginRegistry {
    plugins: Mutex<HashMap<String, Arc<dyn Plugin>>>,
}

impl PluginRegistry {
    pub(crate) fn insert(&self, plugin: Arc<dyn Plugin>) {
        let _ = self.plugins.lock().insert(plugin.name().to_owned(), plugin);
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.lock().get(name).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

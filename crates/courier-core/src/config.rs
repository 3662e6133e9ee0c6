//! Hub configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`Hub`](crate::Hub), shared by every connection it drives.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubConfig {
    /// Window before an unanswered inbound Post receives an empty default
    /// reply, in milliseconds.
    pub default_reply_ms: u64,
    /// Window a pending request waits for its Back frame before the
    /// correlation listener is removed, in milliseconds.
    pub correlation_timeout_ms: u64,
    /// Largest inbound frame accepted, in bytes. Oversized frames are
    /// dropped as malformed.
    pub max_frame_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_reply_ms: 3_000,
            correlation_timeout_ms: 6_000,
            max_frame_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl HubConfig {
    /// Default-reply window as a [`Duration`].
    pub(crate) fn default_reply_window(&self) -> Duration {
        Duration::from_millis(self.default_reply_ms)
    }

    /// Correlation-expiry window as a [`Duration`].
    pub(crate) fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_timeout_ms)
    }
}

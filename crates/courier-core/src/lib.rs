//! # courier-core
//!
//! Bidirectional keyed messaging over a message-oriented socket: the
//! event hub, per-frame connection contexts, request/reply correlation
//! with timeout cleanup, the per-socket dispatch loop, and the plugin
//! contract.
//!
//! - One [`Hub`] instance owns the subscription table and plugin registry
//! - Hosts hand [`Hub::drive`] the two halves of an upgraded socket
//! - Handlers receive a [`Context`] per inbound frame and reply with
//!   [`Context::write`] or start new requests with [`Context::emit`]
//! - Lifecycle topics `"connect"`, `"disconnect"`, `"ping"` fire with
//!   synthetic contexts

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod context;
pub mod emitter;
pub mod hub;
pub mod plugin;
pub mod socket;
#[cfg(feature = "axum")]
pub mod ws;

pub use courier_wire as wire;

pub use config::HubConfig;
pub use connection::{Accept, lifecycle};
pub use context::{Context, ContextError, EmitHandle, RequestMeta};
pub use emitter::{Emitter, SubscriptionHandle};
pub use hub::Hub;
pub use plugin::Plugin;
pub use socket::{FrameSink, FrameStream, TransportError};

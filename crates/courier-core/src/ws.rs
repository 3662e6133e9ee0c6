//! Axum WebSocket upgrade adapter.
//!
//! The core only ever sees the [`FrameStream`]/[`FrameSink`] seam; this
//! module adapts a split `axum::extract::ws::WebSocket` onto it and
//! advertises the fixed subprotocol during the handshake. Hosts route a
//! `GET` handler to [`upgrade`] and keep listener setup to themselves.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::connection::Accept;
use crate::hub::Hub;
use crate::socket::{FrameSink, FrameStream, TransportError};

/// Subprotocol name advertised during the upgrade handshake.
pub const SUBPROTOCOL: &str = "courier";

/// Receiving half of an upgraded WebSocket.
pub struct WsStream {
    inner: SplitStream<WebSocket>,
}

/// Sending half of an upgraded WebSocket.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

/// Split an upgraded socket into the core's two halves.
pub fn split(socket: WebSocket) -> (WsStream, WsSink) {
    let (sink, stream) = socket.split();
    (WsStream { inner: stream }, WsSink { inner: sink })
}

#[async_trait]
impl FrameStream for WsStream {
    async fn next(&mut self) -> Option<Result<Bytes, TransportError>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => return Some(Ok(data)),
                Some(Ok(Message::Close(_))) | None => return None,
                // Text frames and transport-level ping/pong are not part
                // of the protocol; skip them.
                Some(Ok(_)) => {}
                Some(Err(err)) => return Some(Err(TransportError::Io(err.to_string()))),
            }
        }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.inner
            .send(Message::Binary(payload))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }
}

/// Complete a WebSocket upgrade and hand the connection to `hub`.
///
/// Call from an axum route handler:
///
/// ```ignore
/// async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
///     courier_core::ws::upgrade(ws, hub, Accept::default())
/// }
/// ```
pub fn upgrade(ws: WebSocketUpgrade, hub: Arc<Hub>, accept: Accept) -> Response {
    ws.protocols([SUBPROTOCOL]).on_upgrade(move |socket| async move {
        let (stream, sink) = split(socket);
        hub.drive(stream, sink, accept).await;
    })
}

//! Per-frame connection context: replies, outbound requests, correlation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use courier_wire::{Frame, MessageId};

use crate::connection::ConnectionShared;
use crate::socket::TransportError;

/// Failure surfaced by [`Context::write`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The context carries no inbound message id to echo (synthetic
    /// lifecycle contexts).
    #[error("context is not replyable")]
    NotReplyable,
    /// The underlying socket write failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Metadata captured from the originating upgrade request. Empty on
/// synthetic and correlation-callback contexts when the host supplied
/// none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    /// Request path, e.g. `/ws`.
    pub path: String,
    /// Remote peer address, when known.
    pub remote: String,
}

impl RequestMeta {
    /// Metadata from the upgrade request the host accepted.
    pub fn new(path: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            remote: remote.into(),
        }
    }
}

/// Callback invoked with the correlated reply of an outbound request.
pub(crate) type ReplyCallback = Box<dyn FnOnce(Context) -> BoxFuture<'static, ()> + Send>;

/// One inbound message occurrence bound to one connection.
///
/// Cheap to clone; every handler invoked for the same frame shares the
/// replied flag and default-reply timer, so exactly one of an explicit
/// [`write`](Self::write) or the timer settles the peer's request.
#[derive(Clone)]
pub struct Context {
    conn: Arc<ConnectionShared>,
    frame: Option<Frame>,
    replied: Arc<AtomicBool>,
    reply_timer: Option<CancellationToken>,
    error: Option<TransportError>,
}

impl Context {
    pub(crate) fn inbound(
        conn: Arc<ConnectionShared>,
        frame: Frame,
        replied: Arc<AtomicBool>,
        reply_timer: Option<CancellationToken>,
    ) -> Self {
        Self {
            conn,
            frame: Some(frame),
            replied,
            reply_timer,
            error: None,
        }
    }

    /// A context for a lifecycle topic; carries no frame.
    pub(crate) fn synthetic(conn: Arc<ConnectionShared>) -> Self {
        Self {
            conn,
            frame: None,
            replied: Arc::new(AtomicBool::new(false)),
            reply_timer: None,
            error: None,
        }
    }

    /// A context delivered to an emit callback whose write failed.
    pub(crate) fn write_error(conn: Arc<ConnectionShared>, error: TransportError) -> Self {
        Self {
            conn,
            frame: None,
            replied: Arc::new(AtomicBool::new(false)),
            reply_timer: None,
            error: Some(error),
        }
    }

    /// Identifier of the owning connection.
    pub fn connection_id(&self) -> &str {
        self.conn.id()
    }

    /// Topic key of the inbound frame; empty for synthetic contexts.
    pub fn key(&self) -> &str {
        self.frame.as_ref().map_or("", |f| f.key.as_str())
    }

    /// Payload of the inbound frame; empty for synthetic contexts.
    pub fn data(&self) -> &[u8] {
        self.frame.as_ref().map_or(&[], |f| &f.data)
    }

    /// Message id of the inbound frame, when one exists.
    pub fn message_id(&self) -> Option<&MessageId> {
        self.frame.as_ref().map(|f| &f.message_id)
    }

    /// Whether the inbound frame carried the longtime flag.
    pub fn longtime(&self) -> bool {
        self.frame.as_ref().is_some_and(|f| f.longtime)
    }

    /// Metadata from the originating upgrade request.
    pub fn request(&self) -> &RequestMeta {
        self.conn.request()
    }

    /// Whether this context carries a transport error instead of a frame.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The transport error, when [`is_error`](Self::is_error) is true.
    pub fn error(&self) -> Option<&TransportError> {
        self.error.as_ref()
    }

    /// Whether a reply (explicit or default) has already been sent for the
    /// inbound frame.
    pub fn replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    /// Reply to the inbound Post: cancels the default-reply timer, marks
    /// the context replied, and sends a Back frame echoing the inbound
    /// message id and key.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), ContextError> {
        let frame = self.frame.as_ref().ok_or(ContextError::NotReplyable)?;
        let _ = self.replied.swap(true, Ordering::AcqRel);
        if let Some(timer) = &self.reply_timer {
            timer.cancel();
        }
        let back = Frame::back(frame.message_id, frame.key.clone(), data.into());
        self.conn.send(back.encode()).await?;
        Ok(())
    }

    /// Send a Post frame under `key` and correlate its eventual reply to
    /// `callback`.
    ///
    /// The callback runs with the reply context when a matching Back frame
    /// arrives inside the correlation window, or once with an
    /// error-carrying context when the write itself fails. If the window
    /// expires first the listener is removed and the callback is never
    /// invoked; the returned [`EmitHandle`] reports that expiry.
    pub async fn emit<F, Fut>(&self, key: &str, data: impl Into<Bytes>, callback: F) -> EmitHandle
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.conn.emit(key, data.into(), false, box_callback(callback)).await
    }

    /// Like [`emit`](Self::emit), with the longtime flag set so the peer
    /// skips its default-reply timer while a slow handler works.
    pub async fn emit_longtime<F, Fut>(
        &self,
        key: &str,
        data: impl Into<Bytes>,
        callback: F,
    ) -> EmitHandle
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.conn.emit(key, data.into(), true, box_callback(callback)).await
    }

    #[cfg(test)]
    pub(crate) fn test_stub() -> Self {
        Self::synthetic(ConnectionShared::test_stub())
    }
}

fn box_callback<F, Fut>(callback: F) -> ReplyCallback
where
    F: FnOnce(Context) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |ctx| -> BoxFuture<'static, ()> { Box::pin(callback(ctx)) })
}

/// Tracks one outbound request created by [`Context::emit`].
#[derive(Debug, Clone)]
pub struct EmitHandle {
    message_id: String,
    timed_out: CancellationToken,
}

impl EmitHandle {
    pub(crate) fn new(message_id: String, timed_out: CancellationToken) -> Self {
        Self {
            message_id,
            timed_out,
        }
    }

    /// Rendered message id the request correlates on.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Resolves once the request can no longer be answered: the
    /// correlation window expired or the connection tore down before a
    /// reply arrived. Never resolves when the callback ran.
    pub async fn timed_out(&self) {
        self.timed_out.cancelled().await;
    }

    /// Whether the request already expired without a reply.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.is_cancelled()
    }
}

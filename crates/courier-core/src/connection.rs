//! Connection state and the per-socket dispatch loop.
//!
//! One read loop per connection; every decoded frame is handed to an
//! independently spawned task so slow handlers never stall the loop.
//! Outbound writes are serialized through the connection's exclusive
//! write lock, so no frame is ever interleaved on the wire.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_wire::{Frame, FrameKind, MessageId, pong_reply};

use crate::config::HubConfig;
use crate::context::{Context, EmitHandle, ReplyCallback, RequestMeta};
use crate::emitter::{Emitter, SubscriptionHandle};
use crate::socket::{FrameSink, FrameStream, TransportError};

/// Topics published for connection lifecycle transitions, with synthetic
/// contexts carrying no key or data.
pub mod lifecycle {
    /// A connection entered its dispatch loop.
    pub const CONNECT: &str = "connect";
    /// A connection left its dispatch loop.
    pub const DISCONNECT: &str = "disconnect";
    /// A Ping frame was answered.
    pub const PING: &str = "ping";
}

/// Options supplied by the host when a connection is accepted.
#[derive(Debug, Clone, Default)]
pub struct Accept {
    /// Host-assigned connection id; a random id is generated when absent.
    pub id: Option<String>,
    /// Metadata from the originating upgrade request.
    pub request: RequestMeta,
}

struct PendingRequest {
    sub: SubscriptionHandle,
    timer: CancellationToken,
    timed_out: CancellationToken,
}

/// State shared by every context minted for one connection.
pub(crate) struct ConnectionShared {
    id: String,
    request: RequestMeta,
    sink: AsyncMutex<Box<dyn FrameSink>>,
    emitter: Arc<Emitter>,
    config: HubConfig,
    pending: Mutex<HashMap<String, PendingRequest>>,
    teardown: CancellationToken,
}

impl ConnectionShared {
    pub(crate) fn new(
        id: String,
        request: RequestMeta,
        sink: Box<dyn FrameSink>,
        emitter: Arc<Emitter>,
        config: HubConfig,
    ) -> Self {
        Self {
            id,
            request,
            sink: AsyncMutex::new(sink),
            emitter,
            config,
            pending: Mutex::new(HashMap::new()),
            teardown: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn request(&self) -> &RequestMeta {
        &self.request
    }

    pub(crate) fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// Serialize one frame onto the socket. The mutex is the connection's
    /// exclusive write lock.
    pub(crate) async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        sink.send(payload).await
    }

    /// Request loop termination (Close frame or host shutdown).
    pub(crate) fn begin_close(&self) {
        self.teardown.cancel();
    }

    async fn closed(&self) {
        self.teardown.cancelled().await;
    }

    fn take_pending(&self, topic: &str) -> Option<PendingRequest> {
        self.pending.lock().remove(topic)
    }

    /// Send a Post frame and register its reply correlation.
    ///
    /// The correlation listener is registered before the frame is written
    /// so a fast reply cannot slip past it; the peer cannot know the fresh
    /// message id until the write completes.
    pub(crate) async fn emit(
        self: &Arc<Self>,
        key: &str,
        data: Bytes,
        longtime: bool,
        callback: ReplyCallback,
    ) -> EmitHandle {
        let message_id = MessageId::random();
        let topic = message_id.render();
        let timer = self.teardown.child_token();
        let timed_out = CancellationToken::new();
        let slot: Arc<Mutex<Option<ReplyCallback>>> = Arc::new(Mutex::new(Some(callback)));

        let handler_conn = Arc::clone(self);
        let handler_topic = topic.clone();
        let handler_timer = timer.clone();
        let handler_slot = Arc::clone(&slot);
        let sub = self.emitter.once(&topic, move |ctx| {
            let conn = Arc::clone(&handler_conn);
            let topic = handler_topic.clone();
            let reply_timer = handler_timer.clone();
            let slot = Arc::clone(&handler_slot);
            async move {
                // The pending entry is the arbiter between reply and
                // expiry: whoever removes it wins, the other is a no-op.
                if conn.take_pending(&topic).is_none() {
                    return;
                }
                reply_timer.cancel();
                let cb = slot.lock().take();
                if let Some(cb) = cb {
                    cb(ctx).await;
                }
            }
        });

        let _ = self.pending.lock().insert(
            topic.clone(),
            PendingRequest {
                sub: sub.clone(),
                timer: timer.clone(),
                timed_out: timed_out.clone(),
            },
        );

        let mut frame = Frame::post(message_id, key, data);
        frame.longtime = longtime;
        if let Err(err) = self.send(frame.encode()).await {
            warn!(conn_id = %self.id, key, error = %err, "emit write failed");
            if self.take_pending(&topic).is_some() {
                self.emitter.off(&sub);
            }
            let cb = slot.lock().take();
            if let Some(cb) = cb {
                cb(Context::write_error(Arc::clone(self), err)).await;
            }
            return EmitHandle::new(topic, timed_out);
        }

        let expiry_conn = Arc::clone(self);
        let expiry_topic = topic.clone();
        let expiry_timer = timer;
        let expiry_signal = timed_out.clone();
        let window = self.config.correlation_window();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = expiry_timer.cancelled() => {}
                () = tokio::time::sleep(window) => {
                    if let Some(pending) = expiry_conn.take_pending(&expiry_topic) {
                        expiry_conn.emitter.off(&pending.sub);
                        debug!(conn_id = %expiry_conn.id, topic = expiry_topic, "pending request expired without a reply");
                        expiry_signal.cancel();
                    }
                }
            }
        });

        EmitHandle::new(topic, timed_out)
    }

    /// Arm the default-reply timer for an inbound Post without the
    /// longtime flag. Exactly one of {explicit write, this timer} settles
    /// the reply, guarded by the shared `replied` swap.
    pub(crate) fn arm_default_reply(
        self: &Arc<Self>,
        message_id: MessageId,
        replied: Arc<AtomicBool>,
    ) -> CancellationToken {
        let token = self.teardown.child_token();
        let conn = Arc::clone(self);
        let task_token = token.clone();
        let window = self.config.default_reply_window();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep(window) => {
                    if !replied.swap(true, Ordering::AcqRel) {
                        debug!(conn_id = %conn.id, "sending default reply");
                        if let Err(err) = conn.send(Frame::back_empty(message_id).encode()).await {
                            warn!(conn_id = %conn.id, error = %err, "default reply write failed");
                        }
                    }
                }
            }
        });
        token
    }

    /// Release every pending correlation: cancel timers, remove listeners,
    /// and signal their emit handles that no reply will ever come.
    fn teardown(&self) {
        self.teardown.cancel();
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, p)| p).collect()
        };
        for pending in drained {
            pending.timer.cancel();
            self.emitter.off(&pending.sub);
            pending.timed_out.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn test_stub() -> Arc<Self> {
        Arc::new(Self::new(
            "test-conn".into(),
            RequestMeta::default(),
            Box::new(test_support::NullSink),
            Arc::new(Emitter::new()),
            HubConfig::default(),
        ))
    }
}

/// Drive one accepted socket until it closes: publish `"connect"`, spawn a
/// dispatch task per inbound message, publish `"disconnect"` on the way
/// out.
pub(crate) async fn run<S>(
    emitter: Arc<Emitter>,
    config: HubConfig,
    mut stream: S,
    sink: Box<dyn FrameSink>,
    accept: Accept,
) where
    S: FrameStream,
{
    let id = accept
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| MessageId::random().render());
    let conn = Arc::new(ConnectionShared::new(
        id,
        accept.request,
        sink,
        emitter,
        config,
    ));

    info!(conn_id = %conn.id(), "connection open");
    counter!("courier_connections_total").increment(1);
    gauge!("courier_connections_active").increment(1.0);

    let _ = conn
        .emitter()
        .publish(lifecycle::CONNECT, Context::synthetic(Arc::clone(&conn)))
        .await;

    loop {
        tokio::select! {
            () = conn.closed() => break,
            next = stream.next() => match next {
                Some(Ok(payload)) => {
                    if payload.len() > conn.config.max_frame_size {
                        counter!("courier_frames_dropped_total", "reason" => "oversized").increment(1);
                        warn!(conn_id = %conn.id(), len = payload.len(), "oversized frame dropped");
                        continue;
                    }
                    let task_conn = Arc::clone(&conn);
                    let _ = tokio::spawn(async move {
                        dispatch_frame(task_conn, payload).await;
                    });
                }
                Some(Err(err)) => {
                    warn!(conn_id = %conn.id(), error = %err, "read failed");
                    break;
                }
                None => {
                    debug!(conn_id = %conn.id(), "stream ended");
                    break;
                }
            },
        }
    }

    conn.teardown();
    gauge!("courier_connections_active").decrement(1.0);
    let _ = conn
        .emitter()
        .publish(lifecycle::DISCONNECT, Context::synthetic(Arc::clone(&conn)))
        .await;
    info!(conn_id = %conn.id(), "connection closed");
}

/// Decode and route one inbound message. Runs as its own task.
async fn dispatch_frame(conn: Arc<ConnectionShared>, payload: Bytes) {
    let frame = match Frame::decode(&payload) {
        Ok(frame) => frame,
        Err(err) => {
            counter!("courier_frames_dropped_total", "reason" => "malformed").increment(1);
            warn!(conn_id = %conn.id(), error = %err, "malformed frame dropped");
            return;
        }
    };

    match frame.kind {
        FrameKind::Ping => {
            counter!("courier_frames_total", "kind" => "ping").increment(1);
            // Answered with the header rewritten in place; never enters
            // correlation or topic dispatch.
            if let Some(pong) = pong_reply(&payload) {
                if let Err(err) = conn.send(Bytes::copy_from_slice(&pong)).await {
                    warn!(conn_id = %conn.id(), error = %err, "pong write failed");
                    return;
                }
                let _ = conn
                    .emitter()
                    .publish(lifecycle::PING, Context::synthetic(Arc::clone(&conn)))
                    .await;
            }
        }
        FrameKind::Pong => {
            counter!("courier_frames_total", "kind" => "pong").increment(1);
            debug!(conn_id = %conn.id(), "pong dropped");
        }
        FrameKind::Back => {
            counter!("courier_frames_total", "kind" => "back").increment(1);
            let topic = frame.message_id.render();
            let ctx = Context::inbound(
                Arc::clone(&conn),
                frame,
                Arc::new(AtomicBool::new(false)),
                None,
            );
            let fired = conn.emitter().publish(&topic, ctx).await;
            if fired == 0 {
                debug!(conn_id = %conn.id(), topic, "back frame without pending correlation");
            }
        }
        FrameKind::Close => {
            counter!("courier_frames_total", "kind" => "close").increment(1);
            debug!(conn_id = %conn.id(), "close frame received");
            conn.begin_close();
        }
        FrameKind::Post => {
            counter!("courier_frames_total", "kind" => "post").increment(1);
            route_post(conn, frame).await;
        }
    }
}

async fn route_post(conn: Arc<ConnectionShared>, frame: Frame) {
    let replied = Arc::new(AtomicBool::new(false));
    let reply_timer = if frame.longtime {
        None
    } else {
        Some(conn.arm_default_reply(frame.message_id, Arc::clone(&replied)))
    };
    let key = frame.key.clone();
    let ctx = Context::inbound(Arc::clone(&conn), frame, replied, reply_timer);
    let fired = conn.emitter().publish(&key, ctx).await;
    if fired == 0 {
        debug!(conn_id = %conn.id(), key, "post frame without subscribers");
    }
}

//! End-to-end dispatch tests over an in-memory socket pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use courier_core::{
    Accept, Context, FrameSink, FrameStream, Hub, TransportError, lifecycle,
};
use courier_wire::{Frame, FrameKind, MessageId};

struct PipeSink(mpsc::Sender<Bytes>);

#[async_trait]
impl FrameSink for PipeSink {
    async fn send(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.0.send(payload).await.map_err(|_| TransportError::Closed)
    }
}

struct PipeStream(mpsc::Receiver<Bytes>);

#[async_trait]
impl FrameStream for PipeStream {
    async fn next(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.0.recv().await.map(Ok)
    }
}

/// Two cross-wired in-memory endpoints; each is (stream, sink).
fn pipe() -> ((PipeStream, PipeSink), (PipeStream, PipeSink)) {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel::<Bytes>(64);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel::<Bytes>(64);
    (
        (PipeStream(b_to_a_rx), PipeSink(a_to_b_tx)),
        (PipeStream(a_to_b_rx), PipeSink(b_to_a_tx)),
    )
}

fn spawn_drive(
    hub: &Arc<Hub>,
    stream: PipeStream,
    sink: PipeSink,
    accept: Accept,
) -> tokio::task::JoinHandle<()> {
    let hub = Arc::clone(hub);
    tokio::spawn(async move { hub.drive(stream, sink, accept).await })
}

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<T>>>>;

fn slot<T>() -> (Slot<T>, oneshot::Receiver<T>) {
    let (tx, rx) = oneshot::channel();
    (Arc::new(Mutex::new(Some(tx))), rx)
}

#[tokio::test]
async fn end_to_end_echo() {
    let server = Arc::new(Hub::new());
    let client = Arc::new(Hub::new());

    let _ = server.on("echo", |ctx: Context| async move {
        let mut out = ctx.data().to_vec();
        out.extend_from_slice(b"-back");
        let _ = ctx.write(out).await;
    });

    let (reply_slot, reply_rx) = slot::<(Vec<u8>, String)>();
    let (emit_slot, emit_rx) = slot::<String>();
    let _ = client.on(lifecycle::CONNECT, move |ctx: Context| {
        let reply_slot = Arc::clone(&reply_slot);
        let emit_slot = Arc::clone(&emit_slot);
        async move {
            let cb_slot = Arc::clone(&reply_slot);
            let handle = ctx
                .emit("echo", Bytes::from_static(b"hi"), move |reply: Context| {
                    let data = reply.data().to_vec();
                    let id = reply.message_id().map(MessageId::render).unwrap_or_default();
                    async move {
                        if let Some(tx) = cb_slot.lock().take() {
                            let _ = tx.send((data, id));
                        }
                    }
                })
                .await;
            if let Some(tx) = emit_slot.lock().take() {
                let _ = tx.send(handle.message_id().to_owned());
            }
        }
    });

    let (server_end, client_end) = pipe();
    let _s = spawn_drive(&server, server_end.0, server_end.1, Accept::default());
    let _c = spawn_drive(&client, client_end.0, client_end.1, Accept::default());

    let emitted_id = emit_rx.await.unwrap();
    let (data, reply_id) = reply_rx.await.unwrap();
    assert_eq!(data, b"hi-back");
    assert_eq!(reply_id, emitted_id);
}

#[tokio::test]
async fn reply_echoes_message_id_and_key() {
    let hub = Arc::new(Hub::new());
    let _ = hub.on("greet", |ctx: Context| async move {
        let _ = ctx.write(Bytes::from_static(b"hello")).await;
    });

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    let id = MessageId::random();
    peer_sink.0.send(Frame::post(id, "greet", Bytes::new()).encode()).await.unwrap();

    let back = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(back.kind, FrameKind::Back);
    assert_eq!(back.message_id, id);
    assert_eq!(back.key, "greet");
    assert_eq!(&back.data[..], b"hello");
}

#[tokio::test(start_paused = true)]
async fn unanswered_post_gets_exactly_one_default_reply() {
    let hub = Arc::new(Hub::new());
    let _ = hub.on("quiet", |_ctx: Context| async {});

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    let id = MessageId::random();
    peer_sink.0.send(Frame::post(id, "quiet", Bytes::from_static(b"x")).encode()).await.unwrap();

    let back = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(back.kind, FrameKind::Back);
    assert_eq!(back.message_id, id);
    assert!(!back.has_body());

    // No second reply follows.
    let extra = tokio::time::timeout(Duration::from_secs(10), peer_stream.0.recv()).await;
    assert!(extra.is_err());
}

#[tokio::test(start_paused = true)]
async fn explicit_write_suppresses_default_reply() {
    let hub = Arc::new(Hub::new());
    let _ = hub.on("fast", |ctx: Context| async move {
        let _ = ctx.write(Bytes::from_static(b"ack")).await;
    });

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    peer_sink
        .0
        .send(Frame::post(MessageId::random(), "fast", Bytes::new()).encode())
        .await
        .unwrap();

    let back = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(&back.data[..], b"ack");

    // The timer window passes without a default reply.
    let extra = tokio::time::timeout(Duration::from_secs(10), peer_stream.0.recv()).await;
    assert!(extra.is_err());
}

#[tokio::test(start_paused = true)]
async fn longtime_post_skips_default_reply() {
    let hub = Arc::new(Hub::new());
    let _ = hub.on("slow", |_ctx: Context| async {});

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    let mut post = Frame::post(MessageId::random(), "slow", Bytes::new());
    post.longtime = true;
    peer_sink.0.send(post.encode()).await.unwrap();

    let extra = tokio::time::timeout(Duration::from_secs(10), peer_stream.0.recv()).await;
    assert!(extra.is_err());
}

#[tokio::test(start_paused = true)]
async fn emit_times_out_silently_and_drops_late_reply() {
    let client = Arc::new(Hub::new());
    let invoked = Arc::new(AtomicBool::new(false));

    let (handle_slot, handle_rx) = slot();
    let flag = Arc::clone(&invoked);
    let _ = client.on(lifecycle::CONNECT, move |ctx: Context| {
        let handle_slot = Arc::clone(&handle_slot);
        let flag = Arc::clone(&flag);
        async move {
            let cb_flag = Arc::clone(&flag);
            let handle = ctx
                .emit_longtime("never", Bytes::new(), move |_reply: Context| async move {
                    cb_flag.store(true, Ordering::SeqCst);
                })
                .await;
            if let Some(tx) = handle_slot.lock().take() {
                let _ = tx.send(handle);
            }
        }
    });

    let (client_end, peer) = pipe();
    let _task = spawn_drive(&client, client_end.0, client_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    let handle = handle_rx.await.unwrap();
    let post = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert!(post.longtime);
    assert_eq!(post.message_id.render(), handle.message_id());

    // The peer never answers; the window expires.
    handle.timed_out().await;
    assert!(handle.is_timed_out());
    assert!(!invoked.load(Ordering::SeqCst));

    // A reply landing after expiry must not invoke the stale callback.
    peer_sink
        .0
        .send(Frame::back(post.message_id, "never", Bytes::from_static(b"late")).encode())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn ping_yields_one_pong_and_one_publish() {
    let hub = Arc::new(Hub::new());
    let pings = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&pings);
    let _ = hub.on(lifecycle::PING, move |_ctx: Context| {
        let _ = count.fetch_add(1, Ordering::SeqCst);
        std::future::ready(())
    });

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    let id = MessageId::random();
    peer_sink.0.send(Frame::ping(id).encode()).await.unwrap();

    let pong = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(pong.kind, FrameKind::Pong);
    assert_eq!(pong.message_id, id);
    assert!(!pong.has_body());

    let extra = tokio::time::timeout(Duration::from_secs(10), peer_stream.0.recv()).await;
    assert!(extra.is_err());
    assert_eq!(pings.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_pong_is_silently_dropped() {
    let hub = Arc::new(Hub::new());
    let pings = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&pings);
    let _ = hub.on(lifecycle::PING, move |_ctx: Context| {
        let _ = count.fetch_add(1, Ordering::SeqCst);
        std::future::ready(())
    });
    let _ = hub.on("probe", |ctx: Context| async move {
        let _ = ctx.write(Bytes::from_static(b"alive")).await;
    });

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    // A Pong out of nowhere: no reply, no publish.
    let mut pong = Frame::ping(MessageId::random());
    pong.kind = FrameKind::Pong;
    peer_sink.0.send(pong.encode()).await.unwrap();

    // The loop is still alive afterwards.
    peer_sink
        .0
        .send(Frame::post(MessageId::random(), "probe", Bytes::new()).encode())
        .await
        .unwrap();
    let back = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(&back.data[..], b"alive");
    assert_eq!(pings.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_killing_the_loop() {
    let hub = Arc::new(Hub::new());
    let _ = hub.on("probe", |ctx: Context| async move {
        let _ = ctx.write(Bytes::from_static(b"alive")).await;
    });

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    // Shorter than a header.
    peer_sink.0.send(Bytes::from_static(b"junk")).await.unwrap();
    // Header-sized but with a lying body length.
    let mut bad = Frame::post(MessageId::random(), "k", Bytes::from_static(b"data")).encode().to_vec();
    bad.truncate(bad.len() - 3);
    peer_sink.0.send(Bytes::from(bad)).await.unwrap();

    peer_sink
        .0
        .send(Frame::post(MessageId::random(), "probe", Bytes::new()).encode())
        .await
        .unwrap();
    let back = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(&back.data[..], b"alive");
}

#[tokio::test]
async fn lifecycle_connect_and_disconnect_publish() {
    let hub = Arc::new(Hub::new());
    let (connect_slot, connect_rx) = slot::<String>();
    let (disconnect_slot, disconnect_rx) = slot::<String>();

    let _ = hub.on(lifecycle::CONNECT, move |ctx: Context| {
        let connect_slot = Arc::clone(&connect_slot);
        async move {
            assert_eq!(ctx.key(), "");
            assert!(ctx.data().is_empty());
            if let Some(tx) = connect_slot.lock().take() {
                let _ = tx.send(ctx.connection_id().to_owned());
            }
        }
    });
    let _ = hub.on(lifecycle::DISCONNECT, move |ctx: Context| {
        let disconnect_slot = Arc::clone(&disconnect_slot);
        async move {
            if let Some(tx) = disconnect_slot.lock().take() {
                let _ = tx.send(ctx.connection_id().to_owned());
            }
        }
    });

    let (hub_end, peer) = pipe();
    let accept = Accept {
        id: Some("conn-42".into()),
        ..Accept::default()
    };
    let task = spawn_drive(&hub, hub_end.0, hub_end.1, accept);

    assert_eq!(connect_rx.await.unwrap(), "conn-42");

    // Dropping the peer ends the stream; the dispatcher must clean up.
    drop(peer);
    assert_eq!(disconnect_rx.await.unwrap(), "conn-42");
    task.await.unwrap();
}

#[tokio::test]
async fn close_frame_terminates_the_connection() {
    let hub = Arc::new(Hub::new());
    let (disconnect_slot, disconnect_rx) = slot::<()>();
    let _ = hub.on(lifecycle::DISCONNECT, move |_ctx: Context| {
        let disconnect_slot = Arc::clone(&disconnect_slot);
        async move {
            if let Some(tx) = disconnect_slot.lock().take() {
                let _ = tx.send(());
            }
        }
    });

    let (hub_end, peer) = pipe();
    let task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (_peer_stream, peer_sink) = peer;

    peer_sink.0.send(Frame::close(MessageId::random()).encode()).await.unwrap();

    disconnect_rx.await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn generated_connection_id_is_printable() {
    let hub = Arc::new(Hub::new());
    let (connect_slot, connect_rx) = slot::<String>();
    let _ = hub.on(lifecycle::CONNECT, move |ctx: Context| {
        let connect_slot = Arc::clone(&connect_slot);
        async move {
            if let Some(tx) = connect_slot.lock().take() {
                let _ = tx.send(ctx.connection_id().to_owned());
            }
        }
    });

    let (hub_end, _peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());

    let id = connect_rx.await.unwrap();
    assert_eq!(id.len(), 10);
    assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
}

#[tokio::test]
async fn server_initiated_emit_reaches_client_and_correlates() {
    let server = Arc::new(Hub::new());
    let client = Arc::new(Hub::new());

    // The client answers pushes under "notify".
    let _ = client.on("notify", |ctx: Context| async move {
        let _ = ctx.write(Bytes::from_static(b"got-it")).await;
    });

    let (reply_slot, reply_rx) = slot::<Vec<u8>>();
    let _ = server.on(lifecycle::CONNECT, move |ctx: Context| {
        let reply_slot = Arc::clone(&reply_slot);
        async move {
            let cb_slot = Arc::clone(&reply_slot);
            let _handle = ctx
                .emit("notify", Bytes::from_static(b"news"), move |reply: Context| {
                    let data = reply.data().to_vec();
                    async move {
                        if let Some(tx) = cb_slot.lock().take() {
                            let _ = tx.send(data);
                        }
                    }
                })
                .await;
        }
    });

    let (server_end, client_end) = pipe();
    let _s = spawn_drive(&server, server_end.0, server_end.1, Accept::default());
    let _c = spawn_drive(&client, client_end.0, client_end.1, Accept::default());

    assert_eq!(reply_rx.await.unwrap(), b"got-it");
}

#[tokio::test]
async fn oversized_frames_are_dropped() {
    let hub = Arc::new(Hub::with_config(courier_core::HubConfig {
        max_frame_size: 64,
        ..courier_core::HubConfig::default()
    }));
    let _ = hub.on("probe", |ctx: Context| async move {
        let _ = ctx.write(Bytes::from_static(b"alive")).await;
    });

    let (hub_end, peer) = pipe();
    let _task = spawn_drive(&hub, hub_end.0, hub_end.1, Accept::default());
    let (mut peer_stream, peer_sink) = peer;

    let big = Frame::post(MessageId::random(), "probe", Bytes::from(vec![0u8; 256]));
    peer_sink.0.send(big.encode()).await.unwrap();

    peer_sink
        .0
        .send(Frame::post(MessageId::random(), "probe", Bytes::new()).encode())
        .await
        .unwrap();
    let back = Frame::decode(&peer_stream.0.recv().await.unwrap()).unwrap();
    assert_eq!(&back.data[..], b"alive");
}

//! WebSocket transport for claims sessions.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionHandler;
use crate::AppState;
use crate::config::DeliveryConfig;
use crate::rooms::Frame;

/// Liveness settings for one socket.
#[derive(Debug, Clone, Copy)]
pub struct SocketTiming {
    /// Interval between protocol pings sent to the client.
    pub heartbeat: Duration,
    /// Close the session after this long without any inbound frame.
    pub idle_timeout: Duration,
    /// Longest a single write may block before the session is dropped.
    pub write_timeout: Duration,
}

impl SocketTiming {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            heartbeat: config.heartbeat_interval(),
            idle_timeout: config.idle_timeout(),
            write_timeout: config.send_timeout(),
        }
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("socket write failed: {0}")]
    Socket(#[from] axum::Error),

    #[error("socket write blocked for {0:?}")]
    TimedOut(Duration),
}

/// GET /ws/claims/{customer_id} - Subscribe to a customer's claims.
///
/// The room is joined before the handshake completes, so a full registry
/// turns the upgrade away with 503 instead of accepting and closing.
pub async fn claims_socket(
    ws: WebSocketUpgrade,
    Path(customer_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let joined = SessionHandler::connect(
        customer_id.clone(),
        Arc::clone(&state.registry),
        state.snapshots.clone(),
        state.config.delivery.outbound_queue,
    )
    .await;

    let (session, inbox) = match joined {
        Ok(joined) => joined,
        Err(e) => {
            warn!(
                name: "session.rejected",
                customer_id = %customer_id,
                error = %e,
                "Refusing claims socket"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    let timing = SocketTiming::from_config(&state.config.delivery);
    let shutdown = state.shutdown.clone();
    // A failed upgrade drops the callback, and with it the session, which
    // releases its room slot.
    ws.on_failed_upgrade(move |e| {
        debug!(customer_id = %customer_id, error = %e, "Claims socket upgrade failed");
    })
    .on_upgrade(move |socket| serve_session(socket, session, inbox, timing, shutdown))
}

/// Drive one accepted socket until either side goes away or `shutdown`
/// fires.
///
/// Everything written to the socket goes through this task: the initial
/// snapshot, replies to client messages, room broadcasts and heartbeats.
/// A write that blocks past [`SocketTiming::write_timeout`] ends the
/// session.
pub async fn serve_session<S>(
    socket: S,
    mut session: SessionHandler,
    mut inbox: mpsc::Receiver<Frame>,
    timing: SocketTiming,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message, Error = axum::Error>,
{
    let (mut sink, mut stream) = socket.split();

    if let Some(frame) = session.initial_snapshot().await {
        if let Err(e) = send_text(&mut sink, &frame, timing.write_timeout).await {
            debug!(session_id = %session.id(), error = %e, "Initial snapshot not delivered");
            session.on_disconnect(None).await;
            return;
        }
    }

    let mut heartbeat = tokio::time::interval_at(Instant::now() + timing.heartbeat, timing.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let close_code = loop {
        let written = tokio::select! {
            () = shutdown.cancelled() => {
                let _ = close(&mut sink, "server shutting down", timing.write_timeout).await;
                break Some(close_code::AWAY);
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    match session.on_message(text.as_str()).await {
                        Some(reply) => send_text(&mut sink, &reply, timing.write_timeout).await,
                        None => Ok(()),
                    }
                }
                Some(Ok(Message::Close(frame))) => break frame.map(|f| f.code),
                // Binary frames carry nothing for us; pings are answered by the transport.
                Some(Ok(_)) => {
                    last_seen = Instant::now();
                    Ok(())
                }
                Some(Err(e)) => {
                    debug!(session_id = %session.id(), error = %e, "Socket read failed");
                    break None;
                }
                None => break None,
            },
            Some(frame) = inbox.recv() => {
                on_room_broadcast(&mut sink, &frame, timing.write_timeout).await
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() >= timing.idle_timeout {
                    info!(
                        name: "session.idle",
                        session_id = %session.id(),
                        idle = ?last_seen.elapsed(),
                        "Closing idle claims session"
                    );
                    let _ = close(&mut sink, "idle timeout", timing.write_timeout).await;
                    break Some(close_code::AWAY);
                }
                write(&mut sink, Message::Ping(Bytes::new()), timing.write_timeout).await
            }
        };

        if let Err(e) = written {
            debug!(session_id = %session.id(), error = %e, "Dropping claims session");
            break None;
        }
    };

    session.on_disconnect(close_code).await;
}

/// Forward a room broadcast to the client unchanged.
async fn on_room_broadcast<K>(sink: &mut K, frame: &Frame, limit: Duration) -> Result<(), WriteError>
where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    send_text(sink, frame, limit).await
}

async fn send_text<K>(sink: &mut K, frame: &Frame, limit: Duration) -> Result<(), WriteError>
where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    write(sink, Message::Text(frame.as_ref().into()), limit).await
}

async fn close<K>(sink: &mut K, reason: &'static str, limit: Duration) -> Result<(), WriteError>
where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    let frame = CloseFrame {
        code: close_code::AWAY,
        reason: reason.into(),
    };
    write(sink, Message::Close(Some(frame)), limit).await
}

async fn write<K>(sink: &mut K, message: Message, limit: Duration) -> Result<(), WriteError>
where
    K: Sink<Message, Error = axum::Error> + Unpin,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(sent) => Ok(sent?),
        Err(_elapsed) => Err(WriteError::TimedOut(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::fixtures::claim;
    use crate::rooms::RoomRegistry;
    use crate::snapshot::SnapshotBuilder;
    use crate::store::InMemoryClaimStore;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// In-memory socket. Inbound frames come from a channel; outbound frames
    /// are recorded, or never accepted when `stalled`.
    struct FakeSocket {
        inbound: mpsc::UnboundedReceiver<Message>,
        sent: mpsc::UnboundedSender<Message>,
        stalled: bool,
    }

    impl Stream for FakeSocket {
        type Item = Result<Message, axum::Error>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_recv(cx).map(|message| message.map(Ok))
        }
    }

    impl Sink<Message> for FakeSocket {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            if self.stalled {
                Poll::Pending
            } else {
                Poll::Ready(Ok(()))
            }
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            let _ = self.sent.send(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Harness {
        registry: Arc<RoomRegistry>,
        session_id: uuid::Uuid,
        client: mpsc::UnboundedSender<Message>,
        sent: mpsc::UnboundedReceiver<Message>,
        shutdown: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    const TIMING: SocketTiming = SocketTiming {
        heartbeat: Duration::from_secs(1),
        idle_timeout: Duration::from_secs(3),
        write_timeout: Duration::from_secs(2),
    };

    async fn start(stalled: bool, timing: SocketTiming) -> Harness {
        let registry = Arc::new(RoomRegistry::default());
        let snapshots = SnapshotBuilder::new(Arc::new(InMemoryClaimStore::with_claims([claim(1, 42, 0)])));
        let (session, inbox) = SessionHandler::connect("42", Arc::clone(&registry), snapshots, 8)
            .await
            .unwrap();
        let session_id = session.id();

        let (client, inbound) = mpsc::unbounded_channel();
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let socket = FakeSocket {
            inbound,
            sent: sent_tx,
            stalled,
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_session(socket, session, inbox, timing, shutdown.clone()));

        Harness {
            registry,
            session_id,
            client,
            sent,
            shutdown,
            task,
        }
    }

    fn away_code(message: &Message) -> Option<u16> {
        match message {
            Message::Close(Some(frame)) => Some(frame.code),
            _ => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_writes_end_the_session() {
        let mut h = start(true, TIMING).await;

        tokio::time::timeout(Duration::from_secs(10), &mut h.task)
            .await
            .expect("session outlived a blocked write")
            .unwrap();

        assert!(!h.registry.is_member("claims_42", h.session_id).await);
        assert!(h.sent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_is_pinged_then_closed_as_away() {
        let mut h = start(false, TIMING).await;

        tokio::time::timeout(Duration::from_secs(10), &mut h.task)
            .await
            .expect("idle session was never closed")
            .unwrap();

        let mut sent = Vec::new();
        while let Ok(message) = h.sent.try_recv() {
            sent.push(message);
        }
        assert!(matches!(sent.first(), Some(Message::Text(_))));
        let pings = sent.iter().filter(|m| matches!(m, Message::Ping(_))).count();
        assert_eq!(pings, 2);
        assert_eq!(sent.last().and_then(away_code), Some(close_code::AWAY));
        assert!(!h.registry.is_member("claims_42", h.session_id).await);
        drop(h.client);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_keep_the_session_alive() {
        let mut h = start(false, TIMING).await;

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            h.client.send(Message::Pong(Bytes::new())).unwrap();
        }
        assert!(!h.task.is_finished());
        assert!(h.registry.is_member("claims_42", h.session_id).await);

        h.shutdown.cancel();
        (&mut h.task).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_the_socket_as_away() {
        let mut h = start(false, TIMING).await;
        assert!(matches!(h.sent.recv().await, Some(Message::Text(_))));

        h.shutdown.cancel();
        (&mut h.task).await.unwrap();

        let last = h.sent.recv().await.unwrap();
        assert_eq!(away_code(&last), Some(close_code::AWAY));
        assert!(!h.registry.is_member("claims_42", h.session_id).await);
    }
}

//! Per-connection protocol state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::claims::envelope::{InboundMessage, OutboundMessage};
use crate::rooms::{Frame, RegistryError, RoomRegistry, room_name};
use crate::snapshot::SnapshotBuilder;

/// One connected customer.
///
/// The handler holds the only strong sender of its room queue, so the
/// registry's membership entry lives exactly as long as the handler does.
#[derive(Debug)]
pub struct SessionHandler {
    id: Uuid,
    customer_id: String,
    room: String,
    registry: Arc<RoomRegistry>,
    snapshots: SnapshotBuilder,
    /// Keeps the room queue open; the registry only holds a weak sender.
    #[allow(dead_code)]
    outbox: mpsc::Sender<Frame>,
    joined: bool,
}

impl SessionHandler {
    /// Join the customer's room. Returns the handler and the receiving end
    /// of its room queue, which the connection task drains.
    ///
    /// This is the only step that can refuse a connection.
    pub async fn connect(
        customer_id: impl Into<String>,
        registry: Arc<RoomRegistry>,
        snapshots: SnapshotBuilder,
        queue_capacity: usize,
    ) -> Result<(Self, mpsc::Receiver<Frame>), RegistryError> {
        let customer_id = customer_id.into();
        let room = room_name(&customer_id);
        let id = Uuid::new_v4();
        let (outbox, inbox) = mpsc::channel(queue_capacity.max(1));

        registry.join(&room, id, &outbox).await?;
        info!(
            name: "session.connected",
            session_id = %id,
            customer_id = %customer_id,
            room = %room,
            "Claims session connected"
        );

        Ok((
            Self {
                id,
                customer_id,
                room,
                registry,
                snapshots,
                outbox,
                joined: true,
            },
            inbox,
        ))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Frame to send right after the connection is accepted: the unfiltered
    /// snapshot. `None` if the store could not be read.
    pub async fn initial_snapshot(&self) -> Option<Frame> {
        self.snapshot_frame(None).await
    }

    /// React to one client text frame. Returns the reply to send, if any.
    /// Unrecognised input is dropped and never closes the connection.
    pub async fn on_message(&self, raw: &str) -> Option<Frame> {
        match InboundMessage::parse(raw)? {
            InboundMessage::Refresh => self.snapshot_frame(None).await,
            InboundMessage::Filter { status } => self.snapshot_frame(status.as_deref()).await,
            InboundMessage::Ping { timestamp } => encode(&OutboundMessage::pong(timestamp)),
        }
    }

    /// Leave the room. Safe to call more than once.
    pub async fn on_disconnect(&mut self, close_code: Option<u16>) {
        if !self.joined {
            return;
        }
        self.joined = false;
        self.registry.leave(&self.room, self.id).await;
        info!(
            name: "session.disconnected",
            session_id = %self.id,
            room = %self.room,
            close_code = ?close_code,
            "Claims session disconnected"
        );
    }

    async fn snapshot_frame(&self, status: Option<&str>) -> Option<Frame> {
        match self.snapshots.claims_update(&self.customer_id, status).await {
            Ok(update) => encode(&update),
            Err(e) => {
                warn!(
                    session_id = %self.id,
                    customer_id = %self.customer_id,
                    status = ?status,
                    error = %e,
                    "Failed to build claims snapshot"
                );
                None
            }
        }
    }
}

impl Drop for SessionHandler {
    // A handler dropped without on_disconnect (failed upgrade, cancelled
    // task) still has to give its room slot back.
    fn drop(&mut self) {
        if !self.joined {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let room = std::mem::take(&mut self.room);
        let id = self.id;
        runtime.spawn(async move {
            if registry.leave(&room, id).await {
                debug!(session_id = %id, room = %room, "Released room slot of dropped session");
            }
        });
    }
}

fn encode(message: &OutboundMessage) -> Option<Frame> {
    match message.to_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(error = %e, "Failed to encode outbound message");
            None
        }
    }
}

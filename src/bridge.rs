//! Pushes fresh snapshots to a customer's room after their claims change.
//!
//! Writers call [`MutationBridge::notify`] from wherever a claim is created or
//! changes status. The call never blocks and never fails: it hands the
//! customer id to a single dispatcher task, which rebuilds the unfiltered
//! snapshot and publishes it on the room bus. Notifications for the same
//! customer that queue up while the dispatcher is busy collapse into one
//! snapshot, since that snapshot already reflects every committed change.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rooms::{RegistryError, RoomBus, room_name};
use crate::snapshot::SnapshotBuilder;
use crate::store::StoreError;

const BATCH_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to build snapshot: {0}")]
    Snapshot(#[from] StoreError),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to publish snapshot: {0}")]
    Publish(#[from] RegistryError),
}

/// Handle for queueing change notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MutationBridge {
    tx: mpsc::Sender<String>,
}

impl MutationBridge {
    /// Start the dispatcher. It runs until `shutdown` fires or every handle
    /// has been dropped.
    pub fn spawn(
        capacity: usize,
        snapshots: SnapshotBuilder,
        bus: Arc<dyn RoomBus>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(dispatch(rx, snapshots, bus, shutdown));
        (Self { tx }, handle)
    }

    /// Queue a snapshot push for `customer_id`.
    ///
    /// Returns whether the notification was queued. A full queue or a stopped
    /// dispatcher drops it with a warning; the caller's write has already
    /// committed and is not affected.
    pub fn notify(&self, customer_id: impl Into<String>) -> bool {
        let customer_id = customer_id.into();
        match self.tx.try_send(customer_id) {
            Ok(()) => {
                counter!("claims_notifications_total").increment(1);
                true
            }
            Err(TrySendError::Full(customer_id)) => {
                counter!("claims_notifications_dropped_total", "reason" => "full").increment(1);
                warn!(customer_id = %customer_id, "Notification queue full, dropping update");
                false
            }
            Err(TrySendError::Closed(customer_id)) => {
                counter!("claims_notifications_dropped_total", "reason" => "closed").increment(1);
                warn!(customer_id = %customer_id, "Notification dispatcher stopped, dropping update");
                false
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<String>,
    snapshots: SnapshotBuilder,
    bus: Arc<dyn RoomBus>,
    shutdown: CancellationToken,
) {
    info!(name: "bridge.started", backend = bus.backend(), "Mutation bridge started");
    let mut batch = Vec::with_capacity(BATCH_SIZE);

    loop {
        let received = tokio::select! {
            () = shutdown.cancelled() => break,
            n = rx.recv_many(&mut batch, BATCH_SIZE) => n,
        };
        if received == 0 {
            break;
        }

        let mut seen = HashSet::with_capacity(received);
        for customer_id in batch.drain(..) {
            if !seen.insert(customer_id.clone()) {
                continue;
            }
            match publish_snapshot(&snapshots, bus.as_ref(), &customer_id).await {
                Ok(recipients) => {
                    debug!(customer_id = %customer_id, recipients, "Pushed claims snapshot");
                }
                Err(e) => {
                    warn!(customer_id = %customer_id, error = %e, "Failed to push claims snapshot");
                }
            }
        }
    }

    info!(name: "bridge.stopped", "Mutation bridge stopped");
}

/// Build the unfiltered snapshot for `customer_id` and publish it to their
/// room. Returns what the bus reports as recipients.
pub async fn publish_snapshot(
    snapshots: &SnapshotBuilder,
    bus: &dyn RoomBus,
    customer_id: &str,
) -> Result<usize, BridgeError> {
    let frame = snapshots.claims_update(customer_id, None).await?.to_frame()?;
    Ok(bus.publish(&room_name(customer_id), frame).await?)
}

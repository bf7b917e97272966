//! In-process room membership.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Frame, RegistryError, RoomBus};
use crate::config::AppConfig;

/// Bounds applied to membership.
#[derive(Debug, Clone, Copy)]
pub struct RegistryLimits {
    pub max_sessions_per_room: usize,
    pub max_sessions: usize,
}

impl RegistryLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_sessions_per_room: config.registry.max_sessions_per_room,
            max_sessions: config.registry.max_sessions,
        }
    }
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            max_sessions_per_room: 1024,
            max_sessions: 100_000,
        }
    }
}

// Members are held by weak sender: the room tracks a session, it never keeps
// one alive. A member whose sender can no longer be upgraded has gone away.
type Members = HashMap<Uuid, mpsc::WeakSender<Frame>>;

/// Room name → connected sessions.
///
/// One lock guards the whole map, so join, leave and the member snapshot
/// taken by publish are linearized. Delivery happens after the lock is
/// released and never waits on a member.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Members>>,
    // Total members across rooms. Only changed while the write lock is held.
    sessions: AtomicUsize,
    limits: RegistryLimits,
}

enum Delivery {
    Delivered,
    Full,
    Gone,
}

impl RoomRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sessions: AtomicUsize::new(0),
            limits,
        }
    }

    /// Add a session to `room`. Joining a room the session is already in
    /// just refreshes its outbox.
    pub async fn join(
        &self,
        room: &str,
        session_id: Uuid,
        outbox: &mpsc::Sender<Frame>,
    ) -> Result<(), RegistryError> {
        let mut rooms = self.rooms.write().await;

        let existing = rooms.get(room);
        let rejoin = existing.is_some_and(|m| m.contains_key(&session_id));
        if !rejoin {
            if self.sessions.load(Ordering::Relaxed) >= self.limits.max_sessions {
                return Err(RegistryError::Capacity {
                    limit: self.limits.max_sessions,
                });
            }
            if existing.map_or(0, HashMap::len) >= self.limits.max_sessions_per_room {
                return Err(RegistryError::RoomFull {
                    room: room.to_string(),
                    limit: self.limits.max_sessions_per_room,
                });
            }
        }

        rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id, outbox.downgrade());
        if !rejoin {
            self.count_joined();
        }

        debug!(room, %session_id, "Session joined room");
        Ok(())
    }

    /// Remove a session from `room`. Returns whether it was a member;
    /// leaving twice is harmless.
    pub async fn leave(&self, room: &str, session_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };

        let removed = members.remove(&session_id).is_some();
        if members.is_empty() {
            rooms.remove(room);
        }
        if removed {
            self.count_removed(1);
            debug!(room, %session_id, "Session left room");
        }
        removed
    }

    /// Hand `frame` to every session in `room` at the time of the call.
    ///
    /// Delivery never waits: a member whose queue is full misses this frame
    /// and a member that has gone away is pruned. Neither affects the
    /// others. Returns the number of members that accepted the frame.
    pub async fn publish(&self, room: &str, frame: Frame) -> usize {
        let members: Vec<(Uuid, mpsc::WeakSender<Frame>)> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0usize;
        let mut gone = Vec::new();
        for (session_id, outbox) in members {
            match deliver(&outbox, Arc::clone(&frame)) {
                Delivery::Delivered => delivered += 1,
                Delivery::Full => {
                    counter!("claims_broadcast_failures_total", "reason" => "full").increment(1);
                    warn!(room, %session_id, "Session queue full; skipped broadcast");
                }
                Delivery::Gone => {
                    counter!("claims_broadcast_failures_total", "reason" => "gone").increment(1);
                    gone.push(session_id);
                }
            }
        }

        if !gone.is_empty() {
            self.prune(room, &gone).await;
        }

        counter!("claims_broadcast_deliveries_total").increment(delivered as u64);
        debug!(room, delivered, pruned = gone.len(), "Room broadcast complete");
        delivered
    }

    /// Drop members whose session no longer exists and rooms left empty.
    /// Returns the number of members removed.
    pub async fn sweep(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let mut removed = 0;
        rooms.retain(|_, members| {
            let before = members.len();
            members.retain(|_, outbox| is_live(outbox));
            removed += before - members.len();
            !members.is_empty()
        });
        if removed > 0 {
            self.count_removed(removed);
        }
        removed
    }

    /// Run [`Self::sweep`] every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = registry.sweep().await;
                        if removed > 0 {
                            info!(name: "rooms.swept", removed, "Evicted stale sessions");
                        }
                    }
                }
            }
        })
    }

    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms.read().await.get(room).map_or(0, HashMap::len)
    }

    pub async fn is_member(&self, room: &str, session_id: Uuid) -> bool {
        self.rooms
            .read()
            .await
            .get(room)
            .is_some_and(|m| m.contains_key(&session_id))
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    async fn prune(&self, room: &str, gone: &[Uuid]) {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return;
        };
        let mut removed = 0;
        for session_id in gone {
            // A session may have rejoined under the same id since the snapshot.
            if members.get(session_id).is_some_and(|outbox| !is_live(outbox)) {
                members.remove(session_id);
                removed += 1;
            }
        }
        if members.is_empty() {
            rooms.remove(room);
        }
        if removed > 0 {
            self.count_removed(removed);
        }
    }

    // Both counters run under the write lock.
    fn count_joined(&self) {
        let total = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!("claims_sessions_connected").set(total as f64);
    }

    fn count_removed(&self, removed: usize) {
        let total = self
            .sessions
            .fetch_sub(removed, Ordering::Relaxed)
            .saturating_sub(removed);
        gauge!("claims_sessions_connected").set(total as f64);
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

#[async_trait]
impl RoomBus for RoomRegistry {
    async fn publish(&self, room: &str, frame: Frame) -> Result<usize, RegistryError> {
        Ok(RoomRegistry::publish(self, room, frame).await)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

fn is_live(outbox: &mpsc::WeakSender<Frame>) -> bool {
    outbox.upgrade().is_some_and(|tx| !tx.is_closed())
}

fn deliver(outbox: &mpsc::WeakSender<Frame>, frame: Frame) -> Delivery {
    let Some(outbox) = outbox.upgrade() else {
        return Delivery::Gone;
    };
    match outbox.try_send(frame) {
        Ok(()) => Delivery::Delivered,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Gone,
    }
}

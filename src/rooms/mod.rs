//! Per-customer rooms and fan-out.
//!
//! Every connected session joins exactly one room, `claims_<customer_id>`.
//! Publishing to a room hands the same serialized frame to each member's own
//! outbound queue; the session task does the socket write.
//!
//! # Deployment
//!
//! [`RoomRegistry`] only knows the sessions connected to this process, so on
//! its own it is correct for a single-instance deployment. When several
//! instances serve the same customers, publish through [`RedisRoomBus`]
//! instead: it forwards every publish over Redis pub/sub and a relay task in
//! each instance delivers it to that instance's local members.

pub mod redis_bus;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;

pub use redis_bus::RedisRoomBus;
pub use registry::{RegistryLimits, RoomRegistry};

/// A serialized outbound message, shared by every member it is sent to.
pub type Frame = Arc<str>;

const ROOM_PREFIX: &str = "claims_";

/// Room a customer's sessions join.
pub fn room_name(customer_id: &str) -> String {
    format!("{ROOM_PREFIX}{customer_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("room {room} is full ({limit} sessions)")]
    RoomFull { room: String, limit: usize },

    #[error("session limit reached ({limit} sessions)")]
    Capacity { limit: usize },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("failed to encode bus message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where room publishes go.
///
/// The registry itself is the in-process bus; [`RedisRoomBus`] spreads
/// publishes across instances.
#[async_trait]
pub trait RoomBus: Send + Sync + std::fmt::Debug {
    /// Publish `frame` to every member of `room`. Returns how many receivers
    /// took it: local members for the in-process bus, subscribed instances
    /// for Redis.
    async fn publish(&self, room: &str, frame: Frame) -> Result<usize, RegistryError>;

    /// Short backend name for logs and status output.
    fn backend(&self) -> &'static str;
}

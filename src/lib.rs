//! Real-time claim notifications for the customer portal.
//!
//! Customers hold a WebSocket open while they look at their claims. Each
//! socket joins a per-customer room, receives a snapshot of the customer's
//! claims on connect, and gets a fresh snapshot pushed whenever one of those
//! claims is created or changes status.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP + WebSocket endpoints
//! - **Rooms**: per-customer membership with weak session handles, fanned
//!   out in-process or across instances over Redis pub/sub
//! - **Snapshots**: read-through queries against the portal's claims tables
//! - **Bridge**: non-blocking change notifications from writers
//!
//! # Modules
//!
//! - [`claims`]: claim records and the socket message envelopes
//! - [`store`]: claim storage backends
//! - [`snapshot`]: per-customer claim snapshots
//! - [`rooms`]: room registry and cross-instance bus
//! - [`session`]: per-connection protocol and socket task
//! - [`bridge`]: mutation notifications

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod bridge;
pub mod claims;
pub mod config;
pub mod rooms;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod telemetry;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use crate::bridge::MutationBridge;
use crate::config::AppConfig;
use crate::rooms::{RoomBus, RoomRegistry};
use crate::snapshot::SnapshotBuilder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sessions connected to this instance, by room.
    pub registry: Arc<RoomRegistry>,
    /// Where room broadcasts are published. The registry itself for a single
    /// instance, Redis when several instances share the load.
    pub bus: Arc<dyn RoomBus>,
    pub snapshots: SnapshotBuilder,
    /// Change notifications from writers.
    pub bridge: MutationBridge,
    /// Global Configuration
    pub config: Arc<AppConfig>,
    /// Prometheus exporter; `None` when no recorder is installed (tests).
    pub metrics: Option<PrometheusHandle>,
    /// Cancelled on shutdown; open sockets close with 1001 when it fires.
    pub shutdown: CancellationToken,
}

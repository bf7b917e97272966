//! Claims sessions: one per connected customer socket.
//!
//! # Architecture
//!
//! - [`SessionHandler`]: room membership and the request/reply protocol,
//!   independent of the transport
//! - [`socket`]: the axum WebSocket endpoint and the per-connection task that
//!   multiplexes client frames, room broadcasts and heartbeats
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use claims_realtime::rooms::RoomRegistry;
//! use claims_realtime::session::SessionHandler;
//! use claims_realtime::snapshot::SnapshotBuilder;
//! use claims_realtime::store::InMemoryClaimStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let registry = Arc::new(RoomRegistry::default());
//! let snapshots = SnapshotBuilder::new(Arc::new(InMemoryClaimStore::new()));
//!
//! let (session, _inbox) = SessionHandler::connect("42", registry.clone(), snapshots, 16)
//!     .await
//!     .unwrap();
//! assert_eq!(session.room(), "claims_42");
//!
//! let pong = session.on_message(r#"{"action":"ping","timestamp":1}"#).await;
//! assert_eq!(pong.as_deref(), Some(r#"{"type":"pong","timestamp":1}"#));
//! # }
//! ```

mod handler;
pub mod socket;

pub use handler::SessionHandler;
pub use socket::{SocketTiming, claims_socket};

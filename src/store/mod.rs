//! Read access to the portal's claims.
//!
//! The CRUD side of the portal owns the claims tables and performs every
//! write. This crate only needs one query, so the seam is a single trait with
//! a Postgres implementation for deployments and an in-memory one for tests
//! and local development.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::claims::ClaimRecord;
use crate::config::{StoreConfig, StoreProvider};

pub use memory::InMemoryClaimStore;
pub use postgres::PostgresClaimStore;

/// Errors raised while reading claims.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("claim {id} has an invalid {field}: {reason}")]
    Decode {
        id: i64,
        field: &'static str,
        reason: String,
    },

    #[error("claim {0} not found")]
    NotFound(i64),

    #[error("store not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait ClaimStore: Send + Sync + std::fmt::Debug {
    /// All claims owned by `customer_id`, narrowed to `status` when given,
    /// newest submission first.
    ///
    /// Customer ids that are not numeric own no claims.
    async fn claims_for_customer(
        &self,
        customer_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<ClaimRecord>, StoreError>;
}

/// Customer ids arrive as route segments; the portal keys customers by integer.
pub fn parse_customer_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

/// Build the store selected by configuration.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn ClaimStore>, StoreError> {
    match config.provider {
        StoreProvider::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                StoreError::NotConfigured("store.database_url is required for postgres".into())
            })?;
            let store = PostgresClaimStore::connect(url, config.max_connections).await?;
            info!(
                name: "store.connected",
                provider = "postgres",
                max_connections = config.max_connections,
                "Claims store connected"
            );
            Ok(Arc::new(store))
        }
        StoreProvider::Memory => {
            warn!(
                name: "store.connected",
                provider = "memory",
                "Using in-memory claims store; snapshots will not reflect the portal database"
            );
            Ok(Arc::new(InMemoryClaimStore::new()))
        }
    }
}

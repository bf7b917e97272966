//! Fresh claim snapshots for a customer.

use std::sync::Arc;

use tracing::instrument;

use crate::claims::envelope::OutboundMessage;
use crate::claims::{ClaimRecord, sort_newest_first};
use crate::store::{ClaimStore, StoreError};

/// Reads a customer's claims on demand. Nothing is cached: every call goes
/// back to the store.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn ClaimStore>,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn ClaimStore>) -> Self {
        Self { store }
    }

    /// Claims owned by `customer_id`, newest first, optionally narrowed to a
    /// status. An empty status counts as no filter.
    #[instrument(skip(self), level = "debug")]
    pub async fn build(
        &self,
        customer_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<ClaimRecord>, StoreError> {
        let status = status.filter(|s| !s.is_empty());
        let mut claims = self.store.claims_for_customer(customer_id, status).await?;
        // Stores order by submission time already; re-sorting pins the id
        // tie-break regardless of backend.
        sort_newest_first(&mut claims);
        Ok(claims)
    }

    /// [`Self::build`] wrapped as a `claims_update` envelope.
    pub async fn claims_update(
        &self,
        customer_id: &str,
        status: Option<&str>,
    ) -> Result<OutboundMessage, StoreError> {
        self.build(customer_id, status)
            .await
            .map(OutboundMessage::claims_update)
    }
}

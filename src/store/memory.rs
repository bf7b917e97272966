//! In-process claims store.
//!
//! Stands in for the portal database in tests and local runs. The write
//! methods mirror what the portal does on create and on a status transition,
//! so callers can drive the same mutate-then-notify sequence end to end.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ClaimStore, StoreError, parse_customer_id};
use crate::claims::{ClaimRecord, ClaimStatus, sort_newest_first};

#[derive(Debug, Clone, Default)]
pub struct InMemoryClaimStore {
    claims: Arc<RwLock<BTreeMap<i64, ClaimRecord>>>,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing claims.
    pub fn with_claims(claims: impl IntoIterator<Item = ClaimRecord>) -> Self {
        let map = claims.into_iter().map(|c| (c.id, c)).collect();
        Self {
            claims: Arc::new(RwLock::new(map)),
        }
    }

    /// Insert or replace a claim.
    pub async fn insert(&self, claim: ClaimRecord) {
        self.claims.write().await.insert(claim.id, claim);
    }

    /// Apply a status transition the way the portal's `update_status` does:
    /// set the status, overwrite the approved amount and remarks when given,
    /// and stamp `processed_at`.
    pub async fn update_status(
        &self,
        id: i64,
        status: ClaimStatus,
        approved_amount: Option<String>,
        remarks: Option<String>,
    ) -> Result<ClaimRecord, StoreError> {
        let mut claims = self.claims.write().await;
        let claim = claims.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let now = Utc::now();
        claim.status = status;
        if approved_amount.is_some() {
            claim.approved_amount = approved_amount;
        }
        if let Some(remarks) = remarks.filter(|r| !r.is_empty()) {
            claim.remarks = Some(remarks);
        }
        claim.processed_at = Some(now);
        claim.updated_at = now;

        Ok(claim.clone())
    }

    pub async fn get(&self, id: i64) -> Option<ClaimRecord> {
        self.claims.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn claims_for_customer(
        &self,
        customer_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<ClaimRecord>, StoreError> {
        let Some(customer) = parse_customer_id(customer_id) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<ClaimRecord> = self
            .claims
            .read()
            .await
            .values()
            .filter(|c| c.customer == customer)
            .filter(|c| status.is_none_or(|s| c.status.as_str() == s))
            .cloned()
            .collect();

        sort_newest_first(&mut matching);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::fixtures::claim;

    fn seeded() -> InMemoryClaimStore {
        let mut approved = claim(3, 42, 10);
        approved.status = ClaimStatus::Approved;
        InMemoryClaimStore::with_claims([claim(1, 42, 0), claim(2, 7, 5), approved])
    }

    #[tokio::test]
    async fn returns_only_the_customers_claims_newest_first() {
        let store = seeded();
        let claims = store.claims_for_customer("42", None).await.unwrap();
        let ids: Vec<i64> = claims.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(claims.iter().all(|c| c.customer == 42));
    }

    #[tokio::test]
    async fn status_filter_is_literal_equality() {
        let store = seeded();
        let approved = store
            .claims_for_customer("42", Some("approved"))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);
        assert_eq!(approved[0].id, 3);

        let bogus = store
            .claims_for_customer("42", Some("Approved"))
            .await
            .unwrap();
        assert!(bogus.is_empty());
    }

    #[tokio::test]
    async fn unknown_or_non_numeric_customer_has_no_claims() {
        let store = seeded();
        assert!(store.claims_for_customer("999", None).await.unwrap().is_empty());
        assert!(store.claims_for_customer("abc", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_status_stamps_processing_fields() {
        let store = seeded();
        let updated = store
            .update_status(1, ClaimStatus::Approved, Some("1200.00".into()), Some(String::new()))
            .await
            .unwrap();

        assert_eq!(updated.status, ClaimStatus::Approved);
        assert_eq!(updated.approved_amount.as_deref(), Some("1200.00"));
        assert_eq!(updated.remarks, None);
        assert!(updated.processed_at.is_some());
        assert_eq!(store.get(1).await, Some(updated));
    }

    #[tokio::test]
    async fn update_status_on_missing_claim_fails() {
        let store = InMemoryClaimStore::new();
        let err = store
            .update_status(5, ClaimStatus::Paid, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(5)));
        assert_eq!(store.get(5).await, None);
    }
}

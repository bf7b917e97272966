#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use claims_realtime::AppState;
use claims_realtime::claims::{ClaimRecord, ClaimStatus, ClaimType};
use claims_realtime::config::AppConfig;
use claims_realtime::server::build_state;
use claims_realtime::store::InMemoryClaimStore;
use tokio_util::sync::CancellationToken;

/// A pending motor claim for `customer`, submitted `minute` minutes past noon.
pub fn claim(id: i64, customer: i64, minute: u32) -> ClaimRecord {
    let submitted_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap();
    ClaimRecord {
        id,
        customer,
        customer_policy: 3,
        claim_type: ClaimType::Motor,
        incident_date: NaiveDate::from_ymd_opt(2024, 4, 28).unwrap(),
        claim_amount: "1500.00".to_string(),
        approved_amount: None,
        incident_location: Some("Pune".to_string()),
        description: "Rear bumper damage".to_string(),
        status: ClaimStatus::Pending,
        submitted_at,
        updated_at: submitted_at,
        processed_at: None,
        remarks: None,
        supporting_documents: Vec::new(),
        customer_name: "Asha Rao".to_string(),
        customer_email: "asha@example.com".to_string(),
        policy_name: "Drive Secure".to_string(),
        insurance_company: "Acme Mutual".to_string(),
        insurance_type: "Motor".to_string(),
    }
}

/// Defaults with the in-memory store and registry.
pub fn test_config() -> AppConfig {
    AppConfig::load_from_args([
        "claims-realtime",
        "--store-provider",
        "memory",
        "--registry-backend",
        "memory",
    ])
    .unwrap()
}

pub async fn test_state(store: InMemoryClaimStore, config: AppConfig) -> (AppState, CancellationToken) {
    let shutdown = CancellationToken::new();
    let state = build_state(Arc::new(config), Arc::new(store), None, &shutdown)
        .await
        .unwrap();
    (state, shutdown)
}

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{ClaimStore, StoreError, parse_customer_id};
use crate::claims::{ClaimRecord, ClaimStatus, ClaimType};

// Tables belong to the portal; ids are widened to bigint and decimals read
// as text so the row shape does not depend on how the portal declared them.
const CUSTOMER_CLAIMS_QUERY: &str = r#"
    SELECT
        c.id::bigint                  AS id,
        c.customer_id::bigint         AS customer_id,
        c.customer_policy_id::bigint  AS customer_policy_id,
        c.claim_type,
        c.incident_date,
        c.claim_amount::text          AS claim_amount,
        c.approved_amount::text       AS approved_amount,
        c.incident_location,
        c.description,
        c.status,
        c.submitted_at,
        c.updated_at,
        c.processed_at,
        c.remarks,
        c.supporting_documents::jsonb AS supporting_documents,
        cu.name                       AS customer_name,
        cu.email                      AS customer_email,
        p.policy_name,
        ic.name                       AS insurance_company,
        it.name                       AS insurance_type
    FROM claims_claim c
    JOIN customer_customer cu ON cu.id = c.customer_id
    JOIN customerpolicy_customerpolicy cp ON cp.id = c.customer_policy_id
    JOIN policy_policy p ON p.id = cp.policy_id
    JOIN insurancecompany_insurancecompany ic ON ic.id = p.insurance_company_id
    JOIN insurancetype_insurancetype it ON it.id = p.insurance_type_id
    WHERE c.customer_id = $1
      AND ($2::text IS NULL OR c.status = $2)
    ORDER BY c.submitted_at DESC, c.id DESC
"#;

#[derive(Debug, Clone)]
pub struct PostgresClaimStore {
    pool: PgPool,
}

impl PostgresClaimStore {
    pub async fn connect(connection_string: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClaimStore for PostgresClaimStore {
    async fn claims_for_customer(
        &self,
        customer_id: &str,
        status: Option<&str>,
    ) -> Result<Vec<ClaimRecord>, StoreError> {
        let Some(customer) = parse_customer_id(customer_id) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(CUSTOMER_CLAIMS_QUERY)
            .bind(customer)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(claim_from_row).collect()
    }
}

fn claim_from_row(row: &PgRow) -> Result<ClaimRecord, StoreError> {
    let id: i64 = row.try_get("id")?;

    let claim_type: String = row.try_get("claim_type")?;
    let claim_type = claim_type
        .parse::<ClaimType>()
        .map_err(|e| StoreError::Decode {
            id,
            field: "claim_type",
            reason: e.to_string(),
        })?;

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<ClaimStatus>()
        .map_err(|e| StoreError::Decode {
            id,
            field: "status",
            reason: e.to_string(),
        })?;

    let documents: Option<serde_json::Value> = row.try_get("supporting_documents")?;
    let supporting_documents = match documents {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value).map_err(|e| StoreError::Decode {
            id,
            field: "supporting_documents",
            reason: e.to_string(),
        })?,
    };

    let incident_date: NaiveDate = row.try_get("incident_date")?;
    let submitted_at: DateTime<Utc> = row.try_get("submitted_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    let processed_at: Option<DateTime<Utc>> = row.try_get("processed_at")?;

    Ok(ClaimRecord {
        id,
        customer: row.try_get("customer_id")?,
        customer_policy: row.try_get("customer_policy_id")?,
        claim_type,
        incident_date,
        claim_amount: row.try_get("claim_amount")?,
        approved_amount: row.try_get("approved_amount")?,
        incident_location: row.try_get("incident_location")?,
        description: row.try_get("description")?,
        status,
        submitted_at,
        updated_at,
        processed_at,
        remarks: row.try_get("remarks")?,
        supporting_documents,
        customer_name: row.try_get("customer_name")?,
        customer_email: row.try_get("customer_email")?,
        policy_name: row.try_get("policy_name")?,
        insurance_company: row.try_get("insurance_company")?,
        insurance_type: row.try_get("insurance_type")?,
    })
}

//! Claim records as pushed to connected customers.
//!
//! The portal database owns these rows; this crate only reads them and
//! serializes them in the shape the customer frontend renders.
//!
//! - [`ClaimRecord`]: one claim with its denormalized display fields
//! - [`envelope`]: the tagged messages exchanged over a claims socket

pub mod envelope;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Kind of insurance the claim is filed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimType {
    Health,
    Life,
    Motor,
    Home,
    Travel,
    Property,
    Business,
    Other,
}

impl ClaimType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Health => "health",
            Self::Life => "life",
            Self::Motor => "motor",
            Self::Home => "home",
            Self::Travel => "travel",
            Self::Property => "property",
            Self::Business => "business",
            Self::Other => "other",
        }
    }
}

impl FromStr for ClaimType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "health" => Ok(Self::Health),
            "life" => Ok(Self::Life),
            "motor" => Ok(Self::Motor),
            "home" => Ok(Self::Home),
            "travel" => Ok(Self::Travel),
            "property" => Ok(Self::Property),
            "business" => Ok(Self::Business),
            "other" => Ok(Self::Other),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of a claim.
///
/// Outbound records always carry one of these values. Inbound status filters
/// are matched as plain strings against [`ClaimStatus::as_str`], so a value
/// outside this set simply matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Paid,
    Closed,
}

impl ClaimStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::UnderReview,
        Self::Approved,
        Self::Rejected,
        Self::Paid,
        Self::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
            Self::Closed => "closed",
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_string()))
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string that names no known claim type or status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

/// One claim as the customer sees it.
///
/// Amounts are kept in the portal's fixed-point string form (`"1500.00"`)
/// rather than converted to floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: i64,
    /// Owning customer id.
    pub customer: i64,
    pub customer_policy: i64,
    pub claim_type: ClaimType,
    pub incident_date: NaiveDate,
    pub claim_amount: String,
    #[serde(default)]
    pub approved_amount: Option<String>,
    #[serde(default)]
    pub incident_location: Option<String>,
    pub description: String,
    pub status: ClaimStatus,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remarks: Option<String>,
    /// Stored file paths of uploaded documents.
    #[serde(default)]
    pub supporting_documents: Vec<String>,
    pub customer_name: String,
    pub customer_email: String,
    pub policy_name: String,
    pub insurance_company: String,
    pub insurance_type: String,
}

/// Sort claims newest first; equal submission times fall back to the
/// higher id first so the order is total.
pub fn sort_newest_first(claims: &mut [ClaimRecord]) {
    claims.sort_by(|a, b| {
        b.submitted_at
            .cmp(&a.submitted_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

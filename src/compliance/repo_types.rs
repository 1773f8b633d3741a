use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

impl ComplianceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }

    pub(crate) fn from_column(value: &str) -> Result<Self, StoreError> {
        match value {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            other => Err(StoreError::InvalidColumn {
                column: "compliance_results.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of evaluating one policy against one user. Never updated once
/// written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceResult {
    pub id: i64,
    pub user_id: i64,
    pub policy_id: i64,
    pub status: ComplianceStatus,
    pub details: Option<Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub(crate) struct ComplianceResultRow {
    pub id: i64,
    pub user_id: i64,
    pub policy_id: i64,
    pub status: String,
    pub details: Option<Json<Value>>,
    pub checked_at: OffsetDateTime,
}

impl TryFrom<ComplianceResultRow> for ComplianceResult {
    type Error = StoreError;

    fn try_from(r: ComplianceResultRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            policy_id: r.policy_id,
            status: ComplianceStatus::from_column(&r.status)?,
            details: r.details.map(|d| d.0),
            checked_at: r.checked_at,
        })
    }
}

/// Input for `ComplianceResult::record`; `checked_at` is assigned on insert.
#[derive(Debug, Clone)]
pub struct NewComplianceResult {
    pub user_id: i64,
    pub policy_id: i64,
    pub status: ComplianceStatus,
    pub details: Option<Value>,
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{types::Json, FromRow};

use crate::error::StoreError;

const MAX_NAME_LEN: usize = 150;

/// A named rule set. `criteria` is opaque here; the evaluator interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub criteria: Value,
}

#[derive(Debug, FromRow)]
pub(crate) struct PolicyRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub criteria: Json<Value>,
}

impl From<PolicyRow> for Policy {
    fn from(r: PolicyRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            description: r.description,
            criteria: r.criteria.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPolicy {
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) criteria: Value,
}

impl NewPolicy {
    /// `criteria` must be a JSON object; use `json!({})` for an empty rule set.
    pub fn new(name: &str, description: Option<String>, criteria: Value) -> Result<Self, StoreError> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::validation("name", "must not be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(StoreError::validation(
                "name",
                format!("longer than {MAX_NAME_LEN} characters"),
            ));
        }
        if !criteria.is_object() {
            return Err(StoreError::validation("criteria", "must be a JSON object"));
        }
        Ok(Self {
            name,
            description,
            criteria,
        })
    }
}

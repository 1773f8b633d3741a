//! Table definitions for users, policies and compliance results.
//!
//! The DDL is generated per backend: column types differ between SQLite and
//! PostgreSQL, the tables and constraints do not.

use tracing::{info, instrument};

use crate::config::DatabaseBackend;
use crate::db::{with_conn, Database};
use crate::error::StoreError;

/// Dialect-specific column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnTypes {
    pub id: &'static str,
    pub timestamp: &'static str,
    pub json: &'static str,
    /// Plain-text JSON columns get a `json_valid` check.
    pub check_json: bool,
}

impl ColumnTypes {
    pub fn for_backend(backend: DatabaseBackend) -> Self {
        let native_json = backend.supports_native_json();
        let (id, timestamp) = match backend {
            DatabaseBackend::Sqlite => ("INTEGER PRIMARY KEY AUTOINCREMENT", "TEXT"),
            DatabaseBackend::Postgres => ("BIGINT GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY", "TIMESTAMPTZ"),
        };
        Self {
            id,
            timestamp,
            json: if native_json { "JSONB" } else { "TEXT" },
            check_json: !native_json,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Schema {
    types: ColumnTypes,
}

impl Schema {
    pub const TABLES: [&'static str; 3] = ["users", "policies", "compliance_results"];

    pub fn for_backend(backend: DatabaseBackend) -> Self {
        Self {
            types: ColumnTypes::for_backend(backend),
        }
    }

    pub fn column_types(&self) -> ColumnTypes {
        self.types
    }

    /// Idempotent DDL, in dependency order.
    pub fn statements(&self) -> Vec<String> {
        let ColumnTypes {
            id,
            timestamp,
            json,
            check_json,
        } = self.types;
        let criteria_check = if check_json { " CHECK (json_valid(criteria))" } else { "" };
        let details_check = if check_json {
            " CHECK (details IS NULL OR json_valid(details))"
        } else {
            ""
        };

        vec![
            format!(
                r#"CREATE TABLE IF NOT EXISTS users (
    id {id},
    username VARCHAR(150) NOT NULL UNIQUE,
    email VARCHAR(255) NOT NULL UNIQUE,
    hashed_password VARCHAR(255) NOT NULL,
    role VARCHAR(16) NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
    created_at {timestamp} NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS policies (
    id {id},
    name VARCHAR(150) NOT NULL UNIQUE,
    description TEXT,
    criteria {json} NOT NULL DEFAULT '{{}}'{criteria_check}
)"#
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS compliance_results (
    id {id},
    user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    policy_id BIGINT NOT NULL REFERENCES policies (id) ON DELETE CASCADE,
    status VARCHAR(4) NOT NULL CHECK (status IN ('PASS', 'FAIL')),
    details {json}{details_check},
    checked_at {timestamp} NOT NULL DEFAULT CURRENT_TIMESTAMP
)"#
            ),
            "CREATE INDEX IF NOT EXISTS ix_compliance_results_user_id ON compliance_results (user_id)"
                .to_string(),
            "CREATE INDEX IF NOT EXISTS ix_compliance_results_policy_id ON compliance_results (policy_id)"
                .to_string(),
        ]
    }
}

/// Creates any missing tables and indexes in a single session.
#[instrument(skip(db), fields(backend = db.backend().as_str()))]
pub async fn ensure_schema(db: &Database) -> Result<(), StoreError> {
    let schema = Schema::for_backend(db.backend());
    let mut session = db.acquire_session().await?;
    for stmt in schema.statements() {
        with_conn!(session, |conn| {
            sqlx::query(&stmt).execute(conn).await?;
        });
    }
    session.commit().await?;
    info!(tables = ?Schema::TABLES, "schema ensured");
    Ok(())
}

use std::sync::Arc;

use anyhow::Context;

use crate::config::AppConfig;
use crate::db::Database;
use crate::schema;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Connects the pool and makes sure every table exists before the
    /// router is built.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let db = Database::connect(&config.database)
            .await
            .context("connect to database")?;
        schema::ensure_schema(&db).await.context("ensure schema")?;
        Ok(Self::from_parts(db, Arc::new(config)))
    }

    pub fn from_parts(db: Database, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }
}

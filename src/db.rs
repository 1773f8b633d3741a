use std::{str::FromStr, time::Duration};

use sqlx::{
    postgres::{PgPool, PgPoolOptions, Postgres},
    sqlite::{Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Transaction,
};
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::error::StoreError;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pool for whichever backend `DATABASE_URL` names.
#[derive(Debug, Clone)]
pub enum Database {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl Database {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        let db = match cfg.backend {
            DatabaseBackend::Sqlite => {
                let (pool, opts) = sqlite_options(cfg)?;
                Self::Sqlite(pool.connect_with(opts).await?)
            }
            DatabaseBackend::Postgres => Self::Postgres(pg_options(cfg).connect(&cfg.url).await?),
        };
        info!(
            backend = cfg.backend.as_str(),
            max_connections = cfg.max_connections,
            "database pool ready"
        );
        Ok(db)
    }

    /// Builds the pool without opening a connection; the first session
    /// acquisition connects.
    pub fn connect_lazy(cfg: &DatabaseConfig) -> Result<Self, StoreError> {
        Ok(match cfg.backend {
            DatabaseBackend::Sqlite => {
                let (pool, opts) = sqlite_options(cfg)?;
                Self::Sqlite(pool.connect_lazy_with(opts))
            }
            DatabaseBackend::Postgres => Self::Postgres(pg_options(cfg).connect_lazy(&cfg.url)?),
        })
    }

    pub fn backend(&self) -> DatabaseBackend {
        match self {
            Self::Sqlite(_) => DatabaseBackend::Sqlite,
            Self::Postgres(_) => DatabaseBackend::Postgres,
        }
    }

    /// Starts a unit of work on its own pooled connection.
    pub async fn acquire_session(&self) -> Result<Session, StoreError> {
        let tx = match self {
            Self::Sqlite(pool) => SessionTx::Sqlite(pool.begin().await.map_err(acquire_failed)?),
            Self::Postgres(pool) => SessionTx::Postgres(pool.begin().await.map_err(acquire_failed)?),
        };
        debug!(backend = self.backend().as_str(), "session acquired");
        Ok(Session { tx: Some(tx) })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        match self {
            Self::Sqlite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            Self::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
        info!("database pool closed");
    }
}

fn acquire_failed(e: sqlx::Error) -> StoreError {
    error!(error = %e, "failed to acquire session");
    e.into()
}

fn sqlite_options(cfg: &DatabaseConfig) -> Result<(SqlitePoolOptions, SqliteConnectOptions), StoreError> {
    let in_memory = cfg.url.contains(":memory:") || cfg.url.contains("mode=memory");
    // Full-mutex connections so the pool can hand them to any runtime thread.
    let opts = SqliteConnectOptions::from_str(&cfg.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT)
        .serialized(true);

    if in_memory {
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .idle_timeout(None)
            .max_lifetime(None);
        Ok((pool, opts))
    } else {
        let pool = SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT);
        Ok((pool, opts.journal_mode(SqliteJournalMode::Wal)))
    }
}

fn pg_options(cfg: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
}

pub enum SessionTx {
    Sqlite(Transaction<'static, Sqlite>),
    Postgres(Transaction<'static, Postgres>),
}

impl SessionTx {
    async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            SessionTx::Sqlite(tx) => tx.rollback().await,
            SessionTx::Postgres(tx) => tx.rollback().await,
        }
    }
}

/// One transaction on one pooled connection, scoped to a single request.
///
/// `commit` or `rollback` end the session explicitly. Dropping a session that
/// is still open spawns its rollback on the current runtime and the
/// connection returns to the pool once that finishes, so early returns and
/// `?` never leak a connection. A failed implicit rollback is logged.
pub struct Session {
    tx: Option<SessionTx>,
}

impl Session {
    pub fn tx_mut(&mut self) -> Result<&mut SessionTx, StoreError> {
        self.tx.as_mut().ok_or(StoreError::SessionClosed)
    }

    pub async fn commit(mut self) -> Result<(), StoreError> {
        let res = match self.tx.take().ok_or(StoreError::SessionClosed)? {
            SessionTx::Sqlite(tx) => tx.commit().await,
            SessionTx::Postgres(tx) => tx.commit().await,
        };
        match res {
            Ok(()) => {
                debug!("session committed and released");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "session commit failed; connection released");
                Err(e.into())
            }
        }
    }

    pub async fn rollback(mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::SessionClosed)?;
        match tx.rollback().await {
            Ok(()) => {
                debug!("session rolled back and released");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "session rollback failed; connection released");
                Err(e.into())
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("session dropped while open; rolling back");
                handle.spawn(async move {
                    match tx.rollback().await {
                        Ok(()) => debug!("implicit rollback finished; connection released"),
                        Err(e) => error!(error = %e, "implicit rollback failed; connection released"),
                    }
                });
            }
            // No runtime to run on. sqlx queues the rollback on the
            // connection and runs it before the connection is reused.
            Err(_) => {
                warn!("session dropped outside a runtime; rollback queued");
                drop(tx);
            }
        }
    }
}

/// Runs `$body` against the session's connection, whichever backend it is.
/// `$body` is expanded once per backend, so it must evaluate to the same type
/// in both arms.
macro_rules! with_conn {
    ($session:expr, |$conn:ident| $body:expr) => {
        match $session.tx_mut()? {
            $crate::db::SessionTx::Sqlite(tx) => {
                let $conn = &mut **tx;
                $body
            }
            $crate::db::SessionTx::Postgres(tx) => {
                let $conn = &mut **tx;
                $body
            }
        }
    };
}
pub(crate) use with_conn;

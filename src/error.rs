use sqlx::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint violated (duplicate username, email or policy name).
    #[error("already exists: {0}")]
    Conflict(String),
    /// A referenced user or policy does not exist.
    #[error("referenced row does not exist: {0}")]
    ForeignKey(String),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("unexpected value {value:?} in column {column}")]
    InvalidColumn { column: &'static str, value: String },
    #[error("session already closed")]
    SessionClosed,
    #[error(transparent)]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let detail = db
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| db.message().to_string());
            match db.kind() {
                ErrorKind::UniqueViolation => return Self::Conflict(detail),
                ErrorKind::ForeignKeyViolation => return Self::ForeignKey(detail),
                ErrorKind::CheckViolation | ErrorKind::NotNullViolation => {
                    return Self::Constraint(detail)
                }
                _ => {}
            }
        }
        Self::Database(err)
    }
}

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use super::password::HashedPassword;
use crate::error::StoreError;

const MAX_USERNAME_LEN: usize = 150;
const MAX_EMAIL_LEN: usize = 255;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    pub(crate) fn from_column(value: &str) -> Result<Self, StoreError> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(StoreError::InvalidColumn {
                column: "users.role",
                value: other.to_string(),
            }),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: HashedPassword,
    pub role: UserRole,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub hashed_password: String,
    pub role: String,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            username: r.username,
            email: r.email,
            hashed_password: HashedPassword::from_stored(r.hashed_password),
            role: UserRole::from_column(&r.role)?,
            created_at: r.created_at,
        })
    }
}

/// Validated input for `User::create`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) hashed_password: HashedPassword,
    pub(crate) role: UserRole,
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

impl NewUser {
    /// Trims the username and normalizes the email to lowercase.
    pub fn new(username: &str, email: &str, hashed_password: HashedPassword) -> Result<Self, StoreError> {
        let username = username.trim().to_string();
        let email = email.trim().to_lowercase();

        if username.is_empty() {
            return Err(StoreError::validation("username", "must not be empty"));
        }
        if username.chars().count() > MAX_USERNAME_LEN {
            return Err(StoreError::validation(
                "username",
                format!("longer than {MAX_USERNAME_LEN} characters"),
            ));
        }
        if email.chars().count() > MAX_EMAIL_LEN {
            return Err(StoreError::validation(
                "email",
                format!("longer than {MAX_EMAIL_LEN} characters"),
            ));
        }
        if !is_valid_email(&email) {
            return Err(StoreError::validation("email", "not an email address"));
        }

        Ok(Self {
            username,
            email,
            hashed_password,
            role: UserRole::User,
        })
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }
}

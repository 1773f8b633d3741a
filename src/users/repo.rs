use time::OffsetDateTime;
use tracing::{info, instrument};

use super::repo_types::{NewUser, User, UserRow};
use crate::db::{with_conn, Session};
use crate::error::StoreError;

impl User {
    /// Insert a new user. `created_at` is taken from the clock here, never
    /// from the caller.
    #[instrument(skip(session, new), fields(username = %new.username))]
    pub async fn create(session: &mut Session, new: &NewUser) -> Result<User, StoreError> {
        let created_at = OffsetDateTime::now_utc();
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, UserRow>(
                r#"
                INSERT INTO users (username, email, hashed_password, role, created_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, username, email, hashed_password, role, created_at
                "#,
            )
            .bind(new.username.as_str())
            .bind(new.email.as_str())
            .bind(new.hashed_password.as_str())
            .bind(new.role.as_str())
            .bind(created_at)
            .fetch_one(conn)
            .await?
        });
        let user = User::try_from(row)?;
        info!(user_id = user.id, role = user.role.as_str(), "user created");
        Ok(user)
    }

    pub async fn find_by_id(session: &mut Session, id: i64) -> Result<Option<User>, StoreError> {
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, hashed_password, role, created_at
                FROM users
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(conn)
            .await?
        });
        row.map(User::try_from).transpose()
    }

    pub async fn find_by_username(session: &mut Session, username: &str) -> Result<Option<User>, StoreError> {
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, hashed_password, role, created_at
                FROM users
                WHERE username = $1
                "#,
            )
            .bind(username.trim())
            .fetch_optional(conn)
            .await?
        });
        row.map(User::try_from).transpose()
    }

    pub async fn find_by_email(session: &mut Session, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.trim().to_lowercase();
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, hashed_password, role, created_at
                FROM users
                WHERE email = $1
                "#,
            )
            .bind(email.as_str())
            .fetch_optional(conn)
            .await?
        });
        row.map(User::try_from).transpose()
    }

    pub async fn list(session: &mut Session) -> Result<Vec<User>, StoreError> {
        let rows = with_conn!(session, |conn| {
            sqlx::query_as::<_, UserRow>(
                r#"
                SELECT id, username, email, hashed_password, role, created_at
                FROM users
                ORDER BY id
                "#,
            )
            .fetch_all(conn)
            .await?
        });
        rows.into_iter().map(User::try_from).collect()
    }

    /// Delete a user and, through the foreign key, all of their results.
    /// Returns whether a row was removed.
    #[instrument(skip(session))]
    pub async fn delete(session: &mut Session, id: i64) -> Result<bool, StoreError> {
        let affected = with_conn!(session, |conn| {
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(conn)
                .await?
                .rows_affected()
        });
        if affected > 0 {
            info!(user_id = id, "user deleted");
        }
        Ok(affected > 0)
    }
}

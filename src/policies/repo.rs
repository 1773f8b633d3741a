use sqlx::types::Json;
use tracing::{info, instrument};

use super::repo_types::{NewPolicy, Policy, PolicyRow};
use crate::db::{with_conn, Session};
use crate::error::StoreError;

impl Policy {
    #[instrument(skip(session, new), fields(name = %new.name))]
    pub async fn create(session: &mut Session, new: &NewPolicy) -> Result<Policy, StoreError> {
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, PolicyRow>(
                r#"
                INSERT INTO policies (name, description, criteria)
                VALUES ($1, $2, $3)
                RETURNING id, name, description, criteria
                "#,
            )
            .bind(new.name.as_str())
            .bind(new.description.as_deref())
            .bind(Json(&new.criteria))
            .fetch_one(conn)
            .await?
        });
        info!(policy_id = row.id, "policy created");
        Ok(row.into())
    }

    pub async fn find_by_id(session: &mut Session, id: i64) -> Result<Option<Policy>, StoreError> {
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, PolicyRow>(
                r#"
                SELECT id, name, description, criteria
                FROM policies
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(conn)
            .await?
        });
        Ok(row.map(Policy::from))
    }

    pub async fn find_by_name(session: &mut Session, name: &str) -> Result<Option<Policy>, StoreError> {
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, PolicyRow>(
                r#"
                SELECT id, name, description, criteria
                FROM policies
                WHERE name = $1
                "#,
            )
            .bind(name.trim())
            .fetch_optional(conn)
            .await?
        });
        Ok(row.map(Policy::from))
    }

    pub async fn list(session: &mut Session) -> Result<Vec<Policy>, StoreError> {
        let rows = with_conn!(session, |conn| {
            sqlx::query_as::<_, PolicyRow>(
                r#"
                SELECT id, name, description, criteria
                FROM policies
                ORDER BY id
                "#,
            )
            .fetch_all(conn)
            .await?
        });
        Ok(rows.into_iter().map(Policy::from).collect())
    }

    /// Delete a policy together with every result recorded against it.
    #[instrument(skip(session))]
    pub async fn delete(session: &mut Session, id: i64) -> Result<bool, StoreError> {
        let affected = with_conn!(session, |conn| {
            sqlx::query("DELETE FROM policies WHERE id = $1")
                .bind(id)
                .execute(conn)
                .await?
                .rows_affected()
        });
        if affected > 0 {
            info!(policy_id = id, "policy deleted");
        }
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::compliance::{ComplianceResult, ComplianceStatus};
    use crate::db::testing::*;

    #[tokio::test]
    async fn nested_criteria_round_trip() {
        let (_dir, db) = sqlite_db().await;
        let criteria = json!({
            "min_password_length": 12,
            "mfa": { "required": true, "methods": ["totp", "webauthn"] },
            "allowed_regions": [
                { "code": "eu-west", "weight": 0.5 },
                { "code": "us-east", "tags": [] }
            ],
            "notes": null,
            "unicode": "ünïcødé ✓"
        });
        let mut s = db.acquire_session().await.unwrap();
        let new = NewPolicy::new("password-hygiene", Some("Baseline rules".into()), criteria.clone()).unwrap();
        let created = Policy::create(&mut s, &new).await.unwrap();
        assert_eq!(created.criteria, criteria);
        s.commit().await.unwrap();

        let mut s = db.acquire_session().await.unwrap();
        let read = Policy::find_by_id(&mut s, created.id).await.unwrap().expect("policy exists");
        assert_eq!(read.criteria, criteria);
        assert_eq!(read.description.as_deref(), Some("Baseline rules"));
        assert_eq!(read, created);
    }

    #[tokio::test]
    async fn criteria_text_is_stored_as_written() -> Result<(), StoreError> {
        let (_dir, db) = sqlite_db().await;
        let text = r#"{"zeta":1,"alpha":{"y":2,"b":3},"list":[{"k":"v","a":null}]}"#;
        let criteria: serde_json::Value = serde_json::from_str(text).unwrap();

        let mut s = db.acquire_session().await?;
        let created = Policy::create(&mut s, &NewPolicy::new("ordered", None, criteria)?).await?;
        let stored = with_conn!(s, |conn| {
            sqlx::query_scalar::<_, String>("SELECT CAST(criteria AS TEXT) FROM policies WHERE id = $1")
                .bind(created.id)
                .fetch_one(conn)
                .await?
        });
        assert_eq!(stored, text);

        let read = Policy::find_by_id(&mut s, created.id).await?.expect("policy exists");
        assert_eq!(serde_json::to_string(&read.criteria).unwrap(), text);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_and_first_kept() {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await.unwrap();
        let first = seed_policy(&mut s, "mfa").await;
        s.commit().await.unwrap();

        let mut s = db.acquire_session().await.unwrap();
        let dup = NewPolicy::new("mfa", None, json!({ "other": true })).unwrap();
        let err = Policy::create(&mut s, &dup).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
        drop(s);

        let mut s = db.acquire_session().await.unwrap();
        let policies = Policy::list(&mut s).await.unwrap();
        assert_eq!(policies, vec![first]);
    }

    #[test]
    fn new_policy_validates_input() {
        assert!(matches!(
            NewPolicy::new(" ", None, json!({})),
            Err(StoreError::Validation { field: "name", .. })
        ));
        assert!(matches!(
            NewPolicy::new("list", None, json!([1, 2])),
            Err(StoreError::Validation { field: "criteria", .. })
        ));
        assert!(NewPolicy::new("empty", None, json!({})).is_ok());
    }

    #[tokio::test]
    async fn delete_cascades_to_own_results_only() {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await.unwrap();
        let u1 = seed_user(&mut s, "u1").await;
        let u2 = seed_user(&mut s, "u2").await;
        let doomed = seed_policy(&mut s, "doomed").await;
        let other = seed_policy(&mut s, "other").await;

        for user in [&u1, &u2, &u1, &u2] {
            seed_result(&mut s, user.id, doomed.id, ComplianceStatus::Fail).await;
        }
        seed_result(&mut s, u1.id, other.id, ComplianceStatus::Pass).await;
        s.commit().await.unwrap();

        let mut s = db.acquire_session().await.unwrap();
        assert!(Policy::delete(&mut s, doomed.id).await.unwrap());
        s.commit().await.unwrap();

        let mut s = db.acquire_session().await.unwrap();
        assert!(Policy::find_by_id(&mut s, doomed.id).await.unwrap().is_none());
        assert!(ComplianceResult::find_results_by_policy_id(&mut s, doomed.id).await.unwrap().is_empty());
        let remaining = ComplianceResult::find_results_by_policy_id(&mut s, other.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(ComplianceResult::count(&mut s).await.unwrap(), 1);
    }
}

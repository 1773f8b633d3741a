use sqlx::types::Json;
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::repo_types::{ComplianceResult, ComplianceResultRow, NewComplianceResult};
use crate::db::{with_conn, Session};
use crate::error::StoreError;

impl ComplianceResult {
    /// Record an evaluation outcome. Fails with `StoreError::ForeignKey` when
    /// the user or policy does not exist.
    #[instrument(skip(session, new), fields(user_id = new.user_id, policy_id = new.policy_id, status = new.status.as_str()))]
    pub async fn record(session: &mut Session, new: &NewComplianceResult) -> Result<ComplianceResult, StoreError> {
        let checked_at = OffsetDateTime::now_utc();
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, ComplianceResultRow>(
                r#"
                INSERT INTO compliance_results (user_id, policy_id, status, details, checked_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, user_id, policy_id, status, details, checked_at
                "#,
            )
            .bind(new.user_id)
            .bind(new.policy_id)
            .bind(new.status.as_str())
            .bind(new.details.as_ref().map(Json))
            .bind(checked_at)
            .fetch_one(conn)
            .await?
        });
        let result = ComplianceResult::try_from(row)?;
        info!(result_id = result.id, "compliance result recorded");
        Ok(result)
    }

    pub async fn find_by_id(session: &mut Session, id: i64) -> Result<Option<ComplianceResult>, StoreError> {
        let row = with_conn!(session, |conn| {
            sqlx::query_as::<_, ComplianceResultRow>(
                r#"
                SELECT id, user_id, policy_id, status, details, checked_at
                FROM compliance_results
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(conn)
            .await?
        });
        row.map(ComplianceResult::try_from).transpose()
    }

    /// Results for one user, newest first.
    pub async fn find_results_by_user_id(
        session: &mut Session,
        user_id: i64,
    ) -> Result<Vec<ComplianceResult>, StoreError> {
        let rows = with_conn!(session, |conn| {
            sqlx::query_as::<_, ComplianceResultRow>(
                r#"
                SELECT id, user_id, policy_id, status, details, checked_at
                FROM compliance_results
                WHERE user_id = $1
                ORDER BY id DESC
                "#,
            )
            .bind(user_id)
            .fetch_all(conn)
            .await?
        });
        rows.into_iter().map(ComplianceResult::try_from).collect()
    }

    /// Results for one policy, newest first.
    pub async fn find_results_by_policy_id(
        session: &mut Session,
        policy_id: i64,
    ) -> Result<Vec<ComplianceResult>, StoreError> {
        let rows = with_conn!(session, |conn| {
            sqlx::query_as::<_, ComplianceResultRow>(
                r#"
                SELECT id, user_id, policy_id, status, details, checked_at
                FROM compliance_results
                WHERE policy_id = $1
                ORDER BY id DESC
                "#,
            )
            .bind(policy_id)
            .fetch_all(conn)
            .await?
        });
        rows.into_iter().map(ComplianceResult::try_from).collect()
    }

    pub async fn count(session: &mut Session) -> Result<i64, StoreError> {
        let n = with_conn!(session, |conn| {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM compliance_results")
                .fetch_one(conn)
                .await?
        });
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::compliance::ComplianceStatus;
    use crate::db::testing::*;

    #[tokio::test]
    async fn record_and_read_back() {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await.unwrap();
        let user = seed_user(&mut s, "hana").await;
        let policy = seed_policy(&mut s, "screen-lock").await;

        let details = json!({ "checks": [{ "name": "timeout", "ok": false, "value": 900 }] });
        let before = OffsetDateTime::now_utc();
        let new = NewComplianceResult {
            user_id: user.id,
            policy_id: policy.id,
            status: ComplianceStatus::Fail,
            details: Some(details.clone()),
        };
        let recorded = ComplianceResult::record(&mut s, &new).await.unwrap();
        assert_eq!(recorded.status, ComplianceStatus::Fail);
        assert_eq!(recorded.details, Some(details));
        assert!(recorded.checked_at >= before - time::Duration::SECOND);

        let read = ComplianceResult::find_by_id(&mut s, recorded.id).await.unwrap().expect("exists");
        assert_eq!(read, recorded);

        let json = serde_json::to_value(&read).unwrap();
        assert_eq!(json["status"], "FAIL");
    }

    #[tokio::test]
    async fn details_text_keeps_key_order() -> Result<(), StoreError> {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await?;
        let user = seed_user(&mut s, "hugo").await;
        let policy = seed_policy(&mut s, "disk-encryption").await;

        let text = r#"{"volume":"/","encrypted":false,"checked":["luks","fscrypt"]}"#;
        let new = NewComplianceResult {
            user_id: user.id,
            policy_id: policy.id,
            status: ComplianceStatus::Fail,
            details: Some(serde_json::from_str(text).unwrap()),
        };
        let recorded = ComplianceResult::record(&mut s, &new).await?;
        let stored = with_conn!(s, |conn| {
            sqlx::query_scalar::<_, String>("SELECT CAST(details AS TEXT) FROM compliance_results WHERE id = $1")
                .bind(recorded.id)
                .fetch_one(conn)
                .await?
        });
        assert_eq!(stored, text);
        Ok(())
    }

    #[tokio::test]
    async fn details_are_optional() {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await.unwrap();
        let user = seed_user(&mut s, "ivan").await;
        let policy = seed_policy(&mut s, "backups").await;

        let result = seed_result(&mut s, user.id, policy.id, ComplianceStatus::Pass).await;
        let read = ComplianceResult::find_by_id(&mut s, result.id).await.unwrap().unwrap();
        assert_eq!(read.details, None);
        assert_eq!(read.status, ComplianceStatus::Pass);
    }

    #[tokio::test]
    async fn missing_user_or_policy_is_rejected() {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await.unwrap();
        let user = seed_user(&mut s, "judy").await;
        let policy = seed_policy(&mut s, "antivirus").await;

        for (user_id, policy_id) in [(user.id + 1000, policy.id), (user.id, policy.id + 1000)] {
            let new = NewComplianceResult {
                user_id,
                policy_id,
                status: ComplianceStatus::Pass,
                details: None,
            };
            let err = ComplianceResult::record(&mut s, &new).await.unwrap_err();
            assert!(matches!(err, StoreError::ForeignKey(_)), "got {err:?}");
        }
        assert_eq!(ComplianceResult::count(&mut s).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_column_rejects_other_values() -> Result<(), StoreError> {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await?;
        let user = seed_user(&mut s, "kim").await;
        let policy = seed_policy(&mut s, "firewall").await;

        for bad in ["pass", "UNKNOWN", "", "PASSED"] {
            let res: Result<(), StoreError> = async {
                with_conn!(s, |conn| {
                    sqlx::query(
                        "INSERT INTO compliance_results (user_id, policy_id, status, checked_at) VALUES ($1, $2, $3, $4)",
                    )
                    .bind(user.id)
                    .bind(policy.id)
                    .bind(bad)
                    .bind(OffsetDateTime::now_utc())
                    .execute(conn)
                    .await?;
                });
                Ok::<(), StoreError>(())
            }
            .await;
            assert!(matches!(res, Err(StoreError::Constraint(_))), "{bad:?} accepted: {res:?}");
        }
        assert_eq!(ComplianceResult::count(&mut s).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn results_are_listed_per_user_and_policy() {
        let (_dir, db) = sqlite_db().await;
        let mut s = db.acquire_session().await.unwrap();
        let a = seed_user(&mut s, "leo").await;
        let b = seed_user(&mut s, "mia").await;
        let p = seed_policy(&mut s, "patching").await;
        let q = seed_policy(&mut s, "logging").await;

        let first = seed_result(&mut s, a.id, p.id, ComplianceStatus::Fail).await;
        let second = seed_result(&mut s, a.id, p.id, ComplianceStatus::Pass).await;
        seed_result(&mut s, b.id, q.id, ComplianceStatus::Pass).await;

        let for_a = ComplianceResult::find_results_by_user_id(&mut s, a.id).await.unwrap();
        assert_eq!(for_a.iter().map(|r| r.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let for_q = ComplianceResult::find_results_by_policy_id(&mut s, q.id).await.unwrap();
        assert_eq!(for_q.len(), 1);
        assert_eq!(for_q[0].user_id, b.id);
    }
}

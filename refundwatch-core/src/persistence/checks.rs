use async_trait::async_trait;
use chrono::Utc;
use refundwatch_model::{CaseId, CheckId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::persistence::{CheckHistoryFilter, RefundCheckStore};
use crate::types::{NewRefundCheck, RefundCheckRecord};

const CHECK_COLUMNS: &str = "id, case_id, portal, raw_status, details, \
     screenshot_path, mapped_status, previous_status, status_changed, \
     result, triggered_by, triggered_by_user, error_message, created_at";

#[derive(Clone, Debug)]
pub struct PostgresRefundCheckStore {
    pool: PgPool,
}

impl PostgresRefundCheckStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bad_column(
    column: &'static str,
) -> impl Fn(refundwatch_model::ParseEnumError) -> CoreError {
    move |e| CoreError::Internal(format!("bad {column} in database: {e}"))
}

fn check_from_row(row: &PgRow) -> Result<RefundCheckRecord> {
    let read = |msg: &str, e: sqlx::Error| {
        CoreError::Internal(format!("failed to read check {msg}: {e}"))
    };

    let id: Uuid = row.try_get("id").map_err(|e| read("id", e))?;
    let case_id: Uuid =
        row.try_get("case_id").map_err(|e| read("case_id", e))?;
    let portal: String =
        row.try_get("portal").map_err(|e| read("portal", e))?;
    let mapped: Option<String> = row
        .try_get("mapped_status")
        .map_err(|e| read("mapped_status", e))?;
    let previous: Option<String> = row
        .try_get("previous_status")
        .map_err(|e| read("previous_status", e))?;
    let result: String =
        row.try_get("result").map_err(|e| read("result", e))?;
    let triggered_by: String = row
        .try_get("triggered_by")
        .map_err(|e| read("triggered_by", e))?;
    let triggered_by_user: Option<Uuid> = row
        .try_get("triggered_by_user")
        .map_err(|e| read("triggered_by_user", e))?;

    Ok(RefundCheckRecord {
        id: CheckId(id),
        case_id: CaseId(case_id),
        portal: portal.parse().map_err(bad_column("portal"))?,
        raw_status: row
            .try_get("raw_status")
            .map_err(|e| read("raw_status", e))?,
        details: row.try_get("details").map_err(|e| read("details", e))?,
        screenshot_path: row
            .try_get("screenshot_path")
            .map_err(|e| read("screenshot_path", e))?,
        mapped_status: mapped
            .map(|s| s.parse().map_err(bad_column("mapped_status")))
            .transpose()?,
        previous_status: previous
            .map(|s| s.parse().map_err(bad_column("previous_status")))
            .transpose()?,
        status_changed: row
            .try_get("status_changed")
            .map_err(|e| read("status_changed", e))?,
        result: result.parse().map_err(bad_column("result"))?,
        triggered_by: triggered_by
            .parse()
            .map_err(bad_column("triggered_by"))?,
        triggered_by_user: triggered_by_user.map(UserId),
        error_message: row
            .try_get("error_message")
            .map_err(|e| read("error_message", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| read("created_at", e))?,
    })
}

#[async_trait]
impl RefundCheckStore for PostgresRefundCheckStore {
    async fn insert(
        &self,
        check: NewRefundCheck,
    ) -> Result<RefundCheckRecord> {
        let id = CheckId::new();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO refund_checks \
             (id, case_id, portal, raw_status, details, screenshot_path, \
              mapped_status, previous_status, status_changed, result, \
              triggered_by, triggered_by_user, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     $13, $14)",
        )
        .bind(id.as_uuid())
        .bind(check.case_id.as_uuid())
        .bind(check.portal.as_str())
        .bind(&check.raw_status)
        .bind(&check.details)
        .bind(&check.screenshot_path)
        .bind(check.mapped_status.map(|s| s.as_str()))
        .bind(check.previous_status.map(|s| s.as_str()))
        .bind(check.status_changed)
        .bind(check.result.as_str())
        .bind(check.triggered_by.as_str())
        .bind(check.triggered_by_user.map(|u| u.as_uuid()))
        .bind(&check.error_message)
        .bind(created_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!("failed to insert refund check: {e}"))
        })?;

        Ok(RefundCheckRecord {
            id,
            case_id: check.case_id,
            portal: check.portal,
            raw_status: check.raw_status,
            details: check.details,
            screenshot_path: check.screenshot_path,
            mapped_status: check.mapped_status,
            previous_status: check.previous_status,
            status_changed: check.status_changed,
            result: check.result,
            triggered_by: check.triggered_by,
            triggered_by_user: check.triggered_by_user,
            error_message: check.error_message,
            created_at,
        })
    }

    async fn get(&self, id: CheckId) -> Result<Option<RefundCheckRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {CHECK_COLUMNS} FROM refund_checks WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!("failed to load check {id}: {e}"))
        })?;

        row.as_ref().map(check_from_row).transpose()
    }

    async fn history(
        &self,
        filter: CheckHistoryFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RefundCheckRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHECK_COLUMNS} FROM refund_checks \
             WHERE ($1::uuid IS NULL OR case_id = $1) \
               AND ($2::text IS NULL OR portal = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(filter.case_id.map(|c| c.as_uuid()))
        .bind(filter.portal.map(|p| p.as_str()))
        .bind(limit.clamp(1, 500))
        .bind(offset.max(0))
        .fetch_all(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!("failed to load check history: {e}"))
        })?;

        rows.iter().map(check_from_row).collect()
    }

    async fn count(&self, filter: CheckHistoryFilter) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM refund_checks \
             WHERE ($1::uuid IS NULL OR case_id = $1) \
               AND ($2::text IS NULL OR portal = $2)",
        )
        .bind(filter.case_id.map(|c| c.as_uuid()))
        .bind(filter.portal.map(|p| p.as_str()))
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!("failed to count checks: {e}"))
        })?;

        row.try_get("total").map_err(|e| {
            CoreError::Internal(format!("failed to read check count: {e}"))
        })
    }

    async fn resolve_proposal(
        &self,
        id: CheckId,
        status_changed: bool,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE refund_checks SET status_changed = $2 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(status_changed)
        .execute(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!(
                "failed to resolve check proposal: {e}"
            ))
        })?;

        if updated.rows_affected() == 0 {
            return Err(CoreError::CheckNotFound(id.to_string()));
        }
        Ok(())
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refundwatch_model::{CaseId, Portal, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::domain::alarm::AlarmSettings;
use crate::error::{CoreError, Result};
use crate::persistence::{StatusChange, TaxCaseStore};
use crate::types::{TaxCaseSnapshot, TrackState};

const CASE_COLUMNS: &str = "id, owner_id, client_slug, tax_year, \
     payment_method, filing_status, work_state, encrypted_identifier, \
     federal_status, federal_status_changed_at, federal_actual_amount, \
     federal_estimated_amount, state_status, state_status_changed_at, \
     state_actual_amount, state_estimated_amount, federal_alarms_enabled, \
     state_alarms_enabled, federal_in_process_days, state_in_process_days, \
     verification_days";

#[derive(Clone, Debug)]
pub struct PostgresTaxCaseStore {
    pool: PgPool,
}

impl PostgresTaxCaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_status(
    row: &PgRow,
    column: &str,
) -> Result<Option<refundwatch_model::RefundStatus>> {
    let raw: Option<String> = row.try_get(column).map_err(|e| {
        CoreError::Internal(format!("failed to read {column}: {e}"))
    })?;
    raw.map(|s| {
        s.parse().map_err(|e| {
            CoreError::Internal(format!("bad {column} in database: {e}"))
        })
    })
    .transpose()
}

fn case_from_row(row: &PgRow) -> Result<TaxCaseSnapshot> {
    let read = |msg: &str, e: sqlx::Error| {
        CoreError::Internal(format!("failed to read {msg}: {e}"))
    };

    let id: Uuid = row.try_get("id").map_err(|e| read("id", e))?;
    let owner: Uuid =
        row.try_get("owner_id").map_err(|e| read("owner_id", e))?;
    let payment_method: String = row
        .try_get("payment_method")
        .map_err(|e| read("payment_method", e))?;
    let filing_status: String = row
        .try_get("filing_status")
        .map_err(|e| read("filing_status", e))?;

    Ok(TaxCaseSnapshot {
        id: CaseId(id),
        owner: UserId(owner),
        client_slug: row
            .try_get("client_slug")
            .map_err(|e| read("client_slug", e))?,
        tax_year: row.try_get("tax_year").map_err(|e| read("tax_year", e))?,
        payment_method: payment_method.parse().map_err(|e| {
            CoreError::Internal(format!("bad payment_method: {e}"))
        })?,
        filing_status: filing_status.parse().map_err(|e| {
            CoreError::Internal(format!("bad filing_status: {e}"))
        })?,
        work_state: row
            .try_get("work_state")
            .map_err(|e| read("work_state", e))?,
        encrypted_identifier: row
            .try_get("encrypted_identifier")
            .map_err(|e| read("encrypted_identifier", e))?,
        federal: TrackState {
            status: parse_status(row, "federal_status")?,
            status_changed_at: row
                .try_get("federal_status_changed_at")
                .map_err(|e| read("federal_status_changed_at", e))?,
            actual_amount: row
                .try_get("federal_actual_amount")
                .map_err(|e| read("federal_actual_amount", e))?,
            estimated_amount: row
                .try_get("federal_estimated_amount")
                .map_err(|e| read("federal_estimated_amount", e))?,
        },
        state: TrackState {
            status: parse_status(row, "state_status")?,
            status_changed_at: row
                .try_get("state_status_changed_at")
                .map_err(|e| read("state_status_changed_at", e))?,
            actual_amount: row
                .try_get("state_actual_amount")
                .map_err(|e| read("state_actual_amount", e))?,
            estimated_amount: row
                .try_get("state_estimated_amount")
                .map_err(|e| read("state_estimated_amount", e))?,
        },
        alarms: AlarmSettings {
            federal_enabled: row
                .try_get("federal_alarms_enabled")
                .map_err(|e| read("federal_alarms_enabled", e))?,
            state_enabled: row
                .try_get("state_alarms_enabled")
                .map_err(|e| read("state_alarms_enabled", e))?,
            federal_in_process_days: row
                .try_get("federal_in_process_days")
                .map_err(|e| read("federal_in_process_days", e))?,
            state_in_process_days: row
                .try_get("state_in_process_days")
                .map_err(|e| read("state_in_process_days", e))?,
            verification_days: row
                .try_get("verification_days")
                .map_err(|e| read("verification_days", e))?,
        },
    })
}

#[async_trait]
impl TaxCaseStore for PostgresTaxCaseStore {
    async fn eligible_cases(&self) -> Result<Vec<TaxCaseSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM tax_cases \
             WHERE encrypted_identifier IS NOT NULL \
               AND (federal_status IS NULL \
                    OR federal_status NOT IN \
                        ('deposit_in_transit', 'check_in_transit') \
                    OR state_status IS NULL \
                    OR state_status NOT IN \
                        ('deposit_in_transit', 'check_in_transit')) \
             ORDER BY created_at, id"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!("failed to list eligible cases: {e}"))
        })?;

        rows.iter().map(case_from_row).collect()
    }

    async fn get_case(&self, id: CaseId) -> Result<Option<TaxCaseSnapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {CASE_COLUMNS} FROM tax_cases WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| {
            CoreError::Internal(format!("failed to load case {id}: {e}"))
        })?;

        row.as_ref().map(case_from_row).transpose()
    }

    async fn apply_status_change(&self, change: &StatusChange) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let mut tx = self.pool().begin().await.map_err(|e| {
            CoreError::Internal(format!("failed to start transaction: {e}"))
        })?;

        // Column names differ per track; everything else is one code path.
        let update_sql = match change.portal {
            Portal::Federal => {
                "UPDATE tax_cases SET federal_status = $2, \
                 federal_status_changed_at = $3, last_comment = $4, \
                 updated_at = $3 WHERE id = $1"
            }
            Portal::State => {
                "UPDATE tax_cases SET state_status = $2, \
                 state_status_changed_at = $3, last_comment = $4, \
                 updated_at = $3 WHERE id = $1"
            }
        };

        let updated = sqlx::query(update_sql)
            .bind(change.case_id.as_uuid())
            .bind(change.new_status.as_str())
            .bind(now)
            .bind(&change.comment)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                CoreError::Internal(format!(
                    "failed to update case status: {e}"
                ))
            })?;

        if updated.rows_affected() == 0 {
            return Err(CoreError::CaseNotFound(change.case_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO status_history \
             (id, case_id, portal, previous_status, new_status, actor, \
              comment, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::now_v7())
        .bind(change.case_id.as_uuid())
        .bind(change.portal.as_str())
        .bind(change.previous.map(|s| s.as_str()))
        .bind(change.new_status.as_str())
        .bind(&change.actor)
        .bind(&change.comment)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            CoreError::Internal(format!(
                "failed to append status history: {e}"
            ))
        })?;

        tx.commit().await.map_err(|e| {
            CoreError::Internal(format!("failed to commit transaction: {e}"))
        })?;

        info!(
            case = %change.case_id,
            portal = %change.portal,
            status = %change.new_status,
            actor = %change.actor,
            "case status applied"
        );
        Ok(())
    }
}

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use refundwatch_core::infra::storage::ObjectStore;
use refundwatch_core::persistence::CheckHistoryFilter;
use refundwatch_core::types::{BatchSummary, RefundCheckRecord};
use refundwatch_model::{
    CaseId, CheckId, Portal, TriggerSource, UserId,
};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const EXPORT_LIMIT: i64 = 10_000;
const DEFAULT_URL_TTL_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
pub struct ActorBody {
    pub actor: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    #[serde(flatten)]
    pub check: RefundCheckRecord,
    pub applied: bool,
}

fn parse_portal(raw: &str) -> AppResult<Portal> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("unknown portal `{raw}`")))
}

/// Triggers one manual check for one track of a case.
pub async fn run_single_check(
    State(state): State<AppState>,
    Path((case_id, portal)): Path<(Uuid, String)>,
    Json(body): Json<ActorBody>,
) -> AppResult<Json<CheckResponse>> {
    let portal = parse_portal(&portal)?;
    let outcome = state
        .orchestrator
        .run_check(
            CaseId(case_id),
            portal,
            TriggerSource::Manual,
            Some(UserId(body.actor)),
        )
        .await?;

    Ok(Json(CheckResponse {
        check: outcome.check,
        applied: outcome.applied,
    }))
}

/// Triggers a batch run. A run already in flight yields the zero summary.
pub async fn run_batch(
    State(state): State<AppState>,
) -> AppResult<Json<BatchSummary>> {
    let summary = state
        .orchestrator
        .run_all_checks(TriggerSource::Manual)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub case_id: Option<Uuid>,
    pub portal: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl HistoryQuery {
    fn filter(&self) -> AppResult<CheckHistoryFilter> {
        let portal = match &self.portal {
            Some(raw) => Some(parse_portal(raw)?),
            None => None,
        };
        Ok(CheckHistoryFilter {
            case_id: self.case_id.map(CaseId),
            portal,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub items: Vec<RefundCheckRecord>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
}

/// Paginated check history, newest first.
pub async fn check_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<HistoryPage>> {
    let filter = query.filter()?;
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query
        .per_page
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, 200);

    let items = state
        .checks
        .history(filter, per_page, (page - 1) * per_page)
        .await?;
    let total = state.checks.count(filter).await?;

    Ok(Json(HistoryPage {
        items,
        total,
        page,
        per_page,
    }))
}

/// CSV export of the check history (same filters as the paginated view).
pub async fn export_history_csv(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<impl IntoResponse> {
    let filter = query.filter()?;
    let items = state.checks.history(filter, EXPORT_LIMIT, 0).await?;

    let mut csv = String::from(
        "created_at,case_id,portal,result,raw_status,details,\
         mapped_status,previous_status,status_changed,triggered_by,\
         error_message,screenshot_path\n",
    );
    for check in &items {
        let row = [
            check.created_at.to_rfc3339(),
            check.case_id.to_string(),
            check.portal.to_string(),
            check.result.to_string(),
            check.raw_status.clone(),
            check.details.clone(),
            check
                .mapped_status
                .map(|s| s.to_string())
                .unwrap_or_default(),
            check
                .previous_status
                .map(|s| s.to_string())
                .unwrap_or_default(),
            check.status_changed.to_string(),
            check.triggered_by.to_string(),
            check.error_message.clone().unwrap_or_default(),
            check.screenshot_path.clone().unwrap_or_default(),
        ];
        csv.push_str(&row.map(|field| csv_escape(&field)).join(","));
        csv.push('\n');
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"refund-checks.csv\"",
            ),
        ],
        csv,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ScreenshotUrlQuery {
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ScreenshotUrl {
    pub url: String,
    pub expires_in_secs: u64,
}

/// Issues a time-limited URL for a check's stored screenshot.
pub async fn screenshot_url(
    State(state): State<AppState>,
    Path(check_id): Path<Uuid>,
    Query(query): Query<ScreenshotUrlQuery>,
) -> AppResult<Json<ScreenshotUrl>> {
    let check = state
        .checks
        .get(CheckId(check_id))
        .await?
        .ok_or_else(|| AppError::not_found("no such check"))?;
    let path = check.screenshot_path.ok_or_else(|| {
        AppError::not_found("check has no screenshot")
    })?;

    let ttl_secs = query
        .ttl_secs
        .unwrap_or(DEFAULT_URL_TTL_SECS)
        .clamp(30, 3600);
    let url = state
        .storage
        .signed_url(&path, Duration::from_secs(ttl_secs))
        .await?;

    Ok(Json(ScreenshotUrl {
        url,
        expires_in_secs: ttl_secs,
    }))
}

/// Applies a pending state-portal proposal.
pub async fn approve_check(
    State(state): State<AppState>,
    Path(check_id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .approve_check(CheckId(check_id), UserId(body.actor))
        .await?;
    Ok(Json(serde_json::json!({ "approved": true })))
}

/// Dismisses a pending state-portal proposal; the case is untouched.
pub async fn dismiss_check(
    State(state): State<AppState>,
    Path(check_id): Path<Uuid>,
    Json(body): Json<ActorBody>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .orchestrator
        .dismiss_check(CheckId(check_id), UserId(body.actor))
        .await?;
    Ok(Json(serde_json::json!({ "dismissed": true })))
}

/// Quotes a field when it contains separators, quotes, or newlines.
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use refundwatch_core::domain::alarm::{
    Alarm, AlarmSeverity, aggregate_severity, evaluate_case,
};
use refundwatch_model::{CaseId, PaymentMethod, RefundStatus};

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TrackOverview {
    pub status: Option<RefundStatus>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

/// Case list entry for the admin surface. The sealed identifier never
/// leaves the core.
#[derive(Debug, Serialize)]
pub struct CaseOverview {
    pub id: CaseId,
    pub client_slug: String,
    pub tax_year: i32,
    pub payment_method: PaymentMethod,
    pub federal: TrackOverview,
    pub state: TrackOverview,
    pub alarms: Vec<Alarm>,
    pub severity: Option<AlarmSeverity>,
}

/// Lists cases eligible for monitoring, each with its current alarms.
pub async fn list_eligible_cases(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CaseOverview>>> {
    let now = Utc::now();
    let cases = state.cases.eligible_cases().await?;

    let overviews = cases
        .into_iter()
        .map(|case| {
            let alarms = evaluate_case(&case, now);
            CaseOverview {
                id: case.id,
                client_slug: case.client_slug,
                tax_year: case.tax_year,
                payment_method: case.payment_method,
                federal: TrackOverview {
                    status: case.federal.status,
                    status_changed_at: case.federal.status_changed_at,
                },
                state: TrackOverview {
                    status: case.state.status,
                    status_changed_at: case.state.status_changed_at,
                },
                severity: aggregate_severity(&alarms),
                alarms,
            }
        })
        .collect();

    Ok(Json(overviews))
}

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers::{cases, checks, screenshots};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/cases", get(cases::list_eligible_cases))
        .route(
            "/cases/{case_id}/checks/{portal}",
            post(checks::run_single_check),
        )
        .route("/checks/run", post(checks::run_batch))
        .route("/checks", get(checks::check_history))
        .route("/checks/export.csv", get(checks::export_history_csv))
        .route(
            "/checks/{check_id}/screenshot-url",
            get(checks::screenshot_url),
        )
        .route("/checks/{check_id}/approve", post(checks::approve_check))
        .route("/checks/{check_id}/dismiss", post(checks::dismiss_check));

    Router::new()
        .nest("/api/v1", api)
        .route(
            "/screenshots/{*path}",
            get(screenshots::serve_screenshot),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

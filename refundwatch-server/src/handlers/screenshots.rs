use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub sig: String,
}

/// Serves a stored screenshot when the presented signature is valid and
/// unexpired.
pub async fn serve_screenshot(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> AppResult<impl IntoResponse> {
    if !state.storage.verify(&path, query.expires, &query.sig) {
        return Err(AppError::forbidden("invalid or expired link"));
    }

    let resolved = state.storage.resolve(&path)?;
    let bytes = tokio::fs::read(&resolved).await.map_err(|_| {
        AppError::not_found("screenshot no longer available")
    })?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

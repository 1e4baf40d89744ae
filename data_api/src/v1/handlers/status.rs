use crate::state::AppState;
use crate::v1::api_models::{HistoryParams, RecentParams, StatusResponse};
use crate::v1::error::ApiError;
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};

const DEFAULT_RECENT_LIMIT: i64 = 10;

pub async fn get_current_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = state.store.get_current().await?;
    Ok(Json(record.into()))
}

/// Newest first, including the current status.
pub async fn get_recent_statuses(
    State(state): State<AppState>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> Result<Json<Vec<StatusResponse>>, ApiError> {
    let Query(params) = params?;
    let records = state
        .store
        .recent(params.limit.unwrap_or(DEFAULT_RECENT_LIMIT))
        .await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

pub async fn get_status_history(
    State(state): State<AppState>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<StatusResponse>>, ApiError> {
    let Query(params) = params?;
    let records = state.store.between(params.start, params.end).await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}

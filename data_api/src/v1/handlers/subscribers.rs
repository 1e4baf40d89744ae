use crate::state::AppState;
use crate::v1::api_models::{CountResponse, RegisterSubscriber};
use crate::v1::error::ApiError;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use shared::registry::{Channel, Subscriber};
use tracing::info;

pub async fn register_subscriber(
    State(state): State<AppState>,
    body: Result<Json<RegisterSubscriber>, JsonRejection>,
) -> Result<(StatusCode, Json<Subscriber>), ApiError> {
    let Json(body) = body?;
    let token = body.token.trim();
    if token.is_empty() {
        return Err(ApiError::InvalidRequest("token must not be empty".to_string()));
    }

    let subscriber = Subscriber::new(token, body.channel);
    state.registry.insert(&subscriber).await?;
    info!(channel = %subscriber.channel, "registered subscriber");
    Ok((StatusCode::CREATED, Json(subscriber)))
}

pub async fn delete_subscriber(
    State(state): State<AppState>,
    Path((channel, token)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let channel = channel.parse::<Channel>()?;
    state.registry.delete(channel, &token).await?;
    info!(%channel, "removed subscriber");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn count_subscribers(
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.registry.count().await?;
    Ok(Json(CountResponse { count }))
}

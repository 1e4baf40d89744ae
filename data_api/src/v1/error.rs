use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};
use shared::registry::{RegistryError, UnknownChannel};
use shared::store::StoreError;
use thiserror::Error;
use tracing::warn;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    #[serde(serialize_with = "serialize_status")]
    pub status_code: StatusCode,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    UnknownChannel(#[from] UnknownChannel),
    #[error(transparent)]
    Query(#[from] QueryRejection),
    #[error(transparent)]
    Json(#[from] JsonRejection),
    #[error("{0}")]
    InvalidRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Store(StoreError::NotFound) => {
                ErrorMessage::from((StatusCode::NOT_FOUND, "no status has been recorded yet"))
                    .into_response()
            }
            ApiError::Store(e) => {
                warn!(error = ?e, "status store error");
                ErrorMessage::from((StatusCode::INTERNAL_SERVER_ERROR, "")).into_response()
            }
            ApiError::Registry(e @ RegistryError::AlreadyExists { .. }) => {
                ErrorMessage::from((StatusCode::CONFLICT, e.to_string())).into_response()
            }
            ApiError::Registry(e @ RegistryError::NotFound { .. }) => {
                ErrorMessage::from((StatusCode::NOT_FOUND, e.to_string())).into_response()
            }
            ApiError::Registry(e) => {
                warn!(error = ?e, "device registry error");
                ErrorMessage::from((StatusCode::INTERNAL_SERVER_ERROR, "")).into_response()
            }
            ApiError::UnknownChannel(e) => {
                ErrorMessage::from((StatusCode::BAD_REQUEST, e.to_string())).into_response()
            }
            ApiError::Query(e) => {
                ErrorMessage::from((StatusCode::BAD_REQUEST, e.body_text())).into_response()
            }
            ApiError::Json(e) => ErrorMessage::from((e.status(), e.body_text())).into_response(),
            ApiError::InvalidRequest(message) => {
                ErrorMessage::from((StatusCode::BAD_REQUEST, message)).into_response()
            }
        }
    }
}

fn serialize_status<S>(value: &StatusCode, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u16(value.as_u16())
}

impl From<(StatusCode, String)> for ErrorMessage {
    fn from((status_code, message): (StatusCode, String)) -> Self {
        Self {
            status_code,
            message,
        }
    }
}

impl From<(StatusCode, &str)> for ErrorMessage {
    fn from((status_code, message): (StatusCode, &str)) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorMessage {
    fn into_response(self) -> Response {
        (self.status_code, Json(self)).into_response()
    }
}

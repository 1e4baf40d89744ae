use crate::state::AppState;
use crate::v1::handlers::status::{get_current_status, get_recent_statuses, get_status_history};
use crate::v1::handlers::subscribers::{
    count_subscribers, delete_subscriber, register_subscriber,
};
use axum::Router;
use axum::routing::{delete, get, post};

pub fn router() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/status", get(get_current_status))
        .route("/status/recent", get(get_recent_statuses))
        .route("/status/history", get(get_status_history))
        .route("/subscribers", post(register_subscriber))
        .route("/subscribers/count", get(count_subscribers))
        .route("/subscribers/{channel}/{token}", delete(delete_subscriber))
}

use serde::{Deserialize, Serialize};
use shared::prt::StatusRecord;
use shared::registry::Channel;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: i32,
    /// `UP`, `DOWN` or `CLOSED`.
    pub availability: String,
    pub headline: String,
    pub message: String,
    pub timestamp: i64,
    pub stations: Vec<String>,
    pub buses_dispatched: bool,
    pub duration: Option<String>,
}

impl From<StatusRecord> for StatusResponse {
    fn from(record: StatusRecord) -> Self {
        Self {
            status: record.state.code(),
            availability: record.state.availability().to_string(),
            headline: record.headline(),
            message: record.message,
            timestamp: record.timestamp,
            stations: record.stations,
            buses_dispatched: record.buses_dispatched,
            duration: record.duration,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<i64>,
}

/// Unix timestamp bounds, inclusive.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterSubscriber {
    pub token: String,
    pub channel: Channel,
}

#[derive(Serialize)]
pub struct CountResponse {
    pub count: i64,
}

use crate::SourceConfig;
use crate::prt::status::StatusRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Deserialize(#[from] serde_json::Error),
    #[error("invalid {field} value in status payload: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Authoritative source of the current PRT status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetches the status as of `at`. Single attempt, no retries.
    async fn fetch(&self, at: DateTime<Utc>) -> Result<StatusRecord, FetchError>;
}

#[derive(Clone)]
pub struct HttpStatusSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStatusSource {
    pub fn new(config: &SourceConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self::new_with_client(client, config.base_url.clone()))
    }

    pub const fn new_with_client(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// The API keys responses by request time, which doubles as a cache buster.
    fn status_url(&self, at: DateTime<Utc>) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), at.timestamp())
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    #[instrument(skip(self))]
    async fn fetch(&self, at: DateTime<Utc>) -> Result<StatusRecord, FetchError> {
        let body = self
            .client
            .get(self.status_url(at))
            .query(&[("format", "json")])
            .header(CACHE_CONTROL, "max-age=0")
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_status(&body)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    fn as_i64(&self, field: &'static str) -> Result<i64, FetchError> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Text(s) => s.trim().parse().map_err(|_| FetchError::InvalidField {
                field,
                value: s.clone(),
            }),
            Self::Bool(b) => Err(FetchError::InvalidField {
                field,
                value: b.to_string(),
            }),
        }
    }

    // The feed sends "0" when no buses were dispatched and a count or "true" otherwise.
    fn as_flag(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Text(s) => {
                let s = s.trim();
                !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStatus {
    status: Scalar,
    #[serde(default)]
    message: Option<String>,
    timestamp: Scalar,
    #[serde(default)]
    stations: Option<Vec<WireStation>>,
    #[serde(default)]
    busses_dispatched: Option<Scalar>,
    #[serde(default)]
    duration: Option<Value>,
}

#[derive(Deserialize)]
struct WireStation {
    name: String,
}

/// Parses a raw PRT API response body into a [`StatusRecord`], keeping the body.
pub fn parse_status(body: &[u8]) -> Result<StatusRecord, FetchError> {
    let wire: WireStatus = serde_json::from_slice(body)?;

    let code = wire.status.as_i64("status")?;
    let state = i32::try_from(code).map_err(|_| FetchError::InvalidField {
        field: "status",
        value: code.to_string(),
    })?;

    let duration = match wire.duration {
        Some(Value::Array(entries)) => entries
            .first()
            .and_then(|entry| entry.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    };

    Ok(StatusRecord {
        state: state.into(),
        message: wire.message.unwrap_or_default(),
        timestamp: wire.timestamp.as_i64("timestamp")?,
        stations: wire
            .stations
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.name)
            .collect(),
        buses_dispatched: wire.busses_dispatched.is_some_and(|b| b.as_flag()),
        duration,
        raw_payload: body.to_vec(),
    })
}

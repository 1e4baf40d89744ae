//! Delivery channel clients.
//!
//! Two capabilities exist: [`BatchSender`] addresses every registered token and reports
//! one outcome per token, [`NoteSender`] pushes a single note to a whole channel and
//! reports nothing about individual recipients.

pub mod fcm;
pub mod pushbullet;

use crate::error::DispatchError;
use async_trait::async_trait;
use serde::Deserialize;
use shared::prt::StatusRecord;
use std::collections::BTreeMap;

/// Error string a batch provider returns for tokens that are no longer registered.
pub const NOT_REGISTERED: &str = "NotRegistered";

#[async_trait]
pub trait BatchSender: Send + Sync {
    /// Largest token list accepted by a single request.
    fn max_batch_size(&self) -> usize;

    /// Sends `data` to every token. `results[i]` of the response belongs to `tokens[i]`.
    async fn send_batch(
        &self,
        tokens: &[String],
        data: &BTreeMap<String, String>,
    ) -> Result<BatchResponse, DispatchError>;
}

#[async_trait]
pub trait NoteSender: Send + Sync {
    async fn push_note(&self, note: &Note) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchResponse {
    #[serde(default)]
    pub multicast_id: i64,
    #[serde(default, rename = "success")]
    pub success_count: u32,
    #[serde(default, rename = "failure")]
    pub failure_count: u32,
    #[serde(default, rename = "canonical_ids")]
    pub canonical_id_count: u32,
    #[serde(default)]
    pub results: Vec<BatchResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BatchResult {
    pub message_id: Option<String>,
    /// Canonical token replacing the one the message was addressed to.
    pub registration_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenOutcome {
    Delivered,
    Unregistered,
    Canonical(String),
    Failed(String),
}

impl BatchResult {
    pub fn outcome(&self) -> TokenOutcome {
        if self.error.as_deref() == Some(NOT_REGISTERED) {
            return TokenOutcome::Unregistered;
        }
        if let Some(canonical) = self.registration_id.as_deref().filter(|t| !t.is_empty()) {
            return TokenOutcome::Canonical(canonical.to_string());
        }
        match &self.error {
            Some(error) => TokenOutcome::Failed(error.clone()),
            None => TokenOutcome::Delivered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub title: String,
    pub body: String,
}

impl From<&StatusRecord> for Note {
    fn from(record: &StatusRecord) -> Self {
        Self {
            title: record.headline(),
            body: record.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(registration_id: Option<&str>, error: Option<&str>) -> BatchResult {
        BatchResult {
            message_id: None,
            registration_id: registration_id.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn outcomes_follow_result_fields() {
        assert_eq!(result(None, None).outcome(), TokenOutcome::Delivered);
        assert_eq!(
            result(None, Some("NotRegistered")).outcome(),
            TokenOutcome::Unregistered
        );
        assert_eq!(
            result(Some("c2"), None).outcome(),
            TokenOutcome::Canonical("c2".to_string())
        );
        assert_eq!(result(Some(""), None).outcome(), TokenOutcome::Delivered);
        assert_eq!(
            result(None, Some("Unavailable")).outcome(),
            TokenOutcome::Failed("Unavailable".to_string())
        );
    }

    #[test]
    fn invalidity_wins_over_canonical_token() {
        assert_eq!(
            result(Some("c2"), Some("NotRegistered")).outcome(),
            TokenOutcome::Unregistered
        );
    }

    #[test]
    fn parses_provider_response() {
        let response: BatchResponse = serde_json::from_str(
            r#"{
                "multicast_id": 216,
                "success": 2,
                "failure": 1,
                "canonical_ids": 1,
                "results": [
                    {"message_id": "1:0408"},
                    {"error": "NotRegistered"},
                    {"message_id": "1:2342", "registration_id": "c2"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(response.success_count, 2);
        assert_eq!(response.failure_count, 1);
        assert_eq!(response.canonical_id_count, 1);
        assert_eq!(response.results.len(), 3);
        assert_eq!(
            response.results[2].outcome(),
            TokenOutcome::Canonical("c2".to_string())
        );
    }

    #[test]
    fn note_uses_headline_and_message() {
        let record = StatusRecord {
            state: 7.into(),
            message: "Closed for the storm.".to_string(),
            timestamp: 1050,
            stations: Vec::new(),
            buses_dispatched: false,
            duration: None,
            raw_payload: Vec::new(),
        };
        let note = Note::from(&record);
        assert_eq!(note.title, "The PRT is CLOSED");
        assert_eq!(note.body, "Closed for the storm.");
    }
}

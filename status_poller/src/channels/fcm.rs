use crate::channels::{BatchResponse, BatchSender};
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use shared::FcmConfig;
use shared::registry::Channel;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

#[derive(Serialize)]
struct MulticastRequest<'a> {
    registration_ids: &'a [String],
    data: &'a BTreeMap<String, String>,
}

/// Firebase Cloud Messaging client for the legacy multicast HTTP API.
#[derive(Clone)]
pub struct FcmClient {
    client: Client,
    endpoint: String,
    server_key: String,
    max_batch_size: usize,
}

impl FcmClient {
    pub fn new(config: &FcmConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            server_key: config.server_key.clone(),
            max_batch_size: config.max_batch_size.max(1),
        })
    }
}

#[async_trait]
impl BatchSender for FcmClient {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[instrument(skip_all, fields(tokens = tokens.len()))]
    async fn send_batch(
        &self,
        tokens: &[String],
        data: &BTreeMap<String, String>,
    ) -> Result<BatchResponse, DispatchError> {
        let transport = |source| DispatchError::Transport {
            channel: Channel::NativePush,
            source,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("key={}", self.server_key))
            .json(&MulticastRequest {
                registration_ids: tokens,
                data,
            })
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                channel: Channel::NativePush,
                status: status.as_u16(),
                body,
            });
        }

        let response = resp.json::<BatchResponse>().await.map_err(transport)?;
        debug!(
            multicast_id = response.multicast_id,
            success = response.success_count,
            failure = response.failure_count,
            canonical_ids = response.canonical_id_count,
            "fcm multicast accepted"
        );
        Ok(response)
    }
}

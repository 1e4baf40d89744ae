use crate::channels::{Note, NoteSender};
use crate::error::DispatchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use shared::PushbulletConfig;
use shared::registry::Channel;
use tracing::{debug, instrument};

const ACCESS_TOKEN_HEADER: &str = "Access-Token";

#[derive(Serialize)]
struct PushRequest<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    channel_tag: &'a str,
}

/// Pushes notes to every subscriber of a Pushbullet channel.
#[derive(Clone)]
pub struct PushbulletClient {
    client: Client,
    endpoint: String,
    api_key: String,
    channel_tag: String,
}

impl PushbulletClient {
    pub fn new(config: &PushbulletConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            channel_tag: config.channel_tag.clone(),
        })
    }
}

#[async_trait]
impl NoteSender for PushbulletClient {
    #[instrument(skip_all, fields(channel_tag = %self.channel_tag))]
    async fn push_note(&self, note: &Note) -> Result<(), DispatchError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(ACCESS_TOKEN_HEADER, &self.api_key)
            .json(&PushRequest {
                title: &note.title,
                body: &note.body,
                kind: "note",
                channel_tag: &self.channel_tag,
            })
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                channel: Channel::NoteService,
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                channel: Channel::NoteService,
                status: status.as_u16(),
                body,
            });
        }

        debug!(title = %note.title, "pushbullet note accepted");
        Ok(())
    }
}

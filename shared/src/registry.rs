use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use tracing::instrument;

/// Delivery mechanism a subscriber token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_channel", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Firebase Cloud Messaging device tokens.
    NativePush,
    /// Pushbullet channel subscribers.
    NoteService,
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NativePush => write!(f, "native_push"),
            Self::NoteService => write!(f, "note_service"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown delivery channel {0}")]
pub struct UnknownChannel(String);

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native_push" => Ok(Self::NativePush),
            "note_service" => Ok(Self::NoteService),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub token: String,
    pub channel: Channel,
    pub registered_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(token: impl Into<String>, channel: Channel) -> Self {
        Self {
            token: token.into(),
            channel,
            registered_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("subscriber {token} is already registered on {channel}")]
    AlreadyExists { channel: Channel, token: String },
    #[error("subscriber {token} is not registered on {channel}")]
    NotFound { channel: Channel, token: String },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Subscriber tokens, partitioned by channel and keyed by `(channel, token)`.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Subscribers of one channel in registration order.
    async fn list_by_channel(&self, channel: Channel) -> Result<Vec<Subscriber>, RegistryError>;

    /// Rejects a `(token, channel)` pair that is already present.
    async fn insert(&self, subscriber: &Subscriber) -> Result<(), RegistryError>;

    /// Replaces a token in place, keeping channel and registration time.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] when `new_token` is already registered
    /// on the same channel.
    async fn update_token(
        &self,
        channel: Channel,
        old_token: &str,
        new_token: &str,
    ) -> Result<(), RegistryError>;

    async fn delete(&self, channel: Channel, token: &str) -> Result<(), RegistryError>;

    async fn count(&self) -> Result<i64, RegistryError>;
}

#[derive(Clone)]
pub struct PgDeviceRegistry {
    pool: Pool<Postgres>,
}

impl PgDeviceRegistry {
    pub const fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceRegistry for PgDeviceRegistry {
    #[instrument(skip(self))]
    async fn list_by_channel(&self, channel: Channel) -> Result<Vec<Subscriber>, RegistryError> {
        sqlx::query_as::<_, Subscriber>(
            r"
            SELECT token, channel, registered_at
            FROM subscribers
            WHERE channel = $1
            ORDER BY registered_at, token
            ",
        )
        .bind(channel)
        .fetch_all(&self.pool)
        .await
        .map_err(RegistryError::from)
    }

    #[instrument(skip(self, subscriber), fields(channel = %subscriber.channel))]
    async fn insert(&self, subscriber: &Subscriber) -> Result<(), RegistryError> {
        let result = sqlx::query(
            r"
            INSERT INTO subscribers (channel, token, registered_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (channel, token) DO NOTHING
            ",
        )
        .bind(subscriber.channel)
        .bind(&subscriber.token)
        .bind(subscriber.registered_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::AlreadyExists {
                channel: subscriber.channel,
                token: subscriber.token.clone(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, old_token, new_token))]
    async fn update_token(
        &self,
        channel: Channel,
        old_token: &str,
        new_token: &str,
    ) -> Result<(), RegistryError> {
        let result = sqlx::query(
            r"
            UPDATE subscribers
            SET token = $3
            WHERE channel = $1 AND token = $2
            ",
        )
        .bind(channel)
        .bind(old_token)
        .bind(new_token)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                RegistryError::AlreadyExists {
                    channel,
                    token: new_token.to_string(),
                }
            } else {
                RegistryError::Db(e)
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound {
                channel,
                token: old_token.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn delete(&self, channel: Channel, token: &str) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM subscribers WHERE channel = $1 AND token = $2")
            .bind(channel)
            .bind(token)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound {
                channel,
                token: token.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn count(&self) -> Result<i64, RegistryError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subscribers")
            .fetch_one(&self.pool)
            .await
            .map_err(RegistryError::from)
    }
}

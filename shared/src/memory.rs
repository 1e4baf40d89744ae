//! In-memory [`StatusStore`] and [`DeviceRegistry`] with the same contracts as the
//! Postgres implementations.

use crate::prt::status::StatusRecord;
use crate::registry::{Channel, DeviceRegistry, RegistryError, Subscriber};
use crate::store::{
    CommitOutcome, StatusStore, StoreError, clamp_recent_limit, guard_commit, ordered_bounds,
};
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Default)]
struct History {
    records: Vec<StatusRecord>,
    current: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStatusStore {
    inner: RwLock<History>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current(record: StatusRecord) -> Self {
        Self {
            inner: RwLock::new(History {
                records: vec![record],
                current: Some(0),
            }),
        }
    }

    /// Every committed record, oldest first.
    pub fn history(&self) -> Vec<StatusRecord> {
        self.inner.read().records.clone()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get_current(&self) -> Result<StatusRecord, StoreError> {
        let inner = self.inner.read();
        inner
            .current
            .and_then(|i| inner.records.get(i))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn commit_new(&self, record: &StatusRecord) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.inner.write();
        let current = inner.current.and_then(|i| inner.records.get(i));
        let outcome = guard_commit(current, record);
        if outcome == CommitOutcome::Committed {
            inner.records.push(record.clone());
            inner.current = Some(inner.records.len() - 1);
        }
        Ok(outcome)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<StatusRecord>, StoreError> {
        let limit = usize::try_from(clamp_recent_limit(limit)).unwrap_or(1);
        Ok(self
            .inner
            .read()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn between(&self, start: i64, end: i64) -> Result<Vec<StatusRecord>, StoreError> {
        let (start, end) = ordered_bounds(start, end);
        let mut records: Vec<StatusRecord> = self
            .inner
            .read()
            .records
            .iter()
            .filter(|r| (start..=end).contains(&r.timestamp))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

#[derive(Default)]
pub struct MemoryDeviceRegistry {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens<'a>(channel: Channel, tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let subscribers = tokens
            .into_iter()
            .map(|token| Subscriber::new(token, channel))
            .collect();
        Self {
            subscribers: RwLock::new(subscribers),
        }
    }

    pub fn tokens(&self, channel: Channel) -> Vec<String> {
        self.subscribers
            .read()
            .iter()
            .filter(|s| s.channel == channel)
            .map(|s| s.token.clone())
            .collect()
    }

    pub fn get(&self, channel: Channel, token: &str) -> Option<Subscriber> {
        self.subscribers
            .read()
            .iter()
            .find(|s| s.channel == channel && s.token == token)
            .cloned()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryDeviceRegistry {
    async fn list_by_channel(&self, channel: Channel) -> Result<Vec<Subscriber>, RegistryError> {
        Ok(self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.channel == channel)
            .cloned()
            .collect())
    }

    async fn insert(&self, subscriber: &Subscriber) -> Result<(), RegistryError> {
        let mut subscribers = self.subscribers.write();
        if subscribers
            .iter()
            .any(|s| s.channel == subscriber.channel && s.token == subscriber.token)
        {
            return Err(RegistryError::AlreadyExists {
                channel: subscriber.channel,
                token: subscriber.token.clone(),
            });
        }
        subscribers.push(subscriber.clone());
        Ok(())
    }

    async fn update_token(
        &self,
        channel: Channel,
        old_token: &str,
        new_token: &str,
    ) -> Result<(), RegistryError> {
        let mut subscribers = self.subscribers.write();
        if old_token != new_token
            && subscribers
                .iter()
                .any(|s| s.channel == channel && s.token == new_token)
        {
            return Err(RegistryError::AlreadyExists {
                channel,
                token: new_token.to_string(),
            });
        }
        let subscriber = subscribers
            .iter_mut()
            .find(|s| s.channel == channel && s.token == old_token)
            .ok_or_else(|| RegistryError::NotFound {
                channel,
                token: old_token.to_string(),
            })?;
        subscriber.token = new_token.to_string();
        Ok(())
    }

    async fn delete(&self, channel: Channel, token: &str) -> Result<(), RegistryError> {
        let mut subscribers = self.subscribers.write();
        let index = subscribers
            .iter()
            .position(|s| s.channel == channel && s.token == token)
            .ok_or_else(|| RegistryError::NotFound {
                channel,
                token: token.to_string(),
            })?;
        subscribers.remove(index);
        Ok(())
    }

    async fn count(&self) -> Result<i64, RegistryError> {
        Ok(i64::try_from(self.subscribers.read().len()).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prt::status::PrtState;

    fn record(timestamp: i64) -> StatusRecord {
        StatusRecord {
            state: PrtState::Normal,
            message: format!("update at {timestamp}"),
            timestamp,
            stations: Vec::new(),
            buses_dispatched: false,
            duration: None,
            raw_payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn cold_store_reports_not_found() {
        let store = MemoryStatusStore::new();
        assert!(matches!(
            store.get_current().await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn commit_moves_current_and_keeps_history() {
        let store = MemoryStatusStore::with_current(record(1000));
        store.commit_new(&record(1050)).await.unwrap();

        assert_eq!(store.get_current().await.unwrap().timestamp, 1050);
        assert_eq!(store.history().len(), 2);

        let recent = store.recent(10).await.unwrap();
        assert_eq!(
            recent.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![1050, 1000]
        );
        assert_eq!(store.between(1060, 990).await.unwrap().len(), 2);
        assert_eq!(store.between(1001, 1100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_behind_current_is_not_applied() {
        let store = MemoryStatusStore::with_current(record(1050));

        let outcome = store.commit_new(&record(1000)).await.unwrap();

        assert!(matches!(outcome, CommitOutcome::Superseded { current: 1050, .. }));
        assert_eq!(store.get_current().await.unwrap().timestamp, 1050);
        assert_eq!(store.history().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = MemoryDeviceRegistry::new();
        registry
            .insert(&Subscriber::new("a", Channel::NativePush))
            .await
            .unwrap();
        registry
            .insert(&Subscriber::new("a", Channel::NoteService))
            .await
            .unwrap();

        let err = registry
            .insert(&Subscriber::new("a", Channel::NativePush))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert_eq!(registry.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_and_delete_are_channel_scoped() {
        let registry = MemoryDeviceRegistry::with_tokens(Channel::NativePush, ["a", "b"]);
        registry
            .insert(&Subscriber::new("a", Channel::NoteService))
            .await
            .unwrap();
        let registered_at = registry.get(Channel::NativePush, "a").unwrap().registered_at;

        registry
            .update_token(Channel::NativePush, "a", "a2")
            .await
            .unwrap();
        let updated = registry.get(Channel::NativePush, "a2").unwrap();
        assert_eq!(updated.registered_at, registered_at);
        assert!(registry.get(Channel::NoteService, "a").is_some());

        registry.delete(Channel::NativePush, "b").await.unwrap();
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a2"]);
        assert!(matches!(
            registry.delete(Channel::NativePush, "b").await,
            Err(RegistryError::NotFound { .. })
        ));
        assert!(matches!(
            registry.update_token(Channel::NativePush, "zz", "x").await,
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn update_onto_registered_token_is_rejected() {
        let registry = MemoryDeviceRegistry::with_tokens(Channel::NativePush, ["a", "b"]);
        let err = registry
            .update_token(Channel::NativePush, "a", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a", "b"]);
    }
}

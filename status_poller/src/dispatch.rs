use crate::channels::{BatchResponse, BatchSender, Note, NoteSender, TokenOutcome};
use crate::error::{DispatchError, ReconcileError};
use async_trait::async_trait;
use shared::prt::StatusRecord;
use shared::registry::{Channel, DeviceRegistry, RegistryError};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Fans a committed status change out to subscribers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn broadcast(&self, record: &StatusRecord) -> BroadcastReport;
}

/// What happened on one channel during a broadcast.
#[derive(Debug)]
pub enum Delivery<T> {
    /// The channel is not configured.
    Disabled,
    /// Not live; the request was logged instead of sent.
    DryRun,
    NoRecipients,
    Sent(T),
    Failed(DispatchError),
}

impl<T> Delivery<T> {
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug)]
pub struct BroadcastReport {
    pub native: Delivery<ReconcileSummary>,
    pub note: Delivery<()>,
}

/// Registry feedback applied after native push batches.
#[derive(Debug, Default)]
pub struct ReconcileSummary {
    pub delivered: usize,
    pub removed: usize,
    pub updated: usize,
    pub failed: usize,
    pub failed_batches: usize,
    pub reconcile_errors: Vec<ReconcileError>,
}

pub struct NotificationDispatcher {
    registry: Arc<dyn DeviceRegistry>,
    native: Option<Arc<dyn BatchSender>>,
    note: Option<Arc<dyn NoteSender>>,
    live: bool,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<dyn DeviceRegistry>, live: bool) -> Self {
        Self {
            registry,
            native: None,
            note: None,
            live,
        }
    }

    #[must_use]
    pub fn with_native(mut self, sender: Arc<dyn BatchSender>) -> Self {
        self.native = Some(sender);
        self
    }

    #[must_use]
    pub fn with_note(mut self, sender: Arc<dyn NoteSender>) -> Self {
        self.note = Some(sender);
        self
    }

    async fn broadcast_native(&self, record: &StatusRecord) -> Delivery<ReconcileSummary> {
        let Some(sender) = self.native.as_ref() else {
            return Delivery::Disabled;
        };

        let tokens: Vec<String> = match self.registry.list_by_channel(Channel::NativePush).await {
            Ok(subscribers) => subscribers.into_iter().map(|s| s.token).collect(),
            Err(source) => {
                return Delivery::Failed(DispatchError::Registry {
                    channel: Channel::NativePush,
                    source,
                });
            }
        };
        if tokens.is_empty() {
            return Delivery::NoRecipients;
        }

        let data = record.push_data();
        if !self.live {
            info!(
                name: "dispatch.native.dry_run",
                recipients = tokens.len(),
                data = ?data,
                "not live, skipping native push"
            );
            return Delivery::DryRun;
        }

        let mut summary = ReconcileSummary::default();
        let mut first_error = None;
        let mut batches = 0;
        for chunk in tokens.chunks(sender.max_batch_size().max(1)) {
            batches += 1;
            match sender.send_batch(chunk, &data).await {
                Ok(response) => self.reconcile(chunk, &response, &mut summary).await,
                Err(e) => {
                    warn!(name: "dispatch.native.batch_failed", error = ?e, tokens = chunk.len(), "native push batch failed");
                    summary.failed_batches += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if summary.failed_batches == batches => Delivery::Failed(e),
            _ => Delivery::Sent(summary),
        }
    }

    /// Applies per-token outcomes to the registry. `response.results[i]` belongs to
    /// `tokens[i]`; a failed mutation is recorded and the remaining tokens still run.
    async fn reconcile(
        &self,
        tokens: &[String],
        response: &BatchResponse,
        summary: &mut ReconcileSummary,
    ) {
        if response.results.len() != tokens.len() {
            warn!(
                name: "dispatch.native.result_mismatch",
                tokens = tokens.len(),
                results = response.results.len(),
                "result count does not match request, reconciling aligned prefix"
            );
        }

        for (token, result) in tokens.iter().zip(&response.results) {
            let applied = match result.outcome() {
                TokenOutcome::Delivered => {
                    summary.delivered += 1;
                    Ok(())
                }
                TokenOutcome::Failed(error) => {
                    debug!(token, error, "token delivery failed");
                    summary.failed += 1;
                    Ok(())
                }
                TokenOutcome::Unregistered => self
                    .registry
                    .delete(Channel::NativePush, token)
                    .await
                    .map(|()| summary.removed += 1),
                TokenOutcome::Canonical(canonical) => {
                    match self
                        .registry
                        .update_token(Channel::NativePush, token, &canonical)
                        .await
                    {
                        Ok(()) => {
                            summary.updated += 1;
                            Ok(())
                        }
                        // Device is already registered under its canonical token.
                        Err(RegistryError::AlreadyExists { .. }) => self
                            .registry
                            .delete(Channel::NativePush, token)
                            .await
                            .map(|()| summary.removed += 1),
                        Err(e) => Err(e),
                    }
                }
            };

            if let Err(source) = applied {
                let error = ReconcileError {
                    token: token.clone(),
                    source,
                };
                warn!(name: "dispatch.native.reconcile_failed", error = %error, "could not reconcile token");
                summary.reconcile_errors.push(error);
            }
        }
    }

    async fn broadcast_note(&self, record: &StatusRecord) -> Delivery<()> {
        let Some(sender) = self.note.as_ref() else {
            return Delivery::Disabled;
        };

        let note = Note::from(record);
        if !self.live {
            info!(
                name: "dispatch.note.dry_run",
                title = %note.title,
                body = %note.body,
                "not live, skipping note push"
            );
            return Delivery::DryRun;
        }

        match sender.push_note(&note).await {
            Ok(()) => Delivery::Sent(()),
            Err(e) => Delivery::Failed(e),
        }
    }
}

#[async_trait]
impl Notifier for NotificationDispatcher {
    #[instrument(skip_all, fields(timestamp = record.timestamp))]
    async fn broadcast(&self, record: &StatusRecord) -> BroadcastReport {
        let (native, note) = tokio::join!(self.broadcast_native(record), self.broadcast_note(record));

        match &native {
            Delivery::Sent(summary) => info!(
                name: "dispatch.native.sent",
                delivered = summary.delivered,
                removed = summary.removed,
                updated = summary.updated,
                failed = summary.failed,
                failed_batches = summary.failed_batches,
                reconcile_errors = summary.reconcile_errors.len(),
                "native push sent"
            ),
            Delivery::Failed(e) => warn!(name: "dispatch.native.failed", error = ?e, "native push failed"),
            other => debug!(outcome = ?other, "native push not sent"),
        }
        match &note {
            Delivery::Sent(()) => info!(name: "dispatch.note.sent", "note push sent"),
            Delivery::Failed(e) => warn!(name: "dispatch.note.failed", error = ?e, "note push failed"),
            other => debug!(outcome = ?other, "note push not sent"),
        }

        BroadcastReport { native, note }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::BatchResult;
    use parking_lot::Mutex;
    use shared::memory::MemoryDeviceRegistry;
    use shared::prt::PrtState;
    use std::collections::{BTreeMap, VecDeque};

    struct ScriptedBatchSender {
        max_batch_size: usize,
        responses: Mutex<VecDeque<Result<BatchResponse, DispatchError>>>,
        requests: Mutex<Vec<(Vec<String>, BTreeMap<String, String>)>>,
    }

    impl ScriptedBatchSender {
        fn new(
            max_batch_size: usize,
            responses: impl IntoIterator<Item = Result<BatchResponse, DispatchError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                max_batch_size,
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn sent_tokens(&self) -> Vec<Vec<String>> {
            self.requests.lock().iter().map(|(t, _)| t.clone()).collect()
        }
    }

    #[async_trait]
    impl BatchSender for ScriptedBatchSender {
        fn max_batch_size(&self) -> usize {
            self.max_batch_size
        }

        async fn send_batch(
            &self,
            tokens: &[String],
            data: &BTreeMap<String, String>,
        ) -> Result<BatchResponse, DispatchError> {
            self.requests.lock().push((tokens.to_vec(), data.clone()));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(delivered(tokens.len())))
        }
    }

    struct RecordingNoteSender {
        fail: bool,
        notes: Mutex<Vec<Note>>,
    }

    impl RecordingNoteSender {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                notes: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl NoteSender for RecordingNoteSender {
        async fn push_note(&self, note: &Note) -> Result<(), DispatchError> {
            self.notes.lock().push(note.clone());
            if self.fail {
                Err(rejected(Channel::NoteService))
            } else {
                Ok(())
            }
        }
    }

    fn rejected(channel: Channel) -> DispatchError {
        DispatchError::Rejected {
            channel,
            status: 503,
            body: "unavailable".to_string(),
        }
    }

    fn delivered(n: usize) -> BatchResponse {
        response(vec![BatchResult::default(); n])
    }

    fn response(results: Vec<BatchResult>) -> BatchResponse {
        BatchResponse {
            results,
            ..BatchResponse::default()
        }
    }

    fn not_registered() -> BatchResult {
        BatchResult {
            error: Some("NotRegistered".to_string()),
            ..BatchResult::default()
        }
    }

    fn canonical(token: &str) -> BatchResult {
        BatchResult {
            message_id: Some("1:2342".to_string()),
            registration_id: Some(token.to_string()),
            error: None,
        }
    }

    fn closed() -> StatusRecord {
        StatusRecord {
            state: PrtState::Closed,
            message: "closed for storm".to_string(),
            timestamp: 1050,
            stations: Vec::new(),
            buses_dispatched: true,
            duration: None,
            raw_payload: Vec::new(),
        }
    }

    fn sent(report: BroadcastReport) -> ReconcileSummary {
        match report.native {
            Delivery::Sent(summary) => summary,
            other => panic!("expected native push to be sent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reconciles_tokens_positionally() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b", "c"],
        ));
        let sender = ScriptedBatchSender::new(
            1000,
            [Ok(response(vec![
                BatchResult::default(),
                not_registered(),
                canonical("c2"),
            ]))],
        );
        let dispatcher =
            NotificationDispatcher::new(registry.clone(), true).with_native(sender.clone());

        let summary = sent(dispatcher.broadcast(&closed()).await);

        assert_eq!(registry.tokens(Channel::NativePush), vec!["a", "c2"]);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.updated, 1);
        assert!(summary.reconcile_errors.is_empty());

        let requests = sender.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, vec!["a", "b", "c"]);
        assert_eq!(requests[0].1, closed().push_data());
    }

    #[tokio::test]
    async fn canonical_token_already_registered_drops_old_token() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "a2"],
        ));
        let sender = ScriptedBatchSender::new(
            1000,
            [Ok(response(vec![canonical("a2"), BatchResult::default()]))],
        );
        let dispatcher = NotificationDispatcher::new(registry.clone(), true).with_native(sender);

        let summary = sent(dispatcher.broadcast(&closed()).await);

        assert_eq!(registry.tokens(Channel::NativePush), vec!["a2"]);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.updated, 0);
    }

    #[tokio::test]
    async fn reconcile_failure_does_not_stop_remaining_tokens() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b", "c"],
        ));
        // "a" disappears between the send and the reconcile, so its delete fails.
        registry.delete(Channel::NativePush, "a").await.unwrap();
        let dispatcher = NotificationDispatcher::new(registry.clone(), true);

        let tokens = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut summary = ReconcileSummary::default();
        dispatcher
            .reconcile(
                &tokens,
                &response(vec![not_registered(), not_registered(), canonical("c2")]),
                &mut summary,
            )
            .await;

        assert_eq!(summary.reconcile_errors.len(), 1);
        assert_eq!(summary.reconcile_errors[0].token, "a");
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(registry.tokens(Channel::NativePush), vec!["c2"]);
    }

    #[tokio::test]
    async fn splits_large_token_lists_into_batches() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b", "c"],
        ));
        let sender = ScriptedBatchSender::new(
            2,
            [
                Ok(response(vec![BatchResult::default(), not_registered()])),
                Ok(response(vec![canonical("c2")])),
            ],
        );
        let dispatcher =
            NotificationDispatcher::new(registry.clone(), true).with_native(sender.clone());

        let summary = sent(dispatcher.broadcast(&closed()).await);

        assert_eq!(
            sender.sent_tokens(),
            vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]
        );
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a", "c2"]);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn short_result_list_reconciles_aligned_prefix() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b", "c"],
        ));
        let sender = ScriptedBatchSender::new(1000, [Ok(response(vec![not_registered()]))]);
        let dispatcher = NotificationDispatcher::new(registry.clone(), true).with_native(sender);

        let summary = sent(dispatcher.broadcast(&closed()).await);

        assert_eq!(registry.tokens(Channel::NativePush), vec!["b", "c"]);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.delivered, 0);
    }

    #[tokio::test]
    async fn note_failure_does_not_affect_native_reconciliation() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b"],
        ));
        let sender = ScriptedBatchSender::new(
            1000,
            [Ok(response(vec![BatchResult::default(), not_registered()]))],
        );
        let notes = RecordingNoteSender::new(true);
        let dispatcher = NotificationDispatcher::new(registry.clone(), true)
            .with_native(sender)
            .with_note(notes.clone());

        let report = dispatcher.broadcast(&closed()).await;

        assert!(report.note.is_failed());
        assert_eq!(notes.notes.lock().len(), 1);
        assert_eq!(notes.notes.lock()[0].title, "The PRT is CLOSED");
        assert_eq!(sent(report).removed, 1);
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a"]);
    }

    #[tokio::test]
    async fn native_failure_does_not_block_note() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(Channel::NativePush, ["a"]));
        let sender = ScriptedBatchSender::new(1000, [Err(rejected(Channel::NativePush))]);
        let notes = RecordingNoteSender::new(false);
        let dispatcher = NotificationDispatcher::new(registry.clone(), true)
            .with_native(sender)
            .with_note(notes.clone());

        let report = dispatcher.broadcast(&closed()).await;

        assert!(report.native.is_failed());
        assert!(matches!(report.note, Delivery::Sent(())));
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a"]);
    }

    #[tokio::test]
    async fn partial_batch_failure_still_reports_sent() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b"],
        ));
        let sender = ScriptedBatchSender::new(
            1,
            [
                Err(rejected(Channel::NativePush)),
                Ok(response(vec![not_registered()])),
            ],
        );
        let dispatcher = NotificationDispatcher::new(registry.clone(), true).with_native(sender);

        let summary = sent(dispatcher.broadcast(&closed()).await);

        assert_eq!(summary.failed_batches, 1);
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a"]);
    }

    #[tokio::test]
    async fn dry_run_sends_nothing_and_keeps_registry() {
        let registry = Arc::new(MemoryDeviceRegistry::with_tokens(
            Channel::NativePush,
            ["a", "b"],
        ));
        let sender = ScriptedBatchSender::new(1000, [Ok(response(vec![not_registered()]))]);
        let notes = RecordingNoteSender::new(false);
        let dispatcher = NotificationDispatcher::new(registry.clone(), false)
            .with_native(sender.clone())
            .with_note(notes.clone());

        let report = dispatcher.broadcast(&closed()).await;

        assert!(matches!(report.native, Delivery::DryRun));
        assert!(matches!(report.note, Delivery::DryRun));
        assert!(sender.sent_tokens().is_empty());
        assert!(notes.notes.lock().is_empty());
        assert_eq!(registry.tokens(Channel::NativePush), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn unconfigured_and_empty_channels_are_skipped() {
        let registry = Arc::new(MemoryDeviceRegistry::new());
        let sender = ScriptedBatchSender::new(1000, []);
        let dispatcher = NotificationDispatcher::new(registry, true).with_native(sender.clone());

        let report = dispatcher.broadcast(&closed()).await;

        assert!(matches!(report.native, Delivery::NoRecipients));
        assert!(matches!(report.note, Delivery::Disabled));
        assert!(sender.sent_tokens().is_empty());
    }
}

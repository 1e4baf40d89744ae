use crate::dispatch::{BroadcastReport, Notifier};
use crate::error::TickError;
use chrono::Utc;
use shared::prt::{Recency, StatusSource, compare};
use shared::store::{CommitOutcome, StatusStore, StoreError};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug)]
pub enum TickOutcome {
    /// The fetched record is the current record.
    Unchanged,
    /// The fetched record is older than the current record and was discarded.
    Stale { current: i64, fetched: i64 },
    Changed {
        cold_start: bool,
        report: BroadcastReport,
    },
}

/// Runs one fetch, compare, commit and broadcast cycle per tick.
pub struct ChangeDetector {
    source: Arc<dyn StatusSource>,
    store: Arc<dyn StatusStore>,
    notifier: Arc<dyn Notifier>,
}

impl ChangeDetector {
    pub fn new(
        source: Arc<dyn StatusSource>,
        store: Arc<dyn StatusStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
        }
    }

    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        let fetched = self.source.fetch(Utc::now()).await?;

        let cold_start = match self.store.get_current().await {
            Ok(current) => match compare(&current, &fetched) {
                Recency::Equal => {
                    info!(name: "poller.tick.unchanged", timestamp = fetched.timestamp, "status unchanged");
                    return Ok(TickOutcome::Unchanged);
                }
                Recency::Before => {
                    info!(
                        name: "poller.tick.stale",
                        current = current.timestamp,
                        fetched = fetched.timestamp,
                        "fetched status is older than current, discarding"
                    );
                    return Ok(TickOutcome::Stale {
                        current: current.timestamp,
                        fetched: fetched.timestamp,
                    });
                }
                Recency::After => false,
            },
            Err(StoreError::NotFound) => true,
            Err(e) => return Err(TickError::ReadCurrent(e)),
        };

        let committed = self
            .store
            .commit_new(&fetched)
            .await
            .map_err(TickError::Commit)?;
        if let CommitOutcome::Superseded { current, recency } = committed {
            // An overlapping tick committed between our read and our commit.
            info!(
                name: "poller.tick.superseded",
                current,
                fetched = fetched.timestamp,
                "current status moved during tick, discarding"
            );
            return Ok(match recency {
                Recency::Before => TickOutcome::Stale {
                    current,
                    fetched: fetched.timestamp,
                },
                Recency::Equal | Recency::After => TickOutcome::Unchanged,
            });
        }
        info!(
            name: "poller.tick.changed",
            cold_start,
            state = fetched.state.code(),
            timestamp = fetched.timestamp,
            message = %fetched.message,
            "committed new status"
        );

        let report = self.notifier.broadcast(&fetched).await;
        Ok(TickOutcome::Changed { cold_start, report })
    }
}

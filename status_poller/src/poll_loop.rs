use crate::detector::{ChangeDetector, TickOutcome};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared::PollerConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Progress of the poll loop as seen by the health endpoint.
#[derive(Debug, Default, Clone)]
pub struct PollState {
    pub last_attempted_tick: Option<DateTime<Utc>>,
    pub last_successful_tick: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub type SharedPollState = Arc<RwLock<PollState>>;

pub struct PollLoop {
    detector: Arc<ChangeDetector>,
    interval: Duration,
    allow_overlapping_ticks: bool,
    state: SharedPollState,
}

impl PollLoop {
    pub fn new(detector: Arc<ChangeDetector>, config: &PollerConfig, state: SharedPollState) -> Self {
        Self {
            detector,
            interval: config.interval.max(MIN_INTERVAL),
            allow_overlapping_ticks: config.allow_overlapping_ticks,
            state,
        }
    }

    /// Effective tick interval, never below one second.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fires a tick every interval until `shutdown` is cancelled, then waits for the
    /// ticks still in flight.
    ///
    /// Each tick runs as its own task so a slow fetch never delays the timer. With
    /// overlapping ticks disabled a firing is skipped while the previous tick runs.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let slot = Arc::new(Semaphore::new(1));
        let mut in_flight = JoinSet::new();

        info!(
            interval = ?self.interval,
            allow_overlapping_ticks = self.allow_overlapping_ticks,
            "initialized poll loop"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                () = shutdown.cancelled() => {
                    info!("shutdown requested, exiting poll loop");
                    break;
                }
            }

            while let Some(res) = in_flight.try_join_next() {
                if let Err(e) = res {
                    error!(name: "poller.tick.panicked", error = ?e, "tick task did not complete");
                }
            }

            let permit = if self.allow_overlapping_ticks {
                None
            } else if let Ok(permit) = Arc::clone(&slot).try_acquire_owned() {
                Some(permit)
            } else {
                info!(name: "poller.tick.skipped", "previous tick still running, skipping");
                continue;
            };

            let detector = Arc::clone(&self.detector);
            let state = Arc::clone(&self.state);
            in_flight.spawn(async move {
                let _permit = permit;
                run_tick(&detector, &state).await;
            });
        }

        debug!(in_flight = in_flight.len(), "waiting for in-flight ticks");
        while let Some(res) = in_flight.join_next().await {
            if let Err(e) = res {
                error!(name: "poller.tick.panicked", error = ?e, "tick task did not complete");
            }
        }
    }
}

async fn run_tick(detector: &ChangeDetector, state: &RwLock<PollState>) {
    let started = Utc::now();
    state.write().last_attempted_tick = Some(started);

    match detector.tick().await {
        Ok(outcome) => {
            if let TickOutcome::Changed { report, .. } = &outcome
                && (report.native.is_failed() || report.note.is_failed())
            {
                warn!(name: "poller.tick.partial_delivery", "status committed but a channel failed");
            }
            let mut state = state.write();
            // Overlapping ticks can finish out of order.
            state.last_successful_tick = state.last_successful_tick.max(Some(started));
        }
        Err(e) => {
            warn!(name: "poller.tick.failed", error = ?e, "tick failed");
            state.write().last_error = Some(e.to_string());
        }
    }
}

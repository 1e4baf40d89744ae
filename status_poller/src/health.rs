use crate::poll_loop::{PollState, SharedPollState};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Successful ticks may lag this many intervals before the poller reports unhealthy.
const STALE_INTERVALS: u32 = 3;

#[derive(Clone)]
struct HealthState {
    poll: SharedPollState,
    max_staleness: TimeDelta,
}

pub async fn run_health_server(
    addr: String,
    poll: SharedPollState,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    info!(%addr, "starting axum health server");
    let max_staleness = max_staleness(interval);
    let app = Router::new()
        .route("/health", get(health_check))
        .with_state(HealthState {
            poll,
            max_staleness,
        });
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;
    Ok(())
}

/// Allowed age of the last successful tick, saturating for huge intervals.
fn max_staleness(interval: Duration) -> TimeDelta {
    let window = interval
        .checked_mul(STALE_INTERVALS)
        .unwrap_or(Duration::MAX);
    TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX)
}

async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let snapshot = state.poll.read().clone();
    evaluate(&snapshot, Utc::now(), state.max_staleness)
}

fn evaluate(
    state: &PollState,
    now: DateTime<Utc>,
    max_staleness: TimeDelta,
) -> (StatusCode, String) {
    let last_error = state.last_error.as_deref().unwrap_or("unknown");

    let Some(last_successful_tick) = state.last_successful_tick else {
        return match state.last_attempted_tick {
            Some(last_attempted_tick) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Status has not been successfully polled. Last attempted tick: {last_attempted_tick}. Last error: {last_error}"
                ),
            ),
            None => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "No attempted or successful status polls".to_string(),
            ),
        };
    };

    if now - last_successful_tick > max_staleness {
        let last_attempted_tick = state
            .last_attempted_tick
            .map_or_else(|| "never".to_string(), |t| t.to_string());
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(
                "Status not polled in the last {}s. Last successful tick: {last_successful_tick}. Last attempted tick: {last_attempted_tick}. Last error: {last_error}",
                max_staleness.num_seconds()
            ),
        )
    } else {
        (
            StatusCode::OK,
            format!("Status last successfully polled: {last_successful_tick}"),
        )
    }
}

#[warn(clippy::pedantic)]
mod channels;
mod detector;
mod dispatch;
mod error;
mod health;
mod poll_loop;

use crate::channels::fcm::FcmClient;
use crate::channels::pushbullet::PushbulletClient;
use crate::detector::ChangeDetector;
use crate::dispatch::NotificationDispatcher;
use crate::error::MainError;
use crate::health::run_health_server;
use crate::poll_loop::{PollLoop, SharedPollState};
use shared::error::InitializationError;
use shared::prt::HttpStatusSource;
use shared::registry::PgDeviceRegistry;
use shared::store::PgStatusStore;
use shared::{init_tracing, initialize_db, load_config, shutdown_listener};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), MainError> {
    init_tracing()?;

    let config = load_config().map_err(InitializationError::from)?;
    let db_pool = initialize_db(&config.postgres, true).await?;

    let source = HttpStatusSource::new(&config.source).map_err(InitializationError::from)?;
    let store = Arc::new(PgStatusStore::new(db_pool.clone()));
    let registry = Arc::new(PgDeviceRegistry::new(db_pool));

    let mut dispatcher = NotificationDispatcher::new(registry, config.poller.live);
    if let Some(fcm) = &config.fcm {
        let client = FcmClient::new(fcm).map_err(InitializationError::from)?;
        dispatcher = dispatcher.with_native(Arc::new(client));
    } else {
        warn!("no fcm configuration, native push disabled");
    }
    if let Some(pushbullet) = &config.pushbullet {
        let client = PushbulletClient::new(pushbullet).map_err(InitializationError::from)?;
        dispatcher = dispatcher.with_note(Arc::new(client));
    } else {
        warn!("no pushbullet configuration, note push disabled");
    }
    if !config.poller.live {
        info!("poller is not live, notifications will only be logged");
    }

    let detector = Arc::new(ChangeDetector::new(
        Arc::new(source),
        store,
        Arc::new(dispatcher),
    ));
    let poll_state = SharedPollState::default();

    // Cancellation token shared across tasks; listener cancels on SIGINT/SIGTERM.
    let shutdown_token = CancellationToken::new();
    let signal_handle = tokio::spawn(shutdown_listener(Some(shutdown_token.clone())));

    let poll_loop = PollLoop::new(detector, &config.poller, Arc::clone(&poll_state));

    let axum_handle = tokio::spawn(run_health_server(
        config.poller.health_addr.clone(),
        poll_state,
        poll_loop.interval(),
        shutdown_token.clone(),
    ));

    let mut poller_handle = tokio::spawn(poll_loop.run(shutdown_token.clone()));

    tokio::select! {
        res = axum_handle => {
            shutdown_token.cancel();
            res??;
        }
        res = &mut poller_handle => {
            shutdown_token.cancel();
            res?;
        }
        res = signal_handle => {
            shutdown_token.cancel();
            res?;
            // Let in-flight ticks finish their commit and broadcast.
            poller_handle.await?;
        }
    }

    Ok(())
}

use shared::error::InitializationError;
use shared::prt::FetchError;
use shared::registry::{Channel, RegistryError};
use shared::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TickError {
    #[error("status fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to read current status: {0}")]
    ReadCurrent(#[source] StoreError),
    #[error("failed to commit new status: {0}")]
    Commit(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{channel} request failed: {source}")]
    Transport {
        channel: Channel,
        #[source]
        source: reqwest::Error,
    },
    #[error("{channel} rejected request with status {status}: {body}")]
    Rejected {
        channel: Channel,
        status: u16,
        body: String,
    },
    #[error("failed to list {channel} subscribers: {source}")]
    Registry {
        channel: Channel,
        #[source]
        source: RegistryError,
    },
}

/// A post-delivery registry mutation that failed for one token.
#[derive(Debug, Error)]
#[error("failed to reconcile token {token}: {source}")]
pub struct ReconcileError {
    pub token: String,
    #[source]
    pub source: RegistryError,
}

#[derive(Debug, Error)]
pub enum MainError {
    #[error(transparent)]
    Init(#[from] InitializationError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

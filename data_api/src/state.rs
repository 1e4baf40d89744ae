use shared::registry::DeviceRegistry;
use shared::store::StatusStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StatusStore>,
    pub registry: Arc<dyn DeviceRegistry>,
}

use std::sync::Arc;

use crate::migration::MigrationCoordinator;

/// Shared application state passed to all Axum handlers via `.with_state()`.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MigrationCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<MigrationCoordinator>) -> Self {
        Self { coordinator }
    }
}

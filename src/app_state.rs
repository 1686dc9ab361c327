//! Shared application state injected into the status handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::persistence::PersistenceGateway;
use crate::realtime::ConnectionState;
use crate::service::RunGuard;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Store the sync services write to.
    pub gateway: Arc<dyn PersistenceGateway>,
    /// Guard held while an import or validation runs.
    pub run_guard: Arc<RunGuard>,
    /// Realtime connection state.
    pub realtime: watch::Receiver<ConnectionState>,
}

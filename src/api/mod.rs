//! Status API: liveness and sync progress.
//!
//! The read API over indexed data is served elsewhere; this router only
//! reports on the indexer itself.

pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the status router.
pub fn build_router() -> Router<AppState> {
    Router::new().merge(handlers::system::routes())
}

//! Service layer: the sync and reconciliation processes.
//!
//! [`PairSyncService`] mirrors pairs and keeps snapshots live,
//! [`HistoryImporter`] backfills liquidity history, [`HistoryValidator`]
//! rolls back history that diverged from the chain, and [`TaskScheduler`]
//! runs the last two without overlap.

pub mod error_ledger;
pub mod history_importer;
pub mod history_validator;
pub mod pair_sync;
pub mod scheduler;

pub use error_ledger::ErrorLedger;
pub use history_importer::{HistoryImporter, ImportSummary, ImporterSettings};
pub use history_validator::{HistoryValidator, ValidationOutcome};
pub use pair_sync::{PairSyncService, PairSyncSettings};
pub use scheduler::{Job, RunGuard, RunPermit, TaskScheduler};

//! Error-suppression ledger.
//!
//! A pair or log whose processing failed recently is skipped until the
//! suppression window has passed, so a permanently broken pair does not
//! fail every scheduled run.

use std::sync::Arc;

use crate::domain::{ErrorKey, ErrorRecord, PairId};
use crate::error::IndexerError;
use crate::persistence::PersistenceGateway;

/// Records failures and answers "did this fail recently?".
#[derive(Debug, Clone)]
pub struct ErrorLedger {
    gateway: Arc<dyn PersistenceGateway>,
    window_hours: u32,
}

impl ErrorLedger {
    /// Creates a ledger suppressing for `window_hours`.
    #[must_use]
    pub fn new(gateway: Arc<dyn PersistenceGateway>, window_hours: u32) -> Self {
        Self {
            gateway,
            window_hours,
        }
    }

    /// Suppression window in hours.
    #[must_use]
    pub const fn window_hours(&self) -> u32 {
        self.window_hours
    }

    /// Latest error at `key` updated less than `hours` ago.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn error_within_hours(
        &self,
        key: &ErrorKey,
        hours: u32,
    ) -> Result<Option<ErrorRecord>, IndexerError> {
        self.gateway.error_within_hours(key, hours).await
    }

    /// Recent pair-level error that suppresses the whole pair.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn pair_suppression(
        &self,
        pair_id: PairId,
    ) -> Result<Option<ErrorRecord>, IndexerError> {
        self.error_within_hours(&ErrorKey::pair_level(pair_id), self.window_hours)
            .await
    }

    /// Recent error recorded against one log.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn log_suppression(
        &self,
        key: &ErrorKey,
    ) -> Result<Option<ErrorRecord>, IndexerError> {
        self.error_within_hours(key, self.window_hours).await
    }

    /// Records `error` at `key`.
    ///
    /// A failure to record is logged, never propagated: the original error
    /// has already been handled by the caller.
    pub async fn record(&self, key: &ErrorKey, error: &IndexerError) -> Option<ErrorRecord> {
        match self.gateway.upsert_error_record(key, &error.to_string()).await {
            Ok(record) => {
                tracing::debug!(
                    pair_id = %key.pair_id,
                    transaction_hash = %key.transaction_hash,
                    log_index = key.log_index,
                    times_occurred = record.times_occurred,
                    "error recorded"
                );
                Some(record)
            }
            Err(e) => {
                tracing::error!(pair_id = %key.pair_id, error = %e, "failed to record error");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::persistence::InMemoryGateway;

    fn ledger() -> (Arc<InMemoryGateway>, ErrorLedger) {
        let gateway = Arc::new(InMemoryGateway::new());
        let ledger = ErrorLedger::new(Arc::clone(&gateway) as Arc<dyn PersistenceGateway>, 6);
        (gateway, ledger)
    }

    #[tokio::test]
    async fn recorded_pair_error_suppresses_the_pair() {
        let (_, ledger) = ledger();
        let pair = PairId::new(1);
        ledger
            .record(
                &ErrorKey::pair_level(pair),
                &IndexerError::Http("timeout".to_string()),
            )
            .await;

        let Ok(suppressed) = ledger.pair_suppression(pair).await else {
            panic!("lookup should succeed");
        };
        assert!(suppressed.is_some());

        let Ok(other) = ledger.pair_suppression(PairId::new(2)).await else {
            panic!("lookup should succeed");
        };
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn stale_errors_do_not_suppress() {
        let (gateway, ledger) = ledger();
        let key = ErrorKey::log_level(PairId::new(1), "mh_1", "th_1", 0);
        gateway
            .insert_error_record_at(key.clone(), "boom", Utc::now() - Duration::hours(7))
            .await;
        let Ok(suppressed) = ledger.log_suppression(&key).await else {
            panic!("lookup should succeed");
        };
        assert!(suppressed.is_none());

        let Ok(wider) = ledger.error_within_hours(&key, 8).await else {
            panic!("lookup should succeed");
        };
        assert!(wider.is_some());
    }

    #[tokio::test]
    async fn record_as_old_as_the_window_is_expired() {
        let (gateway, ledger) = ledger();
        let key = ErrorKey::log_level(PairId::new(1), "mh_1", "th_1", 0);
        gateway
            .insert_error_record_at(key.clone(), "boom", Utc::now() - Duration::hours(6))
            .await;
        let Ok(at_boundary) = ledger.error_within_hours(&key, 6).await else {
            panic!("lookup should succeed");
        };
        assert!(at_boundary.is_none());

        let inside = ErrorKey::log_level(PairId::new(1), "mh_2", "th_2", 0);
        gateway
            .insert_error_record_at(
                inside.clone(),
                "boom",
                Utc::now() - Duration::hours(6) + Duration::minutes(1),
            )
            .await;
        let Ok(recent) = ledger.error_within_hours(&inside, 6).await else {
            panic!("lookup should succeed");
        };
        assert!(recent.is_some());
    }

    #[tokio::test]
    async fn repeated_errors_are_counted() {
        let (_, ledger) = ledger();
        let key = ErrorKey::log_level(PairId::new(1), "mh_1", "th_1", 2);
        let error = IndexerError::InvalidLog("bad".to_string());
        ledger.record(&key, &error).await;
        let Some(record) = ledger.record(&key, &error).await else {
            panic!("record should be stored");
        };
        assert_eq!(record.times_occurred, 2);
    }
}

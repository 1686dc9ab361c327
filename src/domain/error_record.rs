//! Error ledger rows.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::PairId;

/// Location an error is recorded against.
///
/// Pair-level failures use empty hashes and `log_index = -1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ErrorKey {
    /// Pair the failure belongs to.
    pub pair_id: PairId,
    /// Micro-block hash of the failing log.
    pub micro_block_hash: String,
    /// Transaction hash of the failing log.
    pub transaction_hash: String,
    /// Log index of the failing log.
    pub log_index: i32,
}

impl ErrorKey {
    /// Key for a failure that aborted a whole pair.
    #[must_use]
    pub fn pair_level(pair_id: PairId) -> Self {
        Self {
            pair_id,
            micro_block_hash: String::new(),
            transaction_hash: String::new(),
            log_index: -1,
        }
    }

    /// Key for a failure on one log.
    #[must_use]
    pub fn log_level(
        pair_id: PairId,
        micro_block_hash: impl Into<String>,
        transaction_hash: impl Into<String>,
        log_index: i32,
    ) -> Self {
        Self {
            pair_id,
            micro_block_hash: micro_block_hash.into(),
            transaction_hash: transaction_hash.into(),
            log_index,
        }
    }
}

/// A stored error occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    /// Store key.
    pub id: i64,
    /// Where it happened.
    #[serde(flatten)]
    pub key: ErrorKey,
    /// Error message; part of the record's identity.
    pub error: String,
    /// How often this exact error was recorded.
    pub times_occurred: i32,
    /// First occurrence.
    pub created_at: DateTime<Utc>,
    /// Latest occurrence.
    pub updated_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Returns `true` if the record was updated less than `hours` before `now`.
    #[must_use]
    pub fn is_recent(&self, now: DateTime<Utc>, hours: u32) -> bool {
        self.updated_at > now - Duration::hours(i64::from(hours))
    }
}

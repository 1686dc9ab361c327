//! Liquidity history entries and their total ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PairId;
use crate::error::IndexerError;

/// Kind of liquidity change a history row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Synthetic first row at the pair's creation micro-block.
    CreatePair,
    /// Absolute reserves without an accompanying delta event.
    Sync,
    /// Swap through the pair.
    SwapTokens,
    /// Liquidity added.
    PairMint,
    /// Liquidity removed.
    PairBurn,
}

impl EventType {
    /// Stored discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreatePair => "CreatePair",
            Self::Sync => "Sync",
            Self::SwapTokens => "SwapTokens",
            Self::PairMint => "PairMint",
            Self::PairBurn => "PairBurn",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CreatePair" => Ok(Self::CreatePair),
            "Sync" => Ok(Self::Sync),
            "SwapTokens" => Ok(Self::SwapTokens),
            "PairMint" => Ok(Self::PairMint),
            "PairBurn" => Ok(Self::PairBurn),
            other => Err(IndexerError::Decode(format!("unknown event type {other}"))),
        }
    }
}

/// Position of a log in the chain.
///
/// Ordered by micro-block time, then transaction index, then log index.
/// The transaction index is the middleware's global index, so the tuple is
/// a total order even inside a single micro-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LogPosition {
    /// Micro-block time in milliseconds.
    pub micro_block_time: i64,
    /// Global transaction index.
    pub transaction_index: i64,
    /// Index of the log inside its transaction; `-1` for synthetic rows.
    pub log_index: i32,
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.micro_block_time
            .cmp(&other.micro_block_time)
            .then(self.transaction_index.cmp(&other.transaction_index))
            .then(self.log_index.cmp(&other.log_index))
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A history row ready to be upserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewHistoryEntry {
    /// Owning pair.
    pub pair_id: PairId,
    /// What happened.
    pub event_type: EventType,
    /// Absolute token0 reserve after the event.
    pub reserve0: u128,
    /// Absolute token1 reserve after the event.
    pub reserve1: u128,
    /// Signed token0 change.
    pub delta_reserve0: i128,
    /// Signed token1 change.
    pub delta_reserve1: i128,
    /// AE/USD price at the micro-block time.
    pub ae_usd_price: f64,
    /// Key-block height.
    pub height: u64,
    /// Micro-block hash (`mh_…`).
    pub micro_block_hash: String,
    /// Micro-block time in milliseconds.
    pub micro_block_time: i64,
    /// Transaction hash (`th_…`).
    pub transaction_hash: String,
    /// Global transaction index.
    pub transaction_index: i64,
    /// Log index; `-1` for synthetic rows.
    pub log_index: i32,
    /// Account that signed the transaction.
    pub sender_account: String,
}

impl NewHistoryEntry {
    /// Chain position of the row.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        LogPosition {
            micro_block_time: self.micro_block_time,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }
}

/// A stored history row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    /// Store key.
    pub id: i64,
    /// Stored values.
    #[serde(flatten)]
    pub entry: NewHistoryEntry,
}

impl HistoryEntry {
    /// Chain position of the row.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        self.entry.position()
    }
}

/// A stored row joined with the addresses needed to re-check it upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntryContext {
    /// The stored row.
    pub history: HistoryEntry,
    /// Pair contract address.
    pub pair_address: String,
    /// Token0 contract address.
    pub token0_address: String,
    /// Token1 contract address.
    pub token1_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(t: i64, tx: i64, log: i32) -> LogPosition {
        LogPosition {
            micro_block_time: t,
            transaction_index: tx,
            log_index: log,
        }
    }

    #[test]
    fn same_block_ordered_by_transaction_then_log() {
        assert!(pos(10, 5, 3) < pos(10, 6, 0));
        assert!(pos(10, 6, 0) < pos(10, 6, 1));
        assert!(pos(9, 100, 9) < pos(10, 1, 0));
    }

    #[test]
    fn event_type_round_trips_through_str() {
        for kind in [
            EventType::CreatePair,
            EventType::Sync,
            EventType::SwapTokens,
            EventType::PairMint,
            EventType::PairBurn,
        ] {
            let parsed: Result<EventType, _> = kind.as_str().parse();
            assert_eq!(parsed.ok(), Some(kind));
        }
        assert!("Transfer".parse::<EventType>().is_err());
    }
}

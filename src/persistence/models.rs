//! Database row models and their conversion into domain types.
//!
//! Big integers are stored as `NUMERIC(78,0)` and selected as text, so the
//! conversions here parse them back into `u128` / `i128`.

use chrono::{DateTime, Utc};

use crate::domain::{
    ErrorKey, ErrorRecord, HistoryEntry, HistoryEntryContext, NewHistoryEntry, Pair, PairId,
    PairToken,
};
use crate::error::IndexerError;

/// A `pairs` row joined with both tokens.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PairRow {
    /// Pair key.
    pub id: i32,
    /// Pair address.
    pub address: String,
    /// Snapshot current.
    pub synchronized: bool,
    /// Token0 key.
    pub token0_id: i32,
    /// Token0 address.
    pub token0_address: String,
    /// Token0 malformed flag.
    pub token0_malformed: bool,
    /// Token0 no-contract flag.
    pub token0_no_contract: bool,
    /// Token1 key.
    pub token1_id: i32,
    /// Token1 address.
    pub token1_address: String,
    /// Token1 malformed flag.
    pub token1_malformed: bool,
    /// Token1 no-contract flag.
    pub token1_no_contract: bool,
}

impl From<PairRow> for Pair {
    fn from(row: PairRow) -> Self {
        Self {
            id: PairId::new(row.id),
            address: row.address,
            token0: PairToken {
                id: row.token0_id,
                address: row.token0_address,
                malformed: row.token0_malformed,
                no_contract: row.token0_no_contract,
            },
            token1: PairToken {
                id: row.token1_id,
                address: row.token1_address,
                malformed: row.token1_malformed,
                no_contract: row.token1_no_contract,
            },
            synchronized: row.synchronized,
        }
    }
}

/// A `pair_liquidity_info_history` row with numerics selected as text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryRow {
    /// Row key.
    pub id: i64,
    /// Owning pair.
    pub pair_id: i32,
    /// Event type discriminator.
    pub event_type: String,
    /// Token0 reserve.
    pub reserve0: String,
    /// Token1 reserve.
    pub reserve1: String,
    /// Token0 delta.
    pub delta_reserve0: String,
    /// Token1 delta.
    pub delta_reserve1: String,
    /// AE/USD price.
    pub ae_usd_price: f64,
    /// Key-block height.
    pub height: i64,
    /// Micro-block hash.
    pub micro_block_hash: String,
    /// Micro-block time (ms).
    pub micro_block_time: i64,
    /// Transaction hash.
    pub transaction_hash: String,
    /// Global transaction index.
    pub transaction_index: i64,
    /// Log index.
    pub log_index: i32,
    /// Transaction signer.
    pub sender_account: String,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = IndexerError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            entry: NewHistoryEntry {
                pair_id: PairId::new(row.pair_id),
                event_type: row.event_type.parse()?,
                reserve0: parse_numeric(&row.reserve0)?,
                reserve1: parse_numeric(&row.reserve1)?,
                delta_reserve0: parse_numeric(&row.delta_reserve0)?,
                delta_reserve1: parse_numeric(&row.delta_reserve1)?,
                ae_usd_price: row.ae_usd_price,
                height: u64::try_from(row.height)
                    .map_err(|_| IndexerError::Decode(format!("negative height {}", row.height)))?,
                micro_block_hash: row.micro_block_hash,
                micro_block_time: row.micro_block_time,
                transaction_hash: row.transaction_hash,
                transaction_index: row.transaction_index,
                log_index: row.log_index,
                sender_account: row.sender_account,
            },
        })
    }
}

/// A history row joined with pair and token addresses.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryContextRow {
    /// The history columns.
    #[sqlx(flatten)]
    pub history: HistoryRow,
    /// Pair address.
    pub pair_address: String,
    /// Token0 address.
    pub token0_address: String,
    /// Token1 address.
    pub token1_address: String,
}

impl TryFrom<HistoryContextRow> for HistoryEntryContext {
    type Error = IndexerError;

    fn try_from(row: HistoryContextRow) -> Result<Self, Self::Error> {
        Ok(Self {
            history: row.history.try_into()?,
            pair_address: row.pair_address,
            token0_address: row.token0_address,
            token1_address: row.token1_address,
        })
    }
}

/// A `pair_liquidity_info_history_errors` row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ErrorRow {
    /// Row key.
    pub id: i64,
    /// Pair key.
    pub pair_id: i32,
    /// Micro-block hash (empty for pair-level errors).
    pub micro_block_hash: String,
    /// Transaction hash (empty for pair-level errors).
    pub transaction_hash: String,
    /// Log index (`-1` for pair-level errors).
    pub log_index: i32,
    /// Error message.
    pub error: String,
    /// Occurrence counter.
    pub times_occurred: i32,
    /// First occurrence.
    pub created_at: DateTime<Utc>,
    /// Latest occurrence.
    pub updated_at: DateTime<Utc>,
}

impl From<ErrorRow> for ErrorRecord {
    fn from(row: ErrorRow) -> Self {
        Self {
            id: row.id,
            key: ErrorKey {
                pair_id: PairId::new(row.pair_id),
                micro_block_hash: row.micro_block_hash,
                transaction_hash: row.transaction_hash,
                log_index: row.log_index,
            },
            error: row.error,
            times_occurred: row.times_occurred,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Parses a `NUMERIC` column selected as text.
///
/// # Errors
///
/// Returns [`IndexerError::Decode`] for non-integer text.
pub fn parse_numeric<T: std::str::FromStr>(text: &str) -> Result<T, IndexerError>
where
    T::Err: std::fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| IndexerError::Decode(format!("numeric column {text:?}: {e}")))
}

//! Persistence layer: tokens, pairs, liquidity snapshots, history, errors.
//!
//! [`PersistenceGateway`] is the only path through which rows are mutated.
//! Every write is an upsert or delete keyed by a unique index, so the store
//! itself serializes concurrent writers. [`postgres::PostgresGateway`] is the
//! production implementation; [`memory::InMemoryGateway`] implements the same
//! contract in process.

pub mod memory;
pub mod models;
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;

use crate::domain::{
    ErrorKey, ErrorRecord, HistoryEntry, HistoryEntryContext, LogPosition, NewHistoryEntry,
    NewToken, Pair, PairId, PairLiquidity, SyncStatus,
};
use crate::error::IndexerError;

pub use memory::InMemoryGateway;
pub use postgres::PostgresGateway;

/// Typed store operations consumed by the sync services.
#[async_trait]
pub trait PersistenceGateway: Send + Sync + std::fmt::Debug {
    /// Addresses of every known token.
    async fn token_addresses(&self) -> Result<HashSet<String>, IndexerError>;

    /// Inserts a token; an existing address is left untouched.
    async fn insert_token(&self, token: &NewToken) -> Result<(), IndexerError>;

    /// Number of known pairs.
    async fn count_pairs(&self) -> Result<u64, IndexerError>;

    /// Every pair with its tokens, ascending by id.
    async fn all_pairs(&self) -> Result<Vec<Pair>, IndexerError>;

    /// Looks a pair up by contract address.
    async fn pair_by_address(&self, address: &str) -> Result<Option<Pair>, IndexerError>;

    /// Inserts a pair referencing two known tokens and returns it.
    async fn insert_pair(
        &self,
        address: &str,
        token0: &str,
        token1: &str,
    ) -> Result<Pair, IndexerError>;

    /// Sets `synchronized = false` on every pair.
    async fn mark_all_pairs_unsynchronized(&self) -> Result<u64, IndexerError>;

    /// Upserts the pair's current snapshot and sets `synchronized = true`.
    async fn synchronize_pair(
        &self,
        pair_id: PairId,
        liquidity: &PairLiquidity,
    ) -> Result<(), IndexerError>;

    /// Pair counters for the status endpoint.
    async fn sync_status(&self) -> Result<SyncStatus, IndexerError>;

    /// Upserts a history row on (pair, micro-block hash, transaction hash,
    /// log index); a conflicting row is overwritten field by field.
    async fn upsert_liquidity_history(
        &self,
        entry: &NewHistoryEntry,
    ) -> Result<HistoryEntry, IndexerError>;

    /// Most recent row of a pair by position.
    async fn last_synced_entry(&self, pair_id: PairId)
    -> Result<Option<HistoryEntry>, IndexerError>;

    /// Most recent row of a pair strictly before `position`.
    async fn last_entry_before(
        &self,
        pair_id: PairId,
        position: LogPosition,
    ) -> Result<Option<HistoryEntry>, IndexerError>;

    /// Rows at or above `height_floor`, ascending by position, joined with
    /// pair and token addresses.
    async fn entries_within_height(
        &self,
        height_floor: u64,
    ) -> Result<Vec<HistoryEntryContext>, IndexerError>;

    /// Deletes every row with `micro_block_time >= from_time`; returns the
    /// number of rows removed.
    async fn delete_history_from_time(&self, from_time: i64) -> Result<u64, IndexerError>;

    /// Records an error occurrence keyed by location and message.
    async fn upsert_error_record(
        &self,
        key: &ErrorKey,
        error: &str,
    ) -> Result<ErrorRecord, IndexerError>;

    /// Latest error at `key` updated less than `hours` ago.
    async fn error_within_hours(
        &self,
        key: &ErrorKey,
        hours: u32,
    ) -> Result<Option<ErrorRecord>, IndexerError>;
}

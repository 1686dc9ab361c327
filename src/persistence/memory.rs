//! In-process implementation of the persistence gateway.
//!
//! Mirrors the unique indexes and ordering of the Postgres schema so the
//! sync services can run without a database (tests, dry runs).

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::PersistenceGateway;
use crate::domain::{
    ErrorKey, ErrorRecord, HistoryEntry, HistoryEntryContext, LogPosition, NewHistoryEntry,
    NewToken, Pair, PairId, PairLiquidity, PairToken, SyncStatus, Token,
};
use crate::error::IndexerError;

type HistoryKey = (PairId, String, String, i32);
type ErrorRecordKey = (ErrorKey, String);

#[derive(Debug, Default)]
struct State {
    tokens: Vec<Token>,
    pairs: Vec<(PairId, String, i32, i32, bool)>,
    snapshots: HashMap<PairId, PairLiquidity>,
    history: BTreeMap<HistoryKey, HistoryEntry>,
    errors: HashMap<ErrorRecordKey, ErrorRecord>,
    next_history_id: i64,
    next_error_id: i64,
}

impl State {
    fn token(&self, id: i32) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }

    fn token_by_address(&self, address: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.address == address)
    }

    fn pair(&self, row: &(PairId, String, i32, i32, bool)) -> Option<Pair> {
        let (id, address, token0_id, token1_id, synchronized) = row;
        let side = |token: &Token| PairToken {
            id: token.id,
            address: token.address.clone(),
            malformed: token.malformed,
            no_contract: token.no_contract,
        };
        Some(Pair {
            id: *id,
            address: address.clone(),
            token0: side(self.token(*token0_id)?),
            token1: side(self.token(*token1_id)?),
            synchronized: *synchronized,
        })
    }

    fn history_of(&self, pair_id: PairId) -> impl Iterator<Item = &HistoryEntry> {
        self.history
            .values()
            .filter(move |h| h.entry.pair_id == pair_id)
    }
}

/// Gateway keeping every table in memory behind one lock.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: RwLock<State>,
}

impl InMemoryGateway {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All tokens, in insertion order.
    pub async fn tokens(&self) -> Vec<Token> {
        self.state.read().await.tokens.clone()
    }

    /// Current snapshot of a pair.
    pub async fn snapshot(&self, pair_id: PairId) -> Option<PairLiquidity> {
        self.state.read().await.snapshots.get(&pair_id).copied()
    }

    /// History rows of a pair ascending by position.
    pub async fn history(&self, pair_id: PairId) -> Vec<HistoryEntry> {
        let state = self.state.read().await;
        let mut rows: Vec<HistoryEntry> = state.history_of(pair_id).cloned().collect();
        rows.sort_by_key(HistoryEntry::position);
        rows
    }

    /// All error records.
    pub async fn error_records(&self) -> Vec<ErrorRecord> {
        self.state.read().await.errors.values().cloned().collect()
    }

    /// Seeds an error record with an explicit `updated_at`.
    pub async fn insert_error_record_at(
        &self,
        key: ErrorKey,
        error: &str,
        updated_at: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        state.next_error_id += 1;
        let record = ErrorRecord {
            id: state.next_error_id,
            key: key.clone(),
            error: error.to_string(),
            times_occurred: 1,
            created_at: updated_at,
            updated_at,
        };
        state.errors.insert((key, error.to_string()), record);
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn token_addresses(&self) -> Result<HashSet<String>, IndexerError> {
        let state = self.state.read().await;
        Ok(state.tokens.iter().map(|t| t.address.clone()).collect())
    }

    async fn insert_token(&self, token: &NewToken) -> Result<(), IndexerError> {
        let mut state = self.state.write().await;
        if state.token_by_address(&token.address).is_some() {
            return Ok(());
        }
        let id = i32::try_from(state.tokens.len() + 1).unwrap_or(i32::MAX);
        state.tokens.push(Token {
            id,
            address: token.address.clone(),
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            decimals: token.decimals,
            malformed: token.malformed,
            no_contract: token.no_contract,
            listed: false,
        });
        Ok(())
    }

    async fn count_pairs(&self) -> Result<u64, IndexerError> {
        Ok(self.state.read().await.pairs.len() as u64)
    }

    async fn all_pairs(&self) -> Result<Vec<Pair>, IndexerError> {
        let state = self.state.read().await;
        Ok(state.pairs.iter().filter_map(|row| state.pair(row)).collect())
    }

    async fn pair_by_address(&self, address: &str) -> Result<Option<Pair>, IndexerError> {
        let state = self.state.read().await;
        Ok(state
            .pairs
            .iter()
            .find(|row| row.1 == address)
            .and_then(|row| state.pair(row)))
    }

    async fn insert_pair(
        &self,
        address: &str,
        token0: &str,
        token1: &str,
    ) -> Result<Pair, IndexerError> {
        let mut state = self.state.write().await;
        if let Some(row) = state.pairs.iter().find(|row| row.1 == address) {
            return state
                .pair(row)
                .ok_or_else(|| IndexerError::NotFound(format!("tokens of pair {address}")));
        }
        let (Some(t0), Some(t1)) = (
            state.token_by_address(token0).map(|t| t.id),
            state.token_by_address(token1).map(|t| t.id),
        ) else {
            return Err(IndexerError::NotFound(format!(
                "pair {address} not inserted: tokens {token0} / {token1} unknown"
            )));
        };
        let id = PairId::new(i32::try_from(state.pairs.len() + 1).unwrap_or(i32::MAX));
        let row = (id, address.to_string(), t0, t1, false);
        let pair = state
            .pair(&row)
            .ok_or_else(|| IndexerError::NotFound(format!("tokens of pair {address}")))?;
        state.pairs.push(row);
        Ok(pair)
    }

    async fn mark_all_pairs_unsynchronized(&self) -> Result<u64, IndexerError> {
        let mut state = self.state.write().await;
        for row in &mut state.pairs {
            row.4 = false;
        }
        Ok(state.pairs.len() as u64)
    }

    async fn synchronize_pair(
        &self,
        pair_id: PairId,
        liquidity: &PairLiquidity,
    ) -> Result<(), IndexerError> {
        let mut state = self.state.write().await;
        let Some(row) = state.pairs.iter_mut().find(|row| row.0 == pair_id) else {
            return Err(IndexerError::NotFound(format!("pair {pair_id}")));
        };
        row.4 = true;
        state.snapshots.insert(pair_id, *liquidity);
        Ok(())
    }

    async fn sync_status(&self) -> Result<SyncStatus, IndexerError> {
        let state = self.state.read().await;
        Ok(SyncStatus {
            pairs: state.pairs.len() as u64,
            synchronized: state.pairs.iter().filter(|row| row.4).count() as u64,
        })
    }

    async fn upsert_liquidity_history(
        &self,
        entry: &NewHistoryEntry,
    ) -> Result<HistoryEntry, IndexerError> {
        let mut state = self.state.write().await;
        let key = (
            entry.pair_id,
            entry.micro_block_hash.clone(),
            entry.transaction_hash.clone(),
            entry.log_index,
        );
        let id = match state.history.get(&key) {
            Some(existing) => existing.id,
            None => {
                state.next_history_id += 1;
                state.next_history_id
            }
        };
        let stored = HistoryEntry {
            id,
            entry: entry.clone(),
        };
        state.history.insert(key, stored.clone());
        Ok(stored)
    }

    async fn last_synced_entry(
        &self,
        pair_id: PairId,
    ) -> Result<Option<HistoryEntry>, IndexerError> {
        let state = self.state.read().await;
        Ok(state
            .history_of(pair_id)
            .max_by_key(|h| h.position())
            .cloned())
    }

    async fn last_entry_before(
        &self,
        pair_id: PairId,
        position: LogPosition,
    ) -> Result<Option<HistoryEntry>, IndexerError> {
        let state = self.state.read().await;
        Ok(state
            .history_of(pair_id)
            .filter(|h| h.position() < position)
            .max_by_key(|h| h.position())
            .cloned())
    }

    async fn entries_within_height(
        &self,
        height_floor: u64,
    ) -> Result<Vec<HistoryEntryContext>, IndexerError> {
        let state = self.state.read().await;
        let pairs: HashMap<PairId, Pair> = state
            .pairs
            .iter()
            .filter_map(|row| state.pair(row))
            .map(|p| (p.id, p))
            .collect();

        let mut rows: Vec<HistoryEntryContext> = state
            .history
            .values()
            .filter(|h| h.entry.height >= height_floor)
            .filter_map(|h| {
                let pair = pairs.get(&h.entry.pair_id)?;
                Some(HistoryEntryContext {
                    history: h.clone(),
                    pair_address: pair.address.clone(),
                    token0_address: pair.token0.address.clone(),
                    token1_address: pair.token1.address.clone(),
                })
            })
            .collect();
        rows.sort_by_key(|row| row.history.position());
        Ok(rows)
    }

    async fn delete_history_from_time(&self, from_time: i64) -> Result<u64, IndexerError> {
        let mut state = self.state.write().await;
        let before = state.history.len();
        state
            .history
            .retain(|_, h| h.entry.micro_block_time < from_time);
        Ok((before - state.history.len()) as u64)
    }

    async fn upsert_error_record(
        &self,
        key: &ErrorKey,
        error: &str,
    ) -> Result<ErrorRecord, IndexerError> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let record_key = (key.clone(), error.to_string());
        if let Some(existing) = state.errors.get_mut(&record_key) {
            existing.times_occurred += 1;
            existing.updated_at = now;
            return Ok(existing.clone());
        }
        state.next_error_id += 1;
        let record = ErrorRecord {
            id: state.next_error_id,
            key: key.clone(),
            error: error.to_string(),
            times_occurred: 1,
            created_at: now,
            updated_at: now,
        };
        state.errors.insert(record_key, record.clone());
        Ok(record)
    }

    async fn error_within_hours(
        &self,
        key: &ErrorKey,
        hours: u32,
    ) -> Result<Option<ErrorRecord>, IndexerError> {
        let state = self.state.read().await;
        let now = Utc::now();
        Ok(state
            .errors
            .values()
            .filter(|r| &r.key == key && r.is_recent(now, hours))
            .max_by_key(|r| r.updated_at)
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::EventType;

    async fn seeded() -> (InMemoryGateway, Pair) {
        let gw = InMemoryGateway::new();
        for address in ["ct_a", "ct_b"] {
            let token = NewToken::degraded(address.to_string(), false);
            let _ = gw.insert_token(&token).await;
        }
        let Ok(pair) = gw.insert_pair("ct_pair", "ct_a", "ct_b").await else {
            panic!("pair insert failed");
        };
        (gw, pair)
    }

    fn entry(pair_id: PairId, time: i64, log_index: i32, reserve0: u128) -> NewHistoryEntry {
        NewHistoryEntry {
            pair_id,
            event_type: EventType::Sync,
            reserve0,
            reserve1: 0,
            delta_reserve0: 0,
            delta_reserve1: 0,
            ae_usd_price: 0.0,
            height: 10,
            micro_block_hash: format!("mh_{time}"),
            micro_block_time: time,
            transaction_hash: format!("th_{time}"),
            transaction_index: time,
            log_index,
            sender_account: String::new(),
        }
    }

    #[tokio::test]
    async fn upsert_same_key_keeps_one_row_with_latest_values() {
        let (gw, pair) = seeded().await;
        let _ = gw.upsert_liquidity_history(&entry(pair.id, 1, 0, 5)).await;
        let _ = gw.upsert_liquidity_history(&entry(pair.id, 1, 0, 9)).await;

        let rows = gw.history(pair.id).await;
        assert_eq!(rows.len(), 1);
        let Some(row) = rows.first() else {
            panic!("row missing");
        };
        assert_eq!(row.entry.reserve0, 9);
    }

    #[tokio::test]
    async fn insert_pair_requires_known_tokens() {
        let (gw, _) = seeded().await;
        let result = gw.insert_pair("ct_other", "ct_a", "ct_missing").await;
        assert!(matches!(result, Err(IndexerError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_from_time_is_inclusive() {
        let (gw, pair) = seeded().await;
        for t in 1..=4 {
            let _ = gw.upsert_liquidity_history(&entry(pair.id, t, 0, 1)).await;
        }
        let deleted = gw.delete_history_from_time(3).await.unwrap_or_default();
        assert_eq!(deleted, 2);
        assert_eq!(gw.history(pair.id).await.len(), 2);
    }

    #[tokio::test]
    async fn error_upsert_counts_repeated_messages_only() {
        let (gw, pair) = seeded().await;
        let key = ErrorKey::pair_level(pair.id);
        let _ = gw.upsert_error_record(&key, "timeout").await;
        let second = gw.upsert_error_record(&key, "timeout").await;
        let _ = gw.upsert_error_record(&key, "bad gateway").await;

        let Ok(second) = second else {
            panic!("upsert failed");
        };
        assert_eq!(second.times_occurred, 2);
        assert_eq!(gw.error_records().await.len(), 2);
    }
}

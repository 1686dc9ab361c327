//! PostgreSQL implementation of the persistence gateway.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;

use super::PersistenceGateway;
use super::models::{ErrorRow, HistoryContextRow, HistoryRow, PairRow};
use crate::domain::{
    ErrorKey, ErrorRecord, HistoryEntry, HistoryEntryContext, LogPosition, NewHistoryEntry,
    NewToken, Pair, PairId, PairLiquidity, SyncStatus,
};
use crate::error::IndexerError;

const PAIR_SELECT: &str = "SELECT p.id, p.address, p.synchronized, \
     t0.id AS token0_id, t0.address AS token0_address, \
     t0.malformed AS token0_malformed, t0.no_contract AS token0_no_contract, \
     t1.id AS token1_id, t1.address AS token1_address, \
     t1.malformed AS token1_malformed, t1.no_contract AS token1_no_contract \
     FROM pairs p \
     JOIN tokens t0 ON t0.id = p.token0_id \
     JOIN tokens t1 ON t1.id = p.token1_id";

const HISTORY_COLUMNS: &str = "h.id, h.pair_id, h.event_type, \
     h.reserve0::text AS reserve0, h.reserve1::text AS reserve1, \
     h.delta_reserve0::text AS delta_reserve0, h.delta_reserve1::text AS delta_reserve1, \
     h.ae_usd_price, h.height, h.micro_block_hash, h.micro_block_time, \
     h.transaction_hash, h.transaction_index, h.log_index, h.sender_account";

const HISTORY_ORDER_DESC: &str =
    "ORDER BY h.micro_block_time DESC, h.transaction_index DESC, h.log_index DESC";

const ERROR_COLUMNS: &str = "id, pair_id, micro_block_hash, transaction_hash, log_index, \
     error, times_occurred, created_at, updated_at";

/// PostgreSQL-backed gateway using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    /// Creates a gateway over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Persistence`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), IndexerError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IndexerError::Persistence(e.to_string()))
    }
}

fn to_i64(value: u64, what: &str) -> Result<i64, IndexerError> {
    i64::try_from(value).map_err(|_| IndexerError::Persistence(format!("{what} {value} overflows")))
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    async fn token_addresses(&self) -> Result<HashSet<String>, IndexerError> {
        let rows = sqlx::query_scalar::<_, String>("SELECT address FROM tokens")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_token(&self, token: &NewToken) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO tokens (address, symbol, name, decimals, malformed, no_contract) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (address) DO NOTHING",
        )
        .bind(&token.address)
        .bind(&token.symbol)
        .bind(&token.name)
        .bind(token.decimals)
        .bind(token.malformed)
        .bind(token.no_contract)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_pairs(&self) -> Result<u64, IndexerError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pairs")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn all_pairs(&self) -> Result<Vec<Pair>, IndexerError> {
        let rows = sqlx::query_as::<_, PairRow>(&format!("{PAIR_SELECT} ORDER BY p.id ASC"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Pair::from).collect())
    }

    async fn pair_by_address(&self, address: &str) -> Result<Option<Pair>, IndexerError> {
        let row = sqlx::query_as::<_, PairRow>(&format!("{PAIR_SELECT} WHERE p.address = $1"))
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Pair::from))
    }

    async fn insert_pair(
        &self,
        address: &str,
        token0: &str,
        token1: &str,
    ) -> Result<Pair, IndexerError> {
        sqlx::query(
            "INSERT INTO pairs (address, token0_id, token1_id) \
             SELECT $1, t0.id, t1.id FROM tokens t0, tokens t1 \
             WHERE t0.address = $2 AND t1.address = $3 \
             ON CONFLICT (address) DO NOTHING",
        )
        .bind(address)
        .bind(token0)
        .bind(token1)
        .execute(&self.pool)
        .await?;

        self.pair_by_address(address).await?.ok_or_else(|| {
            IndexerError::NotFound(format!(
                "pair {address} not inserted: tokens {token0} / {token1} unknown"
            ))
        })
    }

    async fn mark_all_pairs_unsynchronized(&self) -> Result<u64, IndexerError> {
        let result = sqlx::query("UPDATE pairs SET synchronized = FALSE")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn synchronize_pair(
        &self,
        pair_id: PairId,
        liquidity: &PairLiquidity,
    ) -> Result<(), IndexerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO pair_liquidity_info (pair_id, total_supply, reserve0, reserve1, height) \
             VALUES ($1, $2::numeric, $3::numeric, $4::numeric, $5) \
             ON CONFLICT (pair_id) DO UPDATE SET \
             total_supply = EXCLUDED.total_supply, reserve0 = EXCLUDED.reserve0, \
             reserve1 = EXCLUDED.reserve1, height = EXCLUDED.height, updated_at = NOW()",
        )
        .bind(pair_id.get())
        .bind(liquidity.total_supply.to_string())
        .bind(liquidity.reserve0.to_string())
        .bind(liquidity.reserve1.to_string())
        .bind(to_i64(liquidity.height, "height")?)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE pairs SET synchronized = TRUE WHERE id = $1")
            .bind(pair_id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn sync_status(&self) -> Result<SyncStatus, IndexerError> {
        let (pairs, synchronized) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE synchronized) FROM pairs",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(SyncStatus {
            pairs: u64::try_from(pairs).unwrap_or_default(),
            synchronized: u64::try_from(synchronized).unwrap_or_default(),
        })
    }

    async fn upsert_liquidity_history(
        &self,
        entry: &NewHistoryEntry,
    ) -> Result<HistoryEntry, IndexerError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "WITH h AS ( \
             INSERT INTO pair_liquidity_info_history ( \
               pair_id, event_type, reserve0, reserve1, delta_reserve0, delta_reserve1, \
               ae_usd_price, height, micro_block_hash, micro_block_time, transaction_hash, \
               transaction_index, log_index, sender_account) \
             VALUES ($1, $2, $3::numeric, $4::numeric, $5::numeric, $6::numeric, \
               $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT ON CONSTRAINT pair_liquidity_info_history_event_key DO UPDATE SET \
               event_type = EXCLUDED.event_type, reserve0 = EXCLUDED.reserve0, \
               reserve1 = EXCLUDED.reserve1, delta_reserve0 = EXCLUDED.delta_reserve0, \
               delta_reserve1 = EXCLUDED.delta_reserve1, ae_usd_price = EXCLUDED.ae_usd_price, \
               height = EXCLUDED.height, micro_block_time = EXCLUDED.micro_block_time, \
               transaction_index = EXCLUDED.transaction_index, \
               sender_account = EXCLUDED.sender_account, updated_at = NOW() \
             RETURNING *) \
             SELECT {HISTORY_COLUMNS} FROM h"
        ))
        .bind(entry.pair_id.get())
        .bind(entry.event_type.as_str())
        .bind(entry.reserve0.to_string())
        .bind(entry.reserve1.to_string())
        .bind(entry.delta_reserve0.to_string())
        .bind(entry.delta_reserve1.to_string())
        .bind(entry.ae_usd_price)
        .bind(to_i64(entry.height, "height")?)
        .bind(&entry.micro_block_hash)
        .bind(entry.micro_block_time)
        .bind(&entry.transaction_hash)
        .bind(entry.transaction_index)
        .bind(entry.log_index)
        .bind(&entry.sender_account)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn last_synced_entry(
        &self,
        pair_id: PairId,
    ) -> Result<Option<HistoryEntry>, IndexerError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM pair_liquidity_info_history h \
             WHERE h.pair_id = $1 {HISTORY_ORDER_DESC} LIMIT 1"
        ))
        .bind(pair_id.get())
        .fetch_optional(&self.pool)
        .await?;

        row.map(HistoryEntry::try_from).transpose()
    }

    async fn last_entry_before(
        &self,
        pair_id: PairId,
        position: LogPosition,
    ) -> Result<Option<HistoryEntry>, IndexerError> {
        let row = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM pair_liquidity_info_history h \
             WHERE h.pair_id = $1 \
             AND (h.micro_block_time, h.transaction_index, h.log_index) < ($2, $3, $4) \
             {HISTORY_ORDER_DESC} LIMIT 1"
        ))
        .bind(pair_id.get())
        .bind(position.micro_block_time)
        .bind(position.transaction_index)
        .bind(position.log_index)
        .fetch_optional(&self.pool)
        .await?;

        row.map(HistoryEntry::try_from).transpose()
    }

    async fn entries_within_height(
        &self,
        height_floor: u64,
    ) -> Result<Vec<HistoryEntryContext>, IndexerError> {
        let rows = sqlx::query_as::<_, HistoryContextRow>(&format!(
            "SELECT {HISTORY_COLUMNS}, p.address AS pair_address, \
             t0.address AS token0_address, t1.address AS token1_address \
             FROM pair_liquidity_info_history h \
             JOIN pairs p ON p.id = h.pair_id \
             JOIN tokens t0 ON t0.id = p.token0_id \
             JOIN tokens t1 ON t1.id = p.token1_id \
             WHERE h.height >= $1 \
             ORDER BY h.micro_block_time ASC, h.transaction_index ASC, h.log_index ASC"
        ))
        .bind(to_i64(height_floor, "height")?)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryEntryContext::try_from).collect()
    }

    async fn delete_history_from_time(&self, from_time: i64) -> Result<u64, IndexerError> {
        let result =
            sqlx::query("DELETE FROM pair_liquidity_info_history WHERE micro_block_time >= $1")
                .bind(from_time)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_error_record(
        &self,
        key: &ErrorKey,
        error: &str,
    ) -> Result<ErrorRecord, IndexerError> {
        let row = sqlx::query_as::<_, ErrorRow>(&format!(
            "INSERT INTO pair_liquidity_info_history_errors AS e \
             (pair_id, micro_block_hash, transaction_hash, log_index, error) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT ON CONSTRAINT pair_liquidity_info_history_errors_key DO UPDATE SET \
             times_occurred = e.times_occurred + 1, updated_at = NOW() \
             RETURNING {ERROR_COLUMNS}"
        ))
        .bind(key.pair_id.get())
        .bind(&key.micro_block_hash)
        .bind(&key.transaction_hash)
        .bind(key.log_index)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn error_within_hours(
        &self,
        key: &ErrorKey,
        hours: u32,
    ) -> Result<Option<ErrorRecord>, IndexerError> {
        let row = sqlx::query_as::<_, ErrorRow>(&format!(
            "SELECT {ERROR_COLUMNS} FROM pair_liquidity_info_history_errors \
             WHERE pair_id = $1 AND micro_block_hash = $2 AND transaction_hash = $3 \
             AND log_index = $4 AND updated_at > NOW() - make_interval(hours => $5) \
             ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(key.pair_id.get())
        .bind(&key.micro_block_hash)
        .bind(&key.transaction_hash)
        .bind(key.log_index)
        .bind(i32::try_from(hours).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ErrorRecord::from))
    }
}

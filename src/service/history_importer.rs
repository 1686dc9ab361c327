//! Liquidity history backfill from the middleware's log index.
//!
//! For each pair the importer reads the logs after its last stored row (or
//! the recent window, for pairs that are caught up), decodes them, merges
//! each `Sync` with the delta event that follows it, and upserts the rows.
//! Upserts are idempotent, so an interrupted run is resumed by the next.

use std::sync::Arc;

use crate::clients::{ChainClient, Middleware, PriceOracle};
use crate::domain::{
    ContractEvent, ContractLog, ErrorKey, EventType, LogPosition, NewHistoryEntry, Pair,
    parse_event,
};
use crate::error::IndexerError;
use crate::persistence::PersistenceGateway;

use super::error_ledger::ErrorLedger;

/// Importer settings.
#[derive(Debug, Clone, Copy)]
pub struct ImporterSettings {
    /// Blocks always re-read for caught-up pairs.
    pub sliding_window_blocks: u64,
    /// Price used when the oracle has none.
    pub default_ae_usd_price: f64,
}

/// Counters of one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Pairs processed.
    pub pairs: usize,
    /// Pairs skipped by the error ledger.
    pub skipped: usize,
    /// Pairs that failed.
    pub failed: usize,
    /// Rows upserted.
    pub rows: usize,
}

/// Which logs a pair import reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportWindow {
    /// Everything after the last stored position.
    After(LogPosition),
    /// Everything at or above a height.
    FromHeight(u64),
}

impl ImportWindow {
    /// Chooses the window from the last stored row.
    #[must_use]
    pub fn select(last: &NewHistoryEntry, current_height: u64, sliding_window: u64) -> Self {
        let floor = current_height.saturating_sub(sliding_window);
        if last.height < floor {
            Self::After(last.position())
        } else {
            Self::FromHeight(floor)
        }
    }

    /// Whether `log` belongs to the window.
    #[must_use]
    pub fn contains(&self, log: &ContractLog) -> bool {
        match self {
            Self::After(position) => log.position() > *position,
            Self::FromHeight(floor) => log.height >= *floor,
        }
    }
}

/// One row to persist, pointing at the log that gives it its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow<'a> {
    /// Log whose transaction identity the row carries.
    pub log: &'a ContractLog,
    /// Row type.
    pub event_type: EventType,
    /// Token0 reserve after the row.
    pub reserve0: u128,
    /// Token1 reserve after the row.
    pub reserve1: u128,
    /// Deltas of the merged delta event; `None` for a standalone `Sync`,
    /// whose deltas depend on the last persisted reserves.
    pub deltas: Option<(i128, i128)>,
}

impl MergedRow<'_> {
    /// Deltas of the row given the reserves of the last persisted row.
    #[must_use]
    pub fn deltas_after(&self, persisted: Option<(u128, u128)>) -> (i128, i128) {
        self.deltas.unwrap_or_else(|| {
            let (previous0, previous1) = persisted.unwrap_or((0, 0));
            (
                signed(self.reserve0) - signed(previous0),
                signed(self.reserve1) - signed(previous1),
            )
        })
    }
}

const fn event_type(event: &ContractEvent) -> EventType {
    match event {
        ContractEvent::Sync { .. } => EventType::Sync,
        ContractEvent::SwapTokens { .. } => EventType::SwapTokens,
        ContractEvent::PairMint { .. } => EventType::PairMint,
        ContractEvent::PairBurn { .. } => EventType::PairBurn,
    }
}

fn signed(value: u128) -> i128 {
    i128::try_from(value).unwrap_or(i128::MAX)
}

/// Merges decoded events (ascending by position) into rows.
///
/// A `Sync` followed by a delta event becomes one row with the `Sync`'s
/// reserves and the delta event's type, deltas and identity. A `Sync`
/// followed by another `Sync` (or by nothing) is kept on its own. A delta
/// event without a preceding `Sync` is dropped.
#[must_use]
pub fn merge_events(events: &[(ContractLog, ContractEvent)]) -> Vec<MergedRow<'_>> {
    let mut rows = Vec::with_capacity(events.len());
    let mut iter = events.iter().peekable();

    while let Some((log, event)) = iter.next() {
        let ContractEvent::Sync { reserve0, reserve1 } = *event else {
            tracing::warn!(
                transaction_hash = %log.call_tx_hash,
                log_index = log.log_idx,
                "delta event without preceding Sync skipped"
            );
            continue;
        };

        let next = iter.peek().copied();
        if let Some((next_log, next_event)) = next
            && let Some(deltas) = next_event.deltas()
        {
            iter.next();
            rows.push(MergedRow {
                log: next_log,
                event_type: event_type(next_event),
                reserve0,
                reserve1,
                deltas: Some(deltas),
            });
        } else {
            rows.push(MergedRow {
                log,
                event_type: EventType::Sync,
                reserve0,
                reserve1,
                deltas: None,
            });
        }
    }
    rows
}

fn log_key(pair: &Pair, log: &ContractLog) -> ErrorKey {
    ErrorKey::log_level(pair.id, &log.block_hash, &log.call_tx_hash, log.log_idx)
}

/// Backfills liquidity history for every pair.
#[derive(Debug)]
pub struct HistoryImporter {
    chain: Arc<dyn ChainClient>,
    middleware: Arc<dyn Middleware>,
    gateway: Arc<dyn PersistenceGateway>,
    prices: Arc<dyn PriceOracle>,
    ledger: ErrorLedger,
    settings: ImporterSettings,
}

impl HistoryImporter {
    /// Creates the importer.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        middleware: Arc<dyn Middleware>,
        gateway: Arc<dyn PersistenceGateway>,
        prices: Arc<dyn PriceOracle>,
        ledger: ErrorLedger,
        settings: ImporterSettings,
    ) -> Self {
        Self {
            chain,
            middleware,
            gateway,
            prices,
            ledger,
            settings,
        }
    }

    /// Imports every pair, one at a time.
    ///
    /// A failing pair is recorded in the error ledger and does not stop the
    /// run.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pair list cannot be read.
    pub async fn import(&self) -> Result<ImportSummary, IndexerError> {
        let pairs = self.gateway.all_pairs().await?;
        tracing::info!(pairs = pairs.len(), "history import started");
        let mut summary = ImportSummary::default();

        for pair in &pairs {
            summary.pairs += 1;
            match self.ledger.pair_suppression(pair.id).await {
                Ok(Some(record)) => {
                    tracing::info!(
                        pair = %pair.address,
                        error = %record.error,
                        since = %record.updated_at,
                        "pair skipped after recent error"
                    );
                    summary.skipped += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(pair = %pair.address, error = %e, "error ledger lookup failed");
                    summary.failed += 1;
                    continue;
                }
            }

            match self.import_pair(pair).await {
                Ok(rows) => summary.rows += rows,
                Err(e) => {
                    tracing::error!(pair = %pair.address, error = %e, "pair history import failed");
                    self.ledger.record(&ErrorKey::pair_level(pair.id), &e).await;
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Imports one pair and returns the number of rows upserted.
    ///
    /// # Errors
    ///
    /// Propagates failures that affect the whole pair. Failures on a single
    /// log are recorded and skipped.
    pub async fn import_pair(&self, pair: &Pair) -> Result<usize, IndexerError> {
        let last = match self.gateway.last_synced_entry(pair.id).await? {
            Some(last) => last.entry,
            None => self.insert_create_pair(pair).await?,
        };
        let current_height = self.chain.current_height().await?;
        let window = ImportWindow::select(&last, current_height, self.settings.sliding_window_blocks);

        let mut logs = self
            .middleware
            .contract_logs_until(&pair.address, &|log| window.contains(log))
            .await?;
        logs.retain(|log| window.contains(log));
        logs.sort_by_key(ContractLog::position);
        tracing::debug!(pair = %pair.address, ?window, logs = logs.len(), "pair logs fetched");

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            match parse_event(&log) {
                Ok(Some(event)) => events.push((log, event)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        pair = %pair.address,
                        transaction_hash = %log.call_tx_hash,
                        error = %e,
                        "undecodable pair log"
                    );
                    self.ledger.record(&log_key(pair, &log), &e).await;
                }
            }
        }
        let Some((first, _)) = events.first() else {
            return Ok(0);
        };

        let mut persisted = self
            .gateway
            .last_entry_before(pair.id, first.position())
            .await?
            .map(|previous| (previous.entry.reserve0, previous.entry.reserve1));

        let mut stored = 0;
        for row in merge_events(&events) {
            let key = log_key(pair, row.log);
            match self.ledger.log_suppression(&key).await {
                Ok(Some(_)) => {
                    tracing::debug!(
                        pair = %pair.address,
                        transaction_hash = %row.log.call_tx_hash,
                        "log skipped after recent error"
                    );
                    continue;
                }
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            match self.store_row(pair, &row, row.deltas_after(persisted)).await {
                Ok(()) => {
                    stored += 1;
                    persisted = Some((row.reserve0, row.reserve1));
                }
                Err(e) => {
                    tracing::warn!(
                        pair = %pair.address,
                        transaction_hash = %row.log.call_tx_hash,
                        log_index = row.log.log_idx,
                        error = %e,
                        "history row import failed"
                    );
                    self.ledger.record(&key, &e).await;
                }
            }
        }
        tracing::debug!(pair = %pair.address, rows = stored, "pair history imported");
        Ok(stored)
    }

    async fn price_at(&self, time_ms: i64) -> f64 {
        self.prices
            .price_at(time_ms)
            .await
            .unwrap_or(self.settings.default_ae_usd_price)
    }

    async fn store_row(
        &self,
        pair: &Pair,
        row: &MergedRow<'_>,
        (delta0, delta1): (i128, i128),
    ) -> Result<(), IndexerError> {
        let log = row.log;
        let sender_account = self.middleware.transaction_sender(&log.call_tx_hash).await?;
        let entry = NewHistoryEntry {
            pair_id: pair.id,
            event_type: row.event_type,
            reserve0: row.reserve0,
            reserve1: row.reserve1,
            delta_reserve0: delta0,
            delta_reserve1: delta1,
            ae_usd_price: self.price_at(log.block_time).await,
            height: log.height,
            micro_block_hash: log.block_hash.clone(),
            micro_block_time: log.block_time,
            transaction_hash: log.call_tx_hash.clone(),
            transaction_index: log.call_txi,
            log_index: log.log_idx,
            sender_account,
        };
        self.gateway.upsert_liquidity_history(&entry).await?;
        Ok(())
    }

    /// Stores the synthetic first row of a pair at its creation point.
    async fn insert_create_pair(&self, pair: &Pair) -> Result<NewHistoryEntry, IndexerError> {
        let created = self.middleware.contract_creation(&pair.address).await?;
        let sender_account = self
            .middleware
            .transaction_sender(&created.transaction_hash)
            .await?;
        let entry = NewHistoryEntry {
            pair_id: pair.id,
            event_type: EventType::CreatePair,
            reserve0: 0,
            reserve1: 0,
            delta_reserve0: 0,
            delta_reserve1: 0,
            ae_usd_price: self.price_at(created.micro_block_time).await,
            height: created.height,
            micro_block_hash: created.micro_block_hash,
            micro_block_time: created.micro_block_time,
            transaction_hash: created.transaction_hash,
            transaction_index: created.transaction_index,
            log_index: -1,
            sender_account,
        };
        let stored = self.gateway.upsert_liquidity_history(&entry).await?;
        tracing::info!(pair = %pair.address, height = stored.entry.height, "pair creation recorded");
        Ok(stored.entry)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::clients::ContractCreation;
    use crate::domain::NewToken;
    use crate::persistence::InMemoryGateway;
    use crate::testing::{FakeChain, FakeMiddleware, FixedPriceOracle, pair_log};

    const PAIR: &str = "ct_pair";

    struct Harness {
        chain: Arc<FakeChain>,
        middleware: Arc<FakeMiddleware>,
        gateway: Arc<InMemoryGateway>,
        importer: HistoryImporter,
        pair: Pair,
    }

    async fn harness(height: u64) -> Harness {
        let chain = Arc::new(FakeChain::new(height));
        let middleware = Arc::new(FakeMiddleware::default());
        let gateway = Arc::new(InMemoryGateway::new());
        for token in ["ct_t0", "ct_t1"] {
            let _ = gateway
                .insert_token(&NewToken::degraded(token.to_string(), false))
                .await;
        }
        let Ok(pair) = gateway.insert_pair(PAIR, "ct_t0", "ct_t1").await else {
            panic!("pair should be inserted");
        };
        middleware
            .set_creation(
                PAIR,
                ContractCreation {
                    micro_block_hash: "mh_create".to_string(),
                    micro_block_time: 100,
                    height: 10,
                    transaction_hash: "th_create".to_string(),
                    transaction_index: 1,
                },
            )
            .await;
        let gateway_dyn = Arc::clone(&gateway) as Arc<dyn PersistenceGateway>;
        let importer = HistoryImporter::new(
            Arc::clone(&chain) as Arc<dyn ChainClient>,
            Arc::clone(&middleware) as Arc<dyn Middleware>,
            Arc::clone(&gateway_dyn),
            Arc::new(FixedPriceOracle(None)),
            ErrorLedger::new(gateway_dyn, 6),
            ImporterSettings {
                sliding_window_blocks: 10,
                default_ae_usd_price: 0.05,
            },
        );
        Harness {
            chain,
            middleware,
            gateway,
            importer,
            pair,
        }
    }

    fn sync(reserve0: &str, reserve1: &str, at: (i64, i64, i32), height: u64) -> ContractLog {
        pair_log(PAIR, "Sync", &[reserve0, reserve1], "", at, height)
    }

    fn mint(amount0: &str, amount1: &str, at: (i64, i64, i32), height: u64) -> ContractLog {
        pair_log(PAIR, "PairMint", &["ak_lp", amount0, amount1], "", at, height)
    }

    fn swap(data: &str, at: (i64, i64, i32), height: u64) -> ContractLog {
        pair_log(PAIR, "SwapTokens", &["ak_trader", "ak_to"], data, at, height)
    }

    fn decoded(logs: Vec<ContractLog>) -> Vec<(ContractLog, ContractEvent)> {
        logs.into_iter()
            .filter_map(|log| match parse_event(&log) {
                Ok(Some(event)) => Some((log, event)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn sync_then_delta_merges_into_one_row() {
        let events = decoded(vec![
            sync("100", "100", (1, 1, 0), 20),
            mint("23", "0", (1, 1, 1), 20),
        ]);
        let rows = merge_events(&events);
        let [row] = rows.as_slice() else {
            panic!("expected one merged row, got {rows:?}");
        };
        assert_eq!(row.event_type, EventType::PairMint);
        assert_eq!((row.reserve0, row.reserve1), (100, 100));
        assert_eq!(row.deltas_after(Some((1, 1))), (23, 0));
        assert_eq!(row.log.log_idx, 1);
    }

    #[test]
    fn consecutive_syncs_are_stored_standalone() {
        let events = decoded(vec![
            sync("100", "200", (1, 1, 0), 20),
            sync("150", "180", (2, 2, 0), 21),
        ]);
        let rows = merge_events(&events);
        let [first, second] = rows.as_slice() else {
            panic!("expected two rows, got {rows:?}");
        };
        assert_eq!(first.event_type, EventType::Sync);
        assert_eq!(first.deltas, None);
        assert_eq!(first.deltas_after(Some((90, 210))), (10, -10));
        assert_eq!(second.deltas_after(Some((100, 200))), (50, -20));
    }

    #[test]
    fn orphan_delta_event_is_dropped() {
        let events = decoded(vec![
            swap("1|0|0|1", (1, 1, 0), 20),
            sync("5", "6", (2, 2, 0), 21),
        ]);
        let rows = merge_events(&events);
        let [row] = rows.as_slice() else {
            panic!("expected one row, got {rows:?}");
        };
        assert_eq!(row.event_type, EventType::Sync);
        assert_eq!(row.deltas_after(None), (5, 6));
    }

    #[test]
    fn window_selection_follows_last_height() {
        let mut last = NewHistoryEntry {
            pair_id: crate::domain::PairId::new(1),
            event_type: EventType::Sync,
            reserve0: 0,
            reserve1: 0,
            delta_reserve0: 0,
            delta_reserve1: 0,
            ae_usd_price: 0.0,
            height: 50,
            micro_block_hash: "mh".to_string(),
            micro_block_time: 7,
            transaction_hash: "th".to_string(),
            transaction_index: 3,
            log_index: 0,
            sender_account: String::new(),
        };
        assert_eq!(
            ImportWindow::select(&last, 100, 10),
            ImportWindow::After(last.position())
        );
        last.height = 95;
        assert_eq!(ImportWindow::select(&last, 100, 10), ImportWindow::FromHeight(90));
    }

    #[test]
    fn same_block_logs_are_ordered_by_transaction_then_log_index() {
        let boundary = ImportWindow::After(LogPosition {
            micro_block_time: 5,
            transaction_index: 10,
            log_index: 1,
        });
        assert!(!boundary.contains(&sync("1", "1", (5, 10, 1), 1)));
        assert!(boundary.contains(&sync("1", "1", (5, 10, 2), 1)));
        assert!(boundary.contains(&sync("1", "1", (5, 11, 0), 1)));
        assert!(!boundary.contains(&sync("1", "1", (5, 9, 9), 1)));
    }

    #[tokio::test]
    async fn first_import_records_creation_and_merged_rows() {
        let h = harness(100).await;
        h.middleware.push_log(sync("100", "200", (200, 2, 0), 20)).await;
        h.middleware.push_log(mint("100", "200", (200, 2, 1), 20)).await;
        h.middleware.push_log(sync("90", "222", (300, 3, 0), 30)).await;
        h.middleware.push_log(swap("0|22|10|0", (300, 3, 1), 30)).await;

        let Ok(summary) = h.importer.import().await else {
            panic!("import should succeed");
        };
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.failed, 0);

        let rows = h.gateway.history(h.pair.id).await;
        let types: Vec<EventType> = rows.iter().map(|r| r.entry.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::CreatePair, EventType::PairMint, EventType::SwapTokens]
        );
        let Some(swap_row) = rows.last() else {
            panic!("rows expected");
        };
        assert_eq!((swap_row.entry.reserve0, swap_row.entry.reserve1), (90, 222));
        assert_eq!(
            (swap_row.entry.delta_reserve0, swap_row.entry.delta_reserve1),
            (-10, 22)
        );
        assert_eq!(swap_row.entry.sender_account, "ak_sender_of_th_3");
        assert!((swap_row.entry.ae_usd_price - 0.05).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let h = harness(25).await;
        h.middleware.push_log(sync("100", "200", (200, 2, 0), 20)).await;
        h.middleware.push_log(mint("100", "200", (200, 2, 1), 20)).await;

        assert!(h.importer.import().await.is_ok());
        let first = h.gateway.history(h.pair.id).await;
        assert!(h.importer.import().await.is_ok());
        let second = h.gateway.history(h.pair.id).await;
        assert_eq!(first.len(), second.len());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn outdated_pair_reads_only_after_last_position() {
        let h = harness(1_000).await;
        h.middleware.push_log(sync("100", "200", (200, 2, 0), 20)).await;
        h.middleware.push_log(mint("100", "200", (200, 2, 1), 20)).await;
        assert!(h.importer.import().await.is_ok());

        for i in 0..6 {
            h.middleware
                .push_log(sync("1", "1", (400 + i, 10 + i, 0), 30))
                .await;
        }
        *h.middleware.pages_fetched.lock().await = 0;
        assert!(h.importer.import().await.is_ok());

        let rows = h.gateway.history(h.pair.id).await;
        assert_eq!(rows.len(), 1 + 1 + 6);
        // 6 new logs in pages of 2, plus the page holding the boundary.
        assert_eq!(*h.middleware.pages_fetched.lock().await, 4);
    }

    #[tokio::test]
    async fn undecodable_log_is_recorded_and_skipped() {
        let h = harness(100).await;
        h.middleware.push_log(sync("100", "200", (200, 2, 0), 20)).await;
        h.middleware
            .push_log(pair_log(PAIR, "Sync", &["oops"], "", (300, 3, 0), 30))
            .await;
        h.middleware.push_log(sync("5", "5", (400, 4, 0), 40)).await;

        assert!(h.importer.import().await.is_ok());
        let rows = h.gateway.history(h.pair.id).await;
        assert_eq!(rows.len(), 3);
        let errors = h.gateway.error_records().await;
        let [record] = errors.as_slice() else {
            panic!("expected one error record, got {errors:?}");
        };
        assert_eq!(record.key.transaction_hash, "th_3");
        assert_eq!(record.key.log_index, 0);
    }

    #[tokio::test]
    async fn failing_pair_is_recorded_then_suppressed() {
        let h = harness(100).await;
        h.middleware.creations.lock().await.clear();

        let Ok(summary) = h.importer.import().await else {
            panic!("run should complete");
        };
        assert_eq!(summary.failed, 1);
        let errors = h.gateway.error_records().await;
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|e| e.key.log_index == -1));

        let Ok(summary) = h.importer.import().await else {
            panic!("run should complete");
        };
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn suppressed_log_is_not_stored() {
        let h = harness(100).await;
        h.middleware.push_log(sync("100", "200", (200, 2, 0), 20)).await;
        h.gateway
            .insert_error_record_at(
                ErrorKey::log_level(h.pair.id, "mh_200", "th_2", 0),
                "earlier failure",
                Utc::now(),
            )
            .await;

        assert!(h.importer.import().await.is_ok());
        let rows = h.gateway.history(h.pair.id).await;
        assert_eq!(rows.len(), 1);
        assert!(h.chain.liquidity_calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn standalone_sync_delta_follows_last_stored_row() {
        let h = harness(100).await;
        h.middleware.push_log(sync("100", "200", (200, 2, 0), 20)).await;
        h.middleware.push_log(sync("150", "180", (300, 3, 0), 30)).await;
        h.middleware.push_log(sync("160", "190", (400, 4, 0), 40)).await;
        h.gateway
            .insert_error_record_at(
                ErrorKey::log_level(h.pair.id, "mh_300", "th_3", 0),
                "earlier failure",
                Utc::now(),
            )
            .await;

        assert!(h.importer.import().await.is_ok());
        let rows = h.gateway.history(h.pair.id).await;
        let stored: Vec<(u128, i128, i128)> = rows
            .iter()
            .map(|r| (r.entry.reserve0, r.entry.delta_reserve0, r.entry.delta_reserve1))
            .collect();
        assert_eq!(stored, vec![(0, 0, 0), (100, 100, 200), (160, 60, -10)]);
    }
}

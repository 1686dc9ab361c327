//! Reconciliation of recent history against on-chain balances.
//!
//! For the last row of every (pair, micro-block) in the validation window,
//! the stored reserves must equal the pair's token balances at that
//! micro-block. On the first mismatch, everything from that block's time
//! onwards is deleted and left for the importer to rebuild.

use std::collections::HashMap;
use std::sync::Arc;

use crate::clients::{ChainClient, Middleware};
use crate::domain::{HistoryEntryContext, PairId, contract_account};
use crate::error::IndexerError;
use crate::persistence::PersistenceGateway;

use super::error_ledger::ErrorLedger;

/// Result of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every checked block matched.
    Clean {
        /// Blocks checked.
        checked: usize,
    },
    /// A block diverged and history was rolled back.
    RolledBack {
        /// Time the deletion started from.
        from_time: i64,
        /// Rows deleted.
        deleted: u64,
    },
}

/// Last entry of each (pair, micro-block) group, ascending by position.
#[must_use]
pub fn block_heads(entries: Vec<HistoryEntryContext>) -> Vec<HistoryEntryContext> {
    let mut heads: HashMap<(PairId, String), HistoryEntryContext> = HashMap::new();
    for entry in entries {
        let key = (
            entry.history.entry.pair_id,
            entry.history.entry.micro_block_hash.clone(),
        );
        match heads.get(&key) {
            Some(current) if current.history.position() >= entry.history.position() => {}
            _ => {
                heads.insert(key, entry);
            }
        }
    }
    let mut heads: Vec<HistoryEntryContext> = heads.into_values().collect();
    heads.sort_by_key(|h| (h.history.position(), h.history.entry.pair_id));
    heads
}

/// Checks recent history and rolls back from the first divergence.
#[derive(Debug)]
pub struct HistoryValidator {
    chain: Arc<dyn ChainClient>,
    middleware: Arc<dyn Middleware>,
    gateway: Arc<dyn PersistenceGateway>,
    ledger: ErrorLedger,
    window_blocks: u64,
}

impl HistoryValidator {
    /// Creates the validator checking the last `window_blocks` blocks.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        middleware: Arc<dyn Middleware>,
        gateway: Arc<dyn PersistenceGateway>,
        ledger: ErrorLedger,
        window_blocks: u64,
    ) -> Self {
        Self {
            chain,
            middleware,
            gateway,
            ledger,
            window_blocks,
        }
    }

    /// Validates the window.
    ///
    /// # Errors
    ///
    /// Propagates failures reading the height, listing entries or deleting
    /// rows. Balance lookup failures count as divergence.
    pub async fn validate(&self) -> Result<ValidationOutcome, IndexerError> {
        let current_height = self.chain.current_height().await?;
        let floor = current_height.saturating_sub(self.window_blocks);
        let heads = block_heads(self.gateway.entries_within_height(floor).await?);
        tracing::debug!(floor, blocks = heads.len(), "validating history");

        let mut checked = 0;
        for head in &heads {
            let entry = &head.history.entry;
            if let Some(record) = self.ledger.pair_suppression(entry.pair_id).await? {
                tracing::debug!(
                    pair = %head.pair_address,
                    error = %record.error,
                    "pair with recent import error not validated"
                );
                continue;
            }

            checked += 1;
            if let Err(reason) = self.check(head).await {
                let deleted = self
                    .gateway
                    .delete_history_from_time(entry.micro_block_time)
                    .await?;
                tracing::warn!(
                    pair = %head.pair_address,
                    micro_block_hash = %entry.micro_block_hash,
                    from_time = entry.micro_block_time,
                    deleted,
                    %reason,
                    "history diverged, rolled back"
                );
                return Ok(ValidationOutcome::RolledBack {
                    from_time: entry.micro_block_time,
                    deleted,
                });
            }
        }

        tracing::info!(checked, "history validation found no problems");
        Ok(ValidationOutcome::Clean { checked })
    }

    /// Compares a head's reserves with the balances at its micro-block.
    async fn check(&self, head: &HistoryEntryContext) -> Result<(), String> {
        let entry = &head.history.entry;
        let account = contract_account(&head.pair_address);
        let (balance0, balance1) = tokio::try_join!(
            self.middleware
                .account_balance(&head.token0_address, &account, &entry.micro_block_hash),
            self.middleware
                .account_balance(&head.token1_address, &account, &entry.micro_block_hash),
        )
        .map_err(|e| format!("balance lookup failed: {e}"))?;

        if balance0 != entry.reserve0 || balance1 != entry.reserve1 {
            return Err(format!(
                "stored reserves ({}, {}) != balances ({balance0}, {balance1})",
                entry.reserve0, entry.reserve1
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{EventType, NewHistoryEntry, NewToken, Pair};
    use crate::persistence::InMemoryGateway;
    use crate::testing::{FakeChain, FakeMiddleware};

    struct Harness {
        middleware: Arc<FakeMiddleware>,
        gateway: Arc<InMemoryGateway>,
        validator: HistoryValidator,
        pair: Pair,
    }

    async fn harness() -> Harness {
        let chain = Arc::new(FakeChain::new(100));
        let middleware = Arc::new(FakeMiddleware::default());
        let gateway = Arc::new(InMemoryGateway::new());
        for token in ["ct_t0", "ct_t1"] {
            let _ = gateway
                .insert_token(&NewToken::degraded(token.to_string(), false))
                .await;
        }
        let Ok(pair) = gateway.insert_pair("ct_pair", "ct_t0", "ct_t1").await else {
            panic!("pair should be inserted");
        };
        let gateway_dyn = Arc::clone(&gateway) as Arc<dyn PersistenceGateway>;
        let validator = HistoryValidator::new(
            chain as Arc<dyn ChainClient>,
            Arc::clone(&middleware) as Arc<dyn Middleware>,
            Arc::clone(&gateway_dyn),
            ErrorLedger::new(gateway_dyn, 6),
            20,
        );
        Harness {
            middleware,
            gateway,
            validator,
            pair,
        }
    }

    async fn store(h: &Harness, time: i64, log_index: i32, height: u64, reserves: (u128, u128)) {
        let entry = NewHistoryEntry {
            pair_id: h.pair.id,
            event_type: EventType::Sync,
            reserve0: reserves.0,
            reserve1: reserves.1,
            delta_reserve0: 0,
            delta_reserve1: 0,
            ae_usd_price: 0.0,
            height,
            micro_block_hash: format!("mh_{time}"),
            micro_block_time: time,
            transaction_hash: format!("th_{time}"),
            transaction_index: time,
            log_index,
            sender_account: "ak_1".to_string(),
        };
        let Ok(_) = h.gateway.upsert_liquidity_history(&entry).await else {
            panic!("row should be stored");
        };
    }

    async fn balances(h: &Harness, time: i64, reserves: (u128, u128)) {
        let block = format!("mh_{time}");
        h.middleware
            .set_balance("ct_t0", "ak_pair", &block, reserves.0)
            .await;
        h.middleware
            .set_balance("ct_t1", "ak_pair", &block, reserves.1)
            .await;
    }

    #[tokio::test]
    async fn matching_history_is_clean() {
        let h = harness().await;
        store(&h, 1_000, 0, 90, (10, 20)).await;
        store(&h, 1_000, 1, 90, (11, 19)).await;
        store(&h, 2_000, 0, 95, (12, 18)).await;
        balances(&h, 1_000, (11, 19)).await;
        balances(&h, 2_000, (12, 18)).await;

        assert_eq!(
            h.validator.validate().await.ok(),
            Some(ValidationOutcome::Clean { checked: 2 })
        );
        assert_eq!(h.gateway.history(h.pair.id).await.len(), 3);
    }

    #[tokio::test]
    async fn mismatch_deletes_from_block_time_on() {
        let h = harness().await;
        store(&h, 500, 0, 50, (1, 1)).await;
        store(&h, 1_000, 0, 90, (10, 20)).await;
        store(&h, 2_000, 0, 95, (12, 18)).await;
        store(&h, 3_000, 0, 99, (13, 17)).await;
        balances(&h, 1_000, (10, 20)).await;
        balances(&h, 2_000, (12, 99)).await;
        balances(&h, 3_000, (13, 17)).await;

        assert_eq!(
            h.validator.validate().await.ok(),
            Some(ValidationOutcome::RolledBack {
                from_time: 2_000,
                deleted: 2
            })
        );
        let remaining: Vec<i64> = h
            .gateway
            .history(h.pair.id)
            .await
            .iter()
            .map(|r| r.entry.micro_block_time)
            .collect();
        assert_eq!(remaining, vec![500, 1_000]);
    }

    #[tokio::test]
    async fn balance_lookup_failure_counts_as_divergence() {
        let h = harness().await;
        store(&h, 1_000, 0, 90, (10, 20)).await;

        assert_eq!(
            h.validator.validate().await.ok(),
            Some(ValidationOutcome::RolledBack {
                from_time: 1_000,
                deleted: 1
            })
        );
    }

    #[tokio::test]
    async fn only_the_last_entry_of_a_block_is_checked() {
        let h = harness().await;
        store(&h, 1_000, 0, 90, (10, 20)).await;
        store(&h, 1_000, 3, 90, (15, 15)).await;
        balances(&h, 1_000, (15, 15)).await;

        assert_eq!(
            h.validator.validate().await.ok(),
            Some(ValidationOutcome::Clean { checked: 1 })
        );
    }

    #[tokio::test]
    async fn reserve0_below_balance_rolls_back() {
        let h = harness().await;
        store(&h, 1_000, 0, 90, (100, 50)).await;
        store(&h, 2_000, 0, 95, (100, 50)).await;
        balances(&h, 1_000, (123, 50)).await;
        balances(&h, 2_000, (100, 50)).await;

        assert_eq!(
            h.validator.validate().await.ok(),
            Some(ValidationOutcome::RolledBack {
                from_time: 1_000,
                deleted: 2
            })
        );
        assert!(h.gateway.history(h.pair.id).await.is_empty());
    }
}

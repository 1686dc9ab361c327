//! In-process fakes for the upstream clients.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::clients::middleware::get_pages_until_condition;
use crate::clients::{ChainClient, ContractCreation, Middleware, Page, PriceOracle, TransactionInfo};
use crate::domain::{
    ContractLog, PAIR_BURN_EVENT, PAIR_CREATED_EVENT, PAIR_MINT_EVENT, Pair, PairLiquidity,
    SWAP_TOKENS_EVENT, SYNC_EVENT, TokenMetadata, TokenMetadataError,
};
use crate::error::IndexerError;

/// Scripted token metadata outcome.
#[derive(Debug, Clone)]
pub enum FakeMetadata {
    Valid(TokenMetadata),
    Malformed,
    NoContract,
    Unexpected,
}

#[derive(Debug, Default)]
pub struct FakeChain {
    pub height: Mutex<u64>,
    /// Newest first.
    pub factory: Mutex<Vec<String>>,
    pub tokens: Mutex<HashMap<String, (String, String)>>,
    pub metadata: Mutex<HashMap<String, FakeMetadata>>,
    pub reserves: Mutex<HashMap<String, (u128, u128, u128)>>,
    pub transactions: Mutex<HashMap<String, TransactionInfo>>,
    pub liquidity_calls: Mutex<Vec<(String, u64)>>,
}

impl FakeChain {
    pub fn new(height: u64) -> Self {
        Self {
            height: Mutex::new(height),
            ..Self::default()
        }
    }

    /// Registers a factory pair (appended as the newest).
    pub async fn add_pair(&self, pair: &str, token0: &str, token1: &str) {
        self.factory.lock().await.insert(0, pair.to_string());
        self.tokens
            .lock()
            .await
            .insert(pair.to_string(), (token0.to_string(), token1.to_string()));
    }

    pub async fn set_metadata(&self, token: &str, metadata: FakeMetadata) {
        self.metadata
            .lock()
            .await
            .insert(token.to_string(), metadata);
    }

    pub async fn set_reserves(&self, pair: &str, supply: u128, reserve0: u128, reserve1: u128) {
        self.reserves
            .lock()
            .await
            .insert(pair.to_string(), (supply, reserve0, reserve1));
    }
}

pub fn metadata(symbol: &str) -> FakeMetadata {
    FakeMetadata::Valid(TokenMetadata {
        name: format!("{symbol} token"),
        symbol: symbol.to_string(),
        decimals: 18,
    })
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        Ok(*self.height.lock().await)
    }

    async fn factory_pairs(&self) -> Result<Vec<String>, IndexerError> {
        Ok(self.factory.lock().await.clone())
    }

    async fn pair_tokens(&self, pair: &str) -> Result<(String, String), IndexerError> {
        self.tokens
            .lock()
            .await
            .get(pair)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(pair.to_string()))
    }

    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata, TokenMetadataError> {
        match self.metadata.lock().await.get(token).cloned() {
            Some(FakeMetadata::Valid(meta)) => Ok(meta),
            Some(FakeMetadata::NoContract) => Err(TokenMetadataError::NoContract),
            Some(FakeMetadata::Unexpected) => Err(TokenMetadataError::Unexpected(
                IndexerError::Http("connection reset".to_string()),
            )),
            Some(FakeMetadata::Malformed) | None => {
                Err(TokenMetadataError::Malformed("no meta_info".to_string()))
            }
        }
    }

    async fn pair_liquidity(&self, pair: &Pair, height: u64) -> Result<PairLiquidity, IndexerError> {
        self.liquidity_calls
            .lock()
            .await
            .push((pair.address.clone(), height));
        let (total_supply, reserve0, reserve1) = self
            .reserves
            .lock()
            .await
            .get(&pair.address)
            .copied()
            .ok_or_else(|| IndexerError::NotFound(pair.address.clone()))?;
        Ok(PairLiquidity {
            total_supply,
            reserve0,
            reserve1,
            height,
        })
    }

    async fn transaction_info(&self, hash: &str) -> Result<TransactionInfo, IndexerError> {
        self.transactions
            .lock()
            .await
            .get(hash)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(hash.to_string()))
    }
}

#[derive(Debug)]
pub struct FakeMiddleware {
    pub page_size: usize,
    /// Per contract, newest first.
    pub logs: Mutex<HashMap<String, Vec<ContractLog>>>,
    /// `(token, account, micro_block_hash)` → balance.
    pub balances: Mutex<HashMap<(String, String, String), u128>>,
    pub creations: Mutex<HashMap<String, ContractCreation>>,
    pub pages_fetched: Mutex<usize>,
}

impl Default for FakeMiddleware {
    fn default() -> Self {
        Self {
            page_size: 2,
            logs: Mutex::default(),
            balances: Mutex::default(),
            creations: Mutex::default(),
            pages_fetched: Mutex::default(),
        }
    }
}

impl FakeMiddleware {
    /// Adds a log; logs are kept newest first.
    pub async fn push_log(&self, log: ContractLog) {
        let mut logs = self.logs.lock().await;
        let entries = logs.entry(log.contract_id.clone()).or_default();
        entries.push(log);
        entries.sort_by_key(|l| std::cmp::Reverse(l.position()));
    }

    pub async fn set_balance(&self, token: &str, account: &str, micro_block_hash: &str, amount: u128) {
        self.balances.lock().await.insert(
            (
                token.to_string(),
                account.to_string(),
                micro_block_hash.to_string(),
            ),
            amount,
        );
    }

    pub async fn set_creation(&self, contract: &str, creation: ContractCreation) {
        self.creations
            .lock()
            .await
            .insert(contract.to_string(), creation);
    }

    async fn page(&self, contract: &str, cursor: &str) -> Result<Page<ContractLog>, IndexerError> {
        *self.pages_fetched.lock().await += 1;
        let start: usize = cursor
            .parse()
            .map_err(|_| IndexerError::Decode(cursor.to_string()))?;
        let logs = self.logs.lock().await;
        let all = logs.get(contract).cloned().unwrap_or_default();
        let data: Vec<ContractLog> = all.iter().skip(start).take(self.page_size).cloned().collect();
        let end = start + data.len();
        Ok(Page {
            data,
            next: (end < all.len()).then(|| end.to_string()),
        })
    }
}

#[async_trait]
impl Middleware for FakeMiddleware {
    async fn contract_logs_until(
        &self,
        contract: &str,
        desired: &(dyn for<'a> Fn(&'a ContractLog) -> bool + Send + Sync),
    ) -> Result<Vec<ContractLog>, IndexerError> {
        get_pages_until_condition(
            "0".to_string(),
            |cursor| async move { self.page(contract, &cursor).await },
            |log| desired(log),
        )
        .await
    }

    async fn account_balance(
        &self,
        token: &str,
        account: &str,
        micro_block_hash: &str,
    ) -> Result<u128, IndexerError> {
        self.balances
            .lock()
            .await
            .get(&(
                token.to_string(),
                account.to_string(),
                micro_block_hash.to_string(),
            ))
            .copied()
            .ok_or_else(|| IndexerError::Upstream {
                status: 404,
                url: format!("/v3/aex9/{token}/balances/{account}?hash={micro_block_hash}"),
            })
    }

    async fn contract_creation(&self, contract: &str) -> Result<ContractCreation, IndexerError> {
        self.creations
            .lock()
            .await
            .get(contract)
            .cloned()
            .ok_or_else(|| IndexerError::NotFound(contract.to_string()))
    }

    async fn transaction_sender(&self, transaction_hash: &str) -> Result<String, IndexerError> {
        Ok(format!("ak_sender_of_{transaction_hash}"))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedPriceOracle(pub Option<f64>);

#[async_trait]
impl PriceOracle for FixedPriceOracle {
    async fn price_at(&self, _time_ms: i64) -> Option<f64> {
        self.0
    }
}

fn event_hash(event: &str) -> String {
    [
        SYNC_EVENT,
        SWAP_TOKENS_EVENT,
        PAIR_MINT_EVENT,
        PAIR_BURN_EVENT,
        PAIR_CREATED_EVENT,
    ]
    .iter()
    .find(|signature| signature.name == event)
    .map_or_else(|| format!("unknown_{event}"), |signature| signature.hash.to_string())
}

/// A pair log at `(time, txi, log_idx)` in micro-block `mh_{time}`.
///
/// Known events carry their hash only, as the middleware reports logs of
/// contracts it cannot decode.
pub fn pair_log(
    pair: &str,
    event: &str,
    args: &[&str],
    data: &str,
    (time, txi, log_idx): (i64, i64, i32),
    height: u64,
) -> ContractLog {
    ContractLog {
        args: args.iter().map(|a| serde_json::json!(a)).collect(),
        data: data.to_string(),
        block_hash: format!("mh_{time}"),
        block_time: time,
        call_tx_hash: format!("th_{txi}"),
        call_txi: txi,
        contract_id: pair.to_string(),
        event_hash: Some(event_hash(event)),
        event_name: None,
        height,
        log_idx,
    }
}

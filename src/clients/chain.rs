//! Chain reads: heights, factory pairs, token metadata, pair state.
//!
//! [`AeChainClient`] answers from the node API where the node is the source
//! of truth (heights, transaction outcomes, contract existence) and from the
//! middleware's AEX-9 and log indexes for contract state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::middleware::MdwClient;
use crate::cache::AddressCache;
use crate::domain::{PAIR_CREATED_EVENT, Pair, PairLiquidity, TokenMetadata, TokenMetadataError};
use crate::error::IndexerError;

/// Outcome and emitters of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// The call reverted or failed.
    pub reverted: bool,
    /// Key-block height reported by the node.
    pub height: Option<u64>,
    /// Contracts that emitted logs, first occurrence order, deduplicated.
    pub log_contracts: Vec<String>,
}

/// Reads the pair sync needs from the chain.
#[async_trait]
pub trait ChainClient: Send + Sync + std::fmt::Debug {
    /// Current key-block height.
    async fn current_height(&self) -> Result<u64, IndexerError>;

    /// Every pair the factory created, newest first.
    async fn factory_pairs(&self) -> Result<Vec<String>, IndexerError>;

    /// `(token0, token1)` of a pair.
    async fn pair_tokens(&self, pair: &str) -> Result<(String, String), IndexerError>;

    /// Name, symbol and decimals of a token.
    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata, TokenMetadataError>;

    /// Reserves and LP supply of a pair, tagged with `height`.
    async fn pair_liquidity(&self, pair: &Pair, height: u64) -> Result<PairLiquidity, IndexerError>;

    /// Outcome of a transaction and the contracts it emitted logs from.
    async fn transaction_info(&self, hash: &str) -> Result<TransactionInfo, IndexerError>;
}

#[derive(Debug, Deserialize)]
struct NodeHeight {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct NodeTxInfo {
    call_info: NodeCallInfo,
}

#[derive(Debug, Deserialize)]
struct NodeCallInfo {
    return_type: String,
    #[serde(default)]
    height: Option<u64>,
    #[serde(default)]
    log: Vec<NodeLog>,
}

#[derive(Debug, Deserialize)]
struct NodeLog {
    address: String,
}

impl From<NodeTxInfo> for TransactionInfo {
    fn from(info: NodeTxInfo) -> Self {
        let mut log_contracts: Vec<String> = Vec::new();
        for log in info.call_info.log {
            if !log_contracts.contains(&log.address) {
                log_contracts.push(log.address);
            }
        }
        Self {
            reverted: info.call_info.return_type != "ok",
            height: info.call_info.height,
            log_contracts,
        }
    }
}

/// Node + middleware backed [`ChainClient`].
#[derive(Debug)]
pub struct AeChainClient {
    http: reqwest::Client,
    node_url: String,
    middleware: Arc<MdwClient>,
    factory_address: String,
    pair_tokens: AddressCache<String, (String, String)>,
}

impl AeChainClient {
    /// Creates a client for the node at `node_url` and the given factory.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        node_url: impl Into<String>,
        middleware: Arc<MdwClient>,
        factory_address: impl Into<String>,
        cache_capacity: usize,
    ) -> Self {
        Self {
            http,
            node_url: node_url.into().trim_end_matches('/').to_string(),
            middleware,
            factory_address: factory_address.into(),
            pair_tokens: AddressCache::new(cache_capacity),
        }
    }

    async fn node_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, IndexerError> {
        let url = format!("{}{path}", self.node_url);
        tracing::trace!(%url, "node request");
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    async fn contract_exists(&self, contract: &str) -> Result<bool, IndexerError> {
        match self
            .node_json::<serde_json::Value>(&format!("/v3/contracts/{contract}"))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn string_arg(args: &[serde_json::Value], index: usize) -> Option<String> {
    args.get(index)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl ChainClient for AeChainClient {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        let current: NodeHeight = self.node_json("/v3/key-blocks/current/height").await?;
        Ok(current.height)
    }

    async fn factory_pairs(&self) -> Result<Vec<String>, IndexerError> {
        let logs = self
            .middleware
            .all_contract_logs(&self.factory_address)
            .await?;
        let mut pairs = Vec::new();
        for log in logs.iter().filter(|log| log.emits(&PAIR_CREATED_EVENT)) {
            let (Some(pair), Some(token0), Some(token1)) = (
                string_arg(&log.args, 0),
                string_arg(&log.args, 1),
                string_arg(&log.args, 2),
            ) else {
                return Err(IndexerError::InvalidLog(format!(
                    "{} in {} without pair and token addresses",
                    PAIR_CREATED_EVENT.name, log.call_tx_hash
                )));
            };
            self.pair_tokens
                .insert(pair.clone(), (token0, token1))
                .await;
            pairs.push(pair);
        }
        Ok(pairs)
    }

    async fn pair_tokens(&self, pair: &str) -> Result<(String, String), IndexerError> {
        let key = pair.to_string();
        if let Some(tokens) = self.pair_tokens.get(&key).await {
            return Ok(tokens);
        }
        self.factory_pairs().await?;
        self.pair_tokens
            .get(&key)
            .await
            .ok_or_else(|| IndexerError::NotFound(format!("pair {pair} is not a factory pair")))
    }

    async fn token_metadata(&self, token: &str) -> Result<TokenMetadata, TokenMetadataError> {
        if !self.contract_exists(token).await? {
            return Err(TokenMetadataError::NoContract);
        }
        let summary = match self.middleware.aex9_summary(token).await {
            Ok(summary) => summary,
            Err(e) if e.is_not_found() => {
                return Err(TokenMetadataError::Malformed(
                    "not an AEX-9 token".to_string(),
                ));
            }
            Err(IndexerError::Decode(reason)) => return Err(TokenMetadataError::Malformed(reason)),
            Err(e) => return Err(e.into()),
        };
        let (Some(name), Some(symbol), Some(decimals)) =
            (summary.name, summary.symbol, summary.decimals)
        else {
            return Err(TokenMetadataError::Malformed(
                "incomplete AEX-9 metadata".to_string(),
            ));
        };
        let decimals = i32::try_from(decimals)
            .map_err(|_| TokenMetadataError::Malformed(format!("decimals {decimals}")))?;
        Ok(TokenMetadata {
            name,
            symbol,
            decimals,
        })
    }

    async fn pair_liquidity(&self, pair: &Pair, height: u64) -> Result<PairLiquidity, IndexerError> {
        let account = pair.account_address();
        let (summary, reserve0, reserve1) = tokio::try_join!(
            self.middleware.aex9_summary(&pair.address),
            self.middleware
                .latest_balance(&pair.token0.address, &account),
            self.middleware
                .latest_balance(&pair.token1.address, &account),
        )?;
        let total_supply = summary
            .event_supply
            .ok_or_else(|| IndexerError::MissingData(format!("total supply of {}", pair.address)))?;
        Ok(PairLiquidity {
            total_supply: total_supply.0,
            reserve0,
            reserve1,
            height,
        })
    }

    async fn transaction_info(&self, hash: &str) -> Result<TransactionInfo, IndexerError> {
        let info: NodeTxInfo = self
            .node_json(&format!("/v3/transactions/{hash}/info"))
            .await?;
        Ok(info.into())
    }
}

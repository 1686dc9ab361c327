//! Middleware (indexer) REST client.
//!
//! The middleware serves paginated collections as `{ "data": [...], "next":
//! "/v3/...?cursor=..." }`, newest first. [`get_all_pages`] drains such a
//! collection; [`get_pages_until_condition`] stops at the first page that is
//! only partially wanted, which is how the importer reads "everything after
//! position X" without walking the full history of a pair.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;

use crate::cache::AddressCache;
use crate::domain::ContractLog;
use crate::error::IndexerError;

/// One page of a middleware collection.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub data: Vec<T>,
    /// Path of the next page, if any.
    #[serde(default)]
    pub next: Option<String>,
}

/// Follows `next` links from `first` and concatenates every page.
///
/// # Errors
///
/// Propagates the first failing page fetch.
pub async fn get_all_pages<T, F, Fut>(first: String, mut fetch: F) -> Result<Vec<T>, IndexerError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>, IndexerError>>,
{
    let mut items = Vec::new();
    let mut next = Some(first);
    while let Some(url) = next.take() {
        let page = fetch(url).await?;
        items.extend(page.data);
        next = page.next;
    }
    Ok(items)
}

/// Follows `next` links while every item of a page satisfies `desired`.
///
/// Keeps only the matching items. A page with fewer matches than entries
/// (or the last page) ends the traversal.
///
/// # Errors
///
/// Propagates the first failing page fetch.
pub async fn get_pages_until_condition<T, F, Fut, P>(
    first: String,
    mut fetch: F,
    mut desired: P,
) -> Result<Vec<T>, IndexerError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>, IndexerError>>,
    P: FnMut(&T) -> bool,
{
    let mut items = Vec::new();
    let mut next = Some(first);
    while let Some(url) = next.take() {
        let page = fetch(url).await?;
        let total = page.data.len();
        let before = items.len();
        items.extend(page.data.into_iter().filter(|item| desired(item)));
        if items.len() - before < total {
            break;
        }
        next = page.next;
    }
    Ok(items)
}

/// A token amount that may exceed `u64`, served as a JSON number or string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amount(pub u128);

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        let text = raw.get().trim().trim_matches('"');
        text.parse::<u128>()
            .map(Self)
            .map_err(|e| serde::de::Error::custom(format!("amount {text:?}: {e}")))
    }
}

/// Where and when a contract was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCreation {
    /// Micro-block that included the create transaction.
    pub micro_block_hash: String,
    /// Micro-block time in milliseconds.
    pub micro_block_time: i64,
    /// Key-block height.
    pub height: u64,
    /// Create transaction hash.
    pub transaction_hash: String,
    /// Global index of the create transaction.
    pub transaction_index: i64,
}

/// Middleware reads used by the importer and validator.
#[async_trait]
pub trait Middleware: Send + Sync + std::fmt::Debug {
    /// Logs emitted by `contract`, newest first, for as long as whole pages
    /// satisfy `desired`.
    async fn contract_logs_until(
        &self,
        contract: &str,
        desired: &(dyn for<'a> Fn(&'a ContractLog) -> bool + Send + Sync),
    ) -> Result<Vec<ContractLog>, IndexerError>;

    /// AEX-9 balance of `account` in `token` as of `micro_block_hash`.
    async fn account_balance(
        &self,
        token: &str,
        account: &str,
        micro_block_hash: &str,
    ) -> Result<u128, IndexerError>;

    /// Creation point of a contract.
    async fn contract_creation(&self, contract: &str) -> Result<ContractCreation, IndexerError>;

    /// Account that signed a transaction.
    async fn transaction_sender(&self, transaction_hash: &str) -> Result<String, IndexerError>;
}

#[derive(Debug, Deserialize)]
struct MdwTransaction {
    block_hash: String,
    block_height: u64,
    micro_time: i64,
    tx_index: i64,
    tx: serde_json::Value,
}

impl MdwTransaction {
    /// Signer field names, checked in order, across transaction types.
    const SIGNER_FIELDS: [&'static str; 6] = [
        "caller_id",
        "sender_id",
        "owner_id",
        "account_id",
        "ga_id",
        "payer_id",
    ];

    fn signer(&self) -> Option<&str> {
        let tx = match self.tx.get("tx").and_then(|inner| inner.get("tx")) {
            // Generalized-account and paying-for wrappers nest the signed tx.
            Some(inner) if self.tx.get("caller_id").is_none() => inner,
            _ => &self.tx,
        };
        Self::SIGNER_FIELDS
            .iter()
            .find_map(|field| tx.get(*field).and_then(serde_json::Value::as_str))
    }
}

#[derive(Debug, Deserialize)]
struct MdwContract {
    source_tx_hash: String,
}

#[derive(Debug, Deserialize)]
struct MdwBalance {
    amount: Amount,
}

/// Token summary from `aex9/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Aex9Summary {
    /// Token name.
    #[serde(default)]
    pub name: Option<String>,
    /// Token symbol.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Decimal places.
    #[serde(default)]
    pub decimals: Option<i64>,
    /// Supply derived from mint and burn events.
    #[serde(default)]
    pub event_supply: Option<Amount>,
}

/// reqwest-backed [`Middleware`].
#[derive(Debug)]
pub struct MdwClient {
    http: reqwest::Client,
    base_url: String,
    page_limit: u32,
    senders: AddressCache<String, String>,
}

impl MdwClient {
    /// Creates a client for the middleware at `base_url`.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        page_limit: u32,
        cache_capacity: usize,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_limit,
            senders: AddressCache::new(cache_capacity),
        }
    }

    /// Resolves a path (or a `next` link) against the base URL.
    ///
    /// `next` links may already carry the base URL's path prefix.
    #[must_use]
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if let Ok(base) = reqwest::Url::parse(&self.base_url) {
            let prefix = base.path().trim_end_matches('/');
            if !prefix.is_empty() && path.starts_with(&format!("{prefix}/")) {
                return format!("{}{path}", base.origin().ascii_serialization());
            }
        }
        format!("{}{path}", self.base_url)
    }

    /// GETs and decodes a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Upstream`] for non-success statuses,
    /// [`IndexerError::Decode`] for unexpected bodies and
    /// [`IndexerError::Http`] for transport failures.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, IndexerError> {
        let url = self.resolve(path);
        tracing::trace!(%url, "middleware request");
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }

    /// Every log of `contract`, newest first.
    ///
    /// # Errors
    ///
    /// Propagates the first failing page fetch.
    pub async fn all_contract_logs(
        &self,
        contract: &str,
    ) -> Result<Vec<ContractLog>, IndexerError> {
        get_all_pages(self.logs_path(contract), |url| async move {
            self.get_json::<Page<ContractLog>>(&url).await
        })
        .await
    }

    /// AEX-9 summary of a token.
    ///
    /// # Errors
    ///
    /// See [`MdwClient::get_json`].
    pub async fn aex9_summary(&self, token: &str) -> Result<Aex9Summary, IndexerError> {
        self.get_json(&format!("/v3/aex9/{token}")).await
    }

    /// Latest AEX-9 balance of `account` in `token`.
    ///
    /// # Errors
    ///
    /// See [`MdwClient::get_json`].
    pub async fn latest_balance(&self, token: &str, account: &str) -> Result<u128, IndexerError> {
        let balance: MdwBalance = self
            .get_json(&format!("/v3/aex9/{token}/balances/{account}"))
            .await?;
        Ok(balance.amount.0)
    }

    fn logs_path(&self, contract: &str) -> String {
        format!(
            "/v3/contracts/logs?contract_id={contract}&direction=backward&limit={}",
            self.page_limit
        )
    }

    async fn transaction(&self, hash: &str) -> Result<MdwTransaction, IndexerError> {
        self.get_json(&format!("/v3/transactions/{hash}")).await
    }
}

#[async_trait]
impl Middleware for MdwClient {
    async fn contract_logs_until(
        &self,
        contract: &str,
        desired: &(dyn for<'a> Fn(&'a ContractLog) -> bool + Send + Sync),
    ) -> Result<Vec<ContractLog>, IndexerError> {
        get_pages_until_condition(
            self.logs_path(contract),
            |url| async move { self.get_json::<Page<ContractLog>>(&url).await },
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
        let balance: MdwBalance = self
            .get_json(&format!(
                "/v3/aex9/{token}/balances/{account}?hash={micro_block_hash}"
            ))
            .await?;
        Ok(balance.amount.0)
    }

    async fn contract_creation(&self, contract: &str) -> Result<ContractCreation, IndexerError> {
        let created: MdwContract = self.get_json(&format!("/v3/contracts/{contract}")).await?;
        let tx = self.transaction(&created.source_tx_hash).await?;
        Ok(ContractCreation {
            micro_block_hash: tx.block_hash,
            micro_block_time: tx.micro_time,
            height: tx.block_height,
            transaction_hash: created.source_tx_hash,
            transaction_index: tx.tx_index,
        })
    }

    async fn transaction_sender(&self, transaction_hash: &str) -> Result<String, IndexerError> {
        self.senders
            .get_or_try_insert_with(transaction_hash.to_string(), || async {
                let tx = self.transaction(transaction_hash).await?;
                tx.signer().map(str::to_string).ok_or_else(|| {
                    IndexerError::MissingData(format!("no signer on {transaction_hash}"))
                })
            })
            .await
    }
}

//! Pair discovery and live liquidity sync.
//!
//! [`PairSyncService`] mirrors the factory's pairs and their tokens into the
//! store and keeps each pair's liquidity snapshot current by reacting to
//! transactions pushed over the realtime channel. Snapshots are flagged
//! unsynchronized whenever the channel is down, so readers know the data
//! may be stale.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;

use crate::clients::ChainClient;
use crate::config::DisconnectPolicy;
use crate::domain::{NewToken, Pair, TokenMetadataError};
use crate::error::IndexerError;
use crate::persistence::PersistenceGateway;
use crate::realtime::{
    CloseReason, RealtimeClient, RealtimeEvent, Subscription, TransactionEvent, TxBody,
};

/// Upper bound on discovery passes per refresh.
const MAX_DISCOVERY_PASSES: usize = 16;

/// Buffered realtime events between the socket task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Buffered subscription requests towards the socket task.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Pair sync settings.
#[derive(Debug, Clone)]
pub struct PairSyncSettings {
    /// Factory contract address.
    pub factory_address: String,
    /// Skip pairs with a malformed or missing token when refreshing.
    pub filter_invalid_pairs: bool,
    /// What to do when the realtime connection closes.
    pub disconnect_policy: DisconnectPolicy,
    /// Delay before reconnecting.
    pub reconnect_delay: Duration,
}

/// Discovers pairs and keeps their snapshots in sync with the chain.
#[derive(Debug)]
pub struct PairSyncService {
    chain: Arc<dyn ChainClient>,
    gateway: Arc<dyn PersistenceGateway>,
    settings: PairSyncSettings,
}

impl PairSyncService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        gateway: Arc<dyn PersistenceGateway>,
        settings: PairSyncSettings,
    ) -> Self {
        Self {
            chain,
            gateway,
            settings,
        }
    }

    /// Runs the live sync: connect, refresh, follow events, and apply the
    /// disconnect policy whenever the connection ends.
    ///
    /// Returns `Ok(())` when the policy is to stay disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Fatal`] when the connection closes under the
    /// crash policy, and persistence failures while flagging pairs.
    pub async fn start_sync(&self, realtime: Arc<RealtimeClient>) -> Result<(), IndexerError> {
        let flagged = self.gateway.mark_all_pairs_unsynchronized().await?;
        tracing::info!(pairs = flagged, "pairs marked unsynchronized, starting live sync");

        loop {
            let reason = self.follow_connection(&realtime).await;

            match self.gateway.mark_all_pairs_unsynchronized().await {
                Ok(flagged) => tracing::warn!(
                    reason = %reason,
                    pairs = flagged,
                    "realtime connection lost, pairs marked unsynchronized"
                ),
                Err(e) => tracing::error!(
                    reason = %reason,
                    error = %e,
                    "realtime connection lost, failed to mark pairs unsynchronized"
                ),
            }

            match self.settings.disconnect_policy {
                DisconnectPolicy::Reconnect => {
                    tokio::time::sleep(self.settings.reconnect_delay).await;
                }
                DisconnectPolicy::Crash => {
                    return Err(IndexerError::Fatal(format!(
                        "realtime connection closed: {reason}"
                    )));
                }
                DisconnectPolicy::Stop => return Ok(()),
            }
        }
    }

    /// Drives one connection to completion.
    async fn follow_connection(&self, realtime: &Arc<RealtimeClient>) -> CloseReason {
        let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let client = Arc::clone(realtime);
        let connection = tokio::spawn(async move { client.run(event_tx, command_rx).await });

        while let Some(event) = event_rx.recv().await {
            match event {
                RealtimeEvent::Connected => self.on_connected(&command_tx).await,
                RealtimeEvent::Transaction(_, tx) => match self.handle_transaction_event(&tx).await
                {
                    Ok(new_pairs) => subscribe_all(&command_tx, new_pairs).await,
                    Err(e) => {
                        tracing::warn!(hash = %tx.hash, error = %e, "transaction event failed");
                    }
                },
                RealtimeEvent::Disconnected(_) => {}
            }
        }

        match connection.await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Transport(format!("connection task failed: {e}")),
        }
    }

    async fn on_connected(&self, commands: &mpsc::Sender<Subscription>) {
        match self.refresh_pairs().await {
            Ok(new_pairs) => tracing::info!(new_pairs = new_pairs.len(), "pairs refreshed"),
            Err(e) => tracing::error!(error = %e, "pair discovery failed"),
        }

        let mut targets = vec![self.settings.factory_address.clone()];
        match self.gateway.all_pairs().await {
            Ok(pairs) => targets.extend(pairs.into_iter().map(|p| p.address)),
            Err(e) => tracing::error!(error = %e, "failed to list pairs for subscription"),
        }
        subscribe_all(commands, targets).await;

        match self.refresh_pairs_liquidity().await {
            Ok(synced) => tracing::info!(pairs = synced, "pair liquidity refreshed"),
            Err(e) => tracing::error!(error = %e, "pair liquidity refresh failed"),
        }
    }

    /// Mirrors pairs the factory created since the last refresh.
    ///
    /// Repeats until a pass finds nothing new, so pairs created while a
    /// pass was running are picked up too. Returns every new address in
    /// chronological order.
    ///
    /// # Errors
    ///
    /// Propagates chain and persistence failures and unexpected token
    /// metadata failures.
    pub async fn refresh_pairs(&self) -> Result<Vec<String>, IndexerError> {
        let mut found = Vec::new();
        for _ in 0..MAX_DISCOVERY_PASSES {
            let new_pairs = self.discover_pass().await?;
            if new_pairs.is_empty() {
                return Ok(found);
            }
            found.extend(new_pairs);
        }
        tracing::warn!(
            passes = MAX_DISCOVERY_PASSES,
            found = found.len(),
            "pair discovery did not settle"
        );
        Ok(found)
    }

    async fn discover_pass(&self) -> Result<Vec<String>, IndexerError> {
        let factory_pairs = self.chain.factory_pairs().await?;
        let known = usize::try_from(self.gateway.count_pairs().await?).unwrap_or(usize::MAX);
        let new_count = factory_pairs.len().saturating_sub(known);
        if new_count == 0 {
            return Ok(Vec::new());
        }

        let new_pairs: Vec<String> = factory_pairs.into_iter().take(new_count).rev().collect();
        let pair_tokens = join_all(new_pairs.iter().map(|pair| self.chain.pair_tokens(pair)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        let existing = self.gateway.token_addresses().await?;
        let mut seen = HashSet::new();
        let missing: Vec<&str> = pair_tokens
            .iter()
            .flat_map(|(token0, token1)| [token0.as_str(), token1.as_str()])
            .filter(|token| !existing.contains(*token) && seen.insert(*token))
            .collect();

        let new_tokens = join_all(missing.iter().map(|token| self.describe_token(token)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        for token in &new_tokens {
            self.gateway.insert_token(token).await?;
        }

        for (address, (token0, token1)) in new_pairs.iter().zip(&pair_tokens) {
            let pair = self.gateway.insert_pair(address, token0, token1).await?;
            tracing::info!(pair_id = %pair.id, %address, "pair discovered");
        }
        Ok(new_pairs)
    }

    /// Reads a token's metadata, degrading unreadable tokens.
    async fn describe_token(&self, address: &str) -> Result<NewToken, IndexerError> {
        match self.chain.token_metadata(address).await {
            Ok(meta) => Ok(NewToken::from_metadata(address.to_string(), meta)),
            Err(TokenMetadataError::Malformed(reason)) => {
                tracing::warn!(token = %address, %reason, "token metadata malformed");
                Ok(NewToken::degraded(address.to_string(), false))
            }
            Err(TokenMetadataError::NoContract) => {
                tracing::warn!(token = %address, "no contract at token address");
                Ok(NewToken::degraded(address.to_string(), true))
            }
            Err(TokenMetadataError::Unexpected(e)) => Err(e),
        }
    }

    /// Refreshes every pair's snapshot at the current height, in parallel.
    ///
    /// Pairs with an unusable token are skipped when filtering is enabled.
    /// Returns the number of pairs synchronized; a failing pair is logged
    /// and does not affect the others.
    ///
    /// # Errors
    ///
    /// Propagates failures listing pairs or reading the current height.
    pub async fn refresh_pairs_liquidity(&self) -> Result<usize, IndexerError> {
        let pairs: Vec<Pair> = self
            .gateway
            .all_pairs()
            .await?
            .into_iter()
            .filter(|pair| !self.settings.filter_invalid_pairs || pair.has_valid_tokens())
            .collect();
        let height = self.chain.current_height().await?;

        let results = join_all(
            pairs
                .iter()
                .map(|pair| self.refresh_pair_liquidity(pair, Some(height))),
        )
        .await;

        let mut synced = 0;
        for (pair, result) in pairs.iter().zip(results) {
            match result {
                Ok(true) => synced += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(pair = %pair.address, error = %e, "pair liquidity refresh failed");
                }
            }
        }
        Ok(synced)
    }

    /// Refreshes one pair's snapshot tagged with `height`.
    ///
    /// Returns `false` without touching the store when `height` is unknown.
    ///
    /// # Errors
    ///
    /// Propagates chain and persistence failures.
    pub async fn refresh_pair_liquidity(
        &self,
        pair: &Pair,
        height: Option<u64>,
    ) -> Result<bool, IndexerError> {
        let Some(height) = height else {
            tracing::warn!(pair = %pair.address, "no sync height, skipping liquidity refresh");
            return Ok(false);
        };
        let liquidity = self.chain.pair_liquidity(pair, height).await?;
        self.gateway.synchronize_pair(pair.id, &liquidity).await?;
        tracing::debug!(
            pair = %pair.address,
            height,
            reserve0 = %liquidity.reserve0,
            reserve1 = %liquidity.reserve1,
            "pair synchronized"
        );
        Ok(true)
    }

    /// Reacts to a mined transaction.
    ///
    /// Contract calls that did not revert refresh every known pair they
    /// emitted logs from; a factory log triggers discovery. Returns the
    /// newly discovered pair addresses.
    ///
    /// # Errors
    ///
    /// Propagates failures reading the transaction outcome. Failures of
    /// individual contracts are logged.
    pub async fn handle_transaction_event(
        &self,
        event: &TransactionEvent,
    ) -> Result<Vec<String>, IndexerError> {
        let TxBody::ContractCallTx { .. } = event.tx else {
            return Ok(Vec::new());
        };
        let info = self.chain.transaction_info(&event.hash).await?;
        if info.reverted {
            tracing::debug!(hash = %event.hash, "reverted transaction ignored");
            return Ok(Vec::new());
        }
        let height = event.block_height.or(info.height);

        let results = join_all(
            info.log_contracts
                .iter()
                .map(|contract| self.handle_contract(contract, height)),
        )
        .await;

        let mut new_pairs = Vec::new();
        for (contract, result) in info.log_contracts.iter().zip(results) {
            match result {
                Ok(found) => new_pairs.extend(found),
                Err(e) => tracing::warn!(
                    hash = %event.hash,
                    %contract,
                    error = %e,
                    "contract refresh failed"
                ),
            }
        }
        Ok(new_pairs)
    }

    async fn handle_contract(
        &self,
        contract: &str,
        height: Option<u64>,
    ) -> Result<Vec<String>, IndexerError> {
        if contract == self.settings.factory_address {
            let new_pairs = self.refresh_pairs().await?;
            let mut pairs = Vec::with_capacity(new_pairs.len());
            for address in &new_pairs {
                if let Some(pair) = self.gateway.pair_by_address(address).await? {
                    pairs.push(pair);
                }
            }
            for (pair, result) in pairs.iter().zip(
                join_all(
                    pairs
                        .iter()
                        .map(|pair| self.refresh_pair_liquidity(pair, height)),
                )
                .await,
            ) {
                if let Err(e) = result {
                    tracing::warn!(pair = %pair.address, error = %e, "new pair liquidity refresh failed");
                }
            }
            return Ok(new_pairs);
        }

        if let Some(pair) = self.gateway.pair_by_address(contract).await? {
            self.refresh_pair_liquidity(&pair, height).await?;
        }
        Ok(Vec::new())
    }
}

async fn subscribe_all(commands: &mpsc::Sender<Subscription>, targets: Vec<String>) {
    for target in targets {
        if commands.send(Subscription::Object(target)).await.is_err() {
            tracing::debug!("connection closed before subscriptions were sent");
            return;
        }
    }
}

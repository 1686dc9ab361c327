//! Pair rows and their current liquidity snapshot.

use serde::Serialize;

use super::PairId;

/// Token side of a pair, with the flags the liquidity filter needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairToken {
    /// Token store key.
    pub id: i32,
    /// Token contract address.
    pub address: String,
    /// Metadata unreadable.
    pub malformed: bool,
    /// No contract at the address.
    pub no_contract: bool,
}

impl PairToken {
    /// Whether the token is usable for liquidity tracking.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.malformed && !self.no_contract
    }
}

/// A pair joined with both of its tokens.
///
/// `token0` / `token1` keep the order the factory reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pair {
    /// Store key.
    pub id: PairId,
    /// Pair contract address (`ct_…`).
    pub address: String,
    /// First token as reported by the factory.
    pub token0: PairToken,
    /// Second token as reported by the factory.
    pub token1: PairToken,
    /// Live snapshot is current.
    pub synchronized: bool,
}

impl Pair {
    /// Both tokens are usable.
    #[must_use]
    pub const fn has_valid_tokens(&self) -> bool {
        self.token0.is_valid() && self.token1.is_valid()
    }

    /// The account id that holds the pair's reserves (`ak_…` twin of the
    /// contract id).
    #[must_use]
    pub fn account_address(&self) -> String {
        contract_account(&self.address)
    }
}

/// Maps a `ct_…` contract id to the `ak_…` account holding its balances.
#[must_use]
pub fn contract_account(address: &str) -> String {
    match address.strip_prefix("ct_") {
        Some(rest) => format!("ak_{rest}"),
        None => address.to_string(),
    }
}

/// Latest known liquidity of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PairLiquidity {
    /// Total supply of the pair's liquidity token.
    pub total_supply: u128,
    /// Balance of token0 held by the pair.
    pub reserve0: u128,
    /// Balance of token1 held by the pair.
    pub reserve1: u128,
    /// Height the values were read at.
    pub height: u64,
}

/// Counters reported by the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Number of known pairs.
    pub pairs: u64,
    /// Pairs whose snapshot is current.
    pub synchronized: u64,
}

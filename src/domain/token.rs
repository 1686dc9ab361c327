//! Token rows and the metadata discovery reads for them.

use serde::Serialize;

/// A token row as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    /// Store key.
    pub id: i32,
    /// Contract address (`ct_…`), unique.
    pub address: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Human-readable name.
    pub name: String,
    /// Decimal places.
    pub decimals: i32,
    /// Metadata could not be read from the contract.
    pub malformed: bool,
    /// No contract exists at the address.
    pub no_contract: bool,
    /// Curated listing flag.
    pub listed: bool,
}

impl Token {
    /// A token can only be listed when its metadata is sound.
    #[must_use]
    pub const fn is_listable(&self) -> bool {
        !self.malformed && !self.no_contract
    }
}

/// Metadata read from a token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    /// Human-readable name.
    pub name: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Decimal places.
    pub decimals: i32,
}

/// Why token metadata could not be read.
#[derive(Debug, thiserror::Error)]
pub enum TokenMetadataError {
    /// The contract exists but does not answer like an AEX-9 token.
    #[error("token metadata is malformed: {0}")]
    Malformed(String),
    /// There is no contract at the address.
    #[error("no contract at token address")]
    NoContract,
    /// Anything else; discovery must not swallow it.
    #[error("unexpected token metadata failure: {0}")]
    Unexpected(#[from] crate::error::IndexerError),
}

/// A token about to be inserted by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToken {
    /// Contract address.
    pub address: String,
    /// Ticker symbol (empty when unreadable).
    pub symbol: String,
    /// Name (empty when unreadable).
    pub name: String,
    /// Decimals (0 when unreadable).
    pub decimals: i32,
    /// Metadata was unreadable.
    pub malformed: bool,
    /// No contract at the address.
    pub no_contract: bool,
}

impl NewToken {
    /// Builds a well-formed token from its metadata.
    #[must_use]
    pub fn from_metadata(address: String, meta: TokenMetadata) -> Self {
        Self {
            address,
            symbol: meta.symbol,
            name: meta.name,
            decimals: meta.decimals,
            malformed: false,
            no_contract: false,
        }
    }

    /// Builds a degraded token whose metadata could not be read.
    #[must_use]
    pub fn degraded(address: String, no_contract: bool) -> Self {
        Self {
            address,
            symbol: String::new(),
            name: String::new(),
            decimals: 0,
            malformed: !no_contract,
            no_contract,
        }
    }
}

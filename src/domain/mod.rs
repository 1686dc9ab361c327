//! Domain layer: pairs, tokens, liquidity history and decoded events.
//!
//! This module contains the indexer's data model: the pair identity, the
//! token and pair rows discovery maintains, the history rows the importer
//! writes, the error ledger rows, and the decoded pair contract events.

pub mod contract_event;
pub mod error_record;
pub mod history;
pub mod pair;
pub mod pair_id;
pub mod token;

pub use contract_event::{
    ContractEvent, ContractLog, EventKind, EventSignature, PAIR_BURN_EVENT, PAIR_CREATED_EVENT,
    PAIR_MINT_EVENT, SWAP_TOKENS_EVENT, SYNC_EVENT, parse_event,
};
pub use error_record::{ErrorKey, ErrorRecord};
pub use history::{EventType, HistoryEntry, HistoryEntryContext, LogPosition, NewHistoryEntry};
pub use pair::{Pair, PairLiquidity, PairToken, SyncStatus, contract_account};
pub use pair_id::PairId;
pub use token::{NewToken, Token, TokenMetadata, TokenMetadataError};

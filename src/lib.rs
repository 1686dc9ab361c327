//! # dex-indexer
//!
//! Chain synchronization and reconciliation for an aeternity DEX indexer.
//!
//! The crate mirrors a factory's pairs and tokens into PostgreSQL, keeps
//! each pair's liquidity snapshot live from the middleware websocket,
//! backfills liquidity history from the middleware's log index and rolls
//! that history back whenever it diverges from on-chain balances.
//!
//! ## Architecture
//!
//! ```text
//! Middleware websocket ──► RealtimeClient (realtime/)
//!                               │
//!                               ▼
//!                         PairSyncService ──► ChainClient (clients/)
//!                               │
//! TaskScheduler ──► HistoryImporter / HistoryValidator ──► Middleware (clients/)
//!     (service/)            │        │
//!                           │        └── ErrorLedger
//!                           ▼
//!                   PersistenceGateway (persistence/) ──► PostgreSQL
//!
//! Status server (api/) ──► PersistenceGateway, RunGuard
//! ```

pub mod api;
pub mod app_state;
pub mod cache;
pub mod clients;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod realtime;
pub mod service;

#[cfg(test)]
#[allow(missing_docs, missing_debug_implementations)]
mod testing;

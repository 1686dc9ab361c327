//! Upstream clients: node, middleware and price oracle.
//!
//! Each concern sits behind a trait so the sync services can be driven by
//! in-process fakes in tests.

pub mod chain;
pub mod middleware;
pub mod price;

pub use chain::{AeChainClient, ChainClient, TransactionInfo};
pub use middleware::{ContractCreation, MdwClient, Middleware, Page};
pub use price::{HttpPriceOracle, NoPriceOracle, PriceOracle};

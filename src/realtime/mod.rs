//! Realtime event client for the middleware websocket.
//!
//! The middleware pushes mined transactions for subscribed targets. This
//! module decodes the wire format, keeps the socket alive and reports
//! lifecycle changes over a channel; the pair sync decides what to do with
//! them.

pub mod connection;
pub mod messages;
pub mod subscription;

pub use connection::{CloseReason, ConnectionState, RealtimeClient, RealtimeEvent};
pub use messages::{Channel, Subscription, TransactionEvent, TxBody};

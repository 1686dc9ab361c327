//! Middleware websocket wire format.
//!
//! Outgoing: `{"op": "Subscribe", "payload": "Object", "target": "ct_..."}`.
//!
//! Incoming messages come in three shapes:
//! - a bare array, the acknowledged subscription list;
//! - a bare string, either the benign `"already subscribed to target"` or a
//!   server-side error;
//! - an object `{"subscription": "Object" | "Transactions", "payload": {..}}`
//!   carrying a mined transaction.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Server string sent when a target is subscribed twice.
pub const ALREADY_SUBSCRIBED: &str = "already subscribed to target";

/// Channel literal for the all-transactions subscription.
pub const TRANSACTIONS_CHANNEL: &str = "Transactions";

/// Something to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    /// Every mined transaction.
    Transactions,
    /// Transactions touching one contract or account.
    Object(String),
}

/// A client → server command.
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingCommand {
    op: &'static str,
    payload: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

impl OutgoingCommand {
    /// Subscribe command for `subscription`.
    #[must_use]
    pub fn subscribe(subscription: &Subscription) -> Self {
        match subscription {
            Subscription::Transactions => Self {
                op: "Subscribe",
                payload: TRANSACTIONS_CHANNEL,
                target: None,
            },
            Subscription::Object(target) => Self {
                op: "Subscribe",
                payload: "Object",
                target: Some(target.clone()),
            },
        }
    }
}

/// Acknowledged subscription list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionAck {
    /// The all-transactions channel is active.
    pub transactions: bool,
    /// Subscribed object targets.
    pub targets: Vec<String>,
}

/// Channel a transaction arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Channel {
    /// Object subscription.
    Object,
    /// All-transactions subscription.
    Transactions,
}

/// Transaction body, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum TxBody {
    /// A contract call.
    ContractCallTx {
        /// Called contract.
        contract_id: String,
        /// Calling account.
        caller_id: String,
    },
    /// A coin transfer.
    SpendTx {
        /// Sending account.
        sender_id: String,
        /// Receiving account or name.
        recipient_id: String,
    },
}

/// A mined transaction pushed by the middleware.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionEvent {
    /// Transaction hash.
    pub hash: String,
    /// Micro-block hash.
    #[serde(default)]
    pub block_hash: Option<String>,
    /// Key-block height.
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Transaction body.
    pub tx: TxBody,
}

#[derive(Debug, Deserialize)]
struct TransactionEnvelope {
    subscription: Channel,
    payload: TransactionEvent,
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Subscription list acknowledgement.
    Ack(SubscriptionAck),
    /// A target was already subscribed.
    AlreadySubscribed,
    /// A transaction on a subscribed channel.
    Transaction(Channel, TransactionEvent),
}

/// Decodes one text frame.
///
/// # Errors
///
/// Returns [`IndexerError::Protocol`] for server error strings and any
/// shape other than the three above.
pub fn parse_message(text: &str) -> Result<IncomingMessage, IndexerError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| IndexerError::Protocol(format!("invalid JSON frame: {e}")))?;
    match value {
        serde_json::Value::Array(items) => {
            let mut ack = SubscriptionAck::default();
            for item in items {
                match item.as_str() {
                    Some(TRANSACTIONS_CHANNEL) => ack.transactions = true,
                    Some(target) => ack.targets.push(target.to_string()),
                    None => {
                        return Err(IndexerError::Protocol(format!(
                            "non-string subscription entry {item}"
                        )));
                    }
                }
            }
            Ok(IncomingMessage::Ack(ack))
        }
        serde_json::Value::String(text) if text == ALREADY_SUBSCRIBED => {
            Ok(IncomingMessage::AlreadySubscribed)
        }
        serde_json::Value::String(text) => {
            Err(IndexerError::Protocol(format!("server error: {text}")))
        }
        serde_json::Value::Object(_) => {
            let envelope: TransactionEnvelope = serde_json::from_value(value)
                .map_err(|e| IndexerError::Protocol(format!("unexpected message: {e}")))?;
            Ok(IncomingMessage::Transaction(
                envelope.subscription,
                envelope.payload,
            ))
        }
        other => Err(IndexerError::Protocol(format!("unexpected message {other}"))),
    }
}

//! Pair contract logs and the liquidity events decoded from them.
//!
//! Every log carries the hash of its event constructor: blake2b-256 of the
//! constructor name, base32hex-encoded as the middleware reports it. The
//! decoded `event_name` is only present for contracts the middleware knows.
//! [`parse_event`] matches the hash against a closed table of the four
//! events a pair emits and extracts their integer fields from the log's
//! indexed arguments and its `|`-separated data payload.

use serde::Deserialize;

use super::LogPosition;
use crate::error::IndexerError;

/// A contract log as served by the middleware's `contracts/logs` index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContractLog {
    /// Indexed arguments (integers and addresses).
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Raw data payload.
    #[serde(default)]
    pub data: String,
    /// Micro-block hash.
    pub block_hash: String,
    /// Micro-block time in milliseconds.
    pub block_time: i64,
    /// Hash of the transaction that emitted the log.
    pub call_tx_hash: String,
    /// Global index of that transaction.
    pub call_txi: i64,
    /// Emitting contract.
    pub contract_id: String,
    /// Event hash as reported by the middleware.
    #[serde(default)]
    pub event_hash: Option<String>,
    /// Decoded event constructor name.
    #[serde(default)]
    pub event_name: Option<String>,
    /// Key-block height.
    pub height: u64,
    /// Log index inside the transaction.
    pub log_idx: i32,
}

impl ContractLog {
    /// Whether the log was emitted by `signature`'s event.
    ///
    /// Matches on the event hash; the decoded name is only consulted when
    /// the middleware reported no hash.
    #[must_use]
    pub fn emits(&self, signature: &EventSignature) -> bool {
        match self.event_hash.as_deref() {
            Some(hash) => hash == signature.hash,
            None => self.event_name.as_deref() == Some(signature.name),
        }
    }

    /// Chain position of the log.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        LogPosition {
            micro_block_time: self.block_time,
            transaction_index: self.call_txi,
            log_index: self.log_idx,
        }
    }
}

/// Event kinds a pair contract emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// `Sync(reserve0, reserve1)`.
    Sync,
    /// `SwapTokens(in0, in1, out0, out1)`.
    SwapTokens,
    /// `PairMint(amount0, amount1)`.
    PairMint,
    /// `PairBurn(amount0, amount1)`.
    PairBurn,
}

impl EventKind {
    /// Number of integer fields the event carries.
    const fn arity(self) -> usize {
        match self {
            Self::SwapTokens => 4,
            Self::Sync | Self::PairMint | Self::PairBurn => 2,
        }
    }
}

/// An event constructor and its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSignature {
    /// Constructor name.
    pub name: &'static str,
    /// Encoded blake2b-256 hash of the name.
    pub hash: &'static str,
}

/// `Sync(reserve0, reserve1)` of a pair.
pub const SYNC_EVENT: EventSignature = EventSignature {
    name: "Sync",
    hash: "6O232NLB36RGK54HEJPVDFJVCSIVFV29KPORC07CSSDARM7LV4L0====",
};

/// `SwapTokens(sender, to, "in0|in1|out0|out1")` of a pair.
pub const SWAP_TOKENS_EVENT: EventSignature = EventSignature {
    name: "SwapTokens",
    hash: "K39AB2I57LEUOUQ04LTEOMSJPJC3G9VGFRKVNJ5QLRMVCMDOPIMG====",
};

/// `PairMint(sender, amount0, amount1)` of a pair.
pub const PAIR_MINT_EVENT: EventSignature = EventSignature {
    name: "PairMint",
    hash: "L2BEDU7I5T8OSEUPB61900P8FJR637OE4MC4A9875C390RMQHSN0====",
};

/// `PairBurn(sender, to, "amount0|amount1")` of a pair.
pub const PAIR_BURN_EVENT: EventSignature = EventSignature {
    name: "PairBurn",
    hash: "OIS2ALGSJ03MTP2BR5RBFL1GOUGESRVPGE58LGM0MVG9K3VAFKUG====",
};

/// `PairCreated(pair, token0, token1)` of the factory.
pub const PAIR_CREATED_EVENT: EventSignature = EventSignature {
    name: "PairCreated",
    hash: "KLKDKKVIPOL311M71BTITBN48IQQ4535IQUV0DDTVPOOTNDB3TLG====",
};

const EVENT_SIGNATURES: [(EventSignature, EventKind); 4] = [
    (SYNC_EVENT, EventKind::Sync),
    (SWAP_TOKENS_EVENT, EventKind::SwapTokens),
    (PAIR_MINT_EVENT, EventKind::PairMint),
    (PAIR_BURN_EVENT, EventKind::PairBurn),
];

/// A decoded pair event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractEvent {
    /// Absolute reserves after a state change.
    Sync {
        /// Token0 reserve.
        reserve0: u128,
        /// Token1 reserve.
        reserve1: u128,
    },
    /// Reserve deltas of a swap (`in - out`).
    SwapTokens {
        /// Token0 change.
        delta0: i128,
        /// Token1 change.
        delta1: i128,
    },
    /// Reserve deltas of a mint.
    PairMint {
        /// Token0 change.
        delta0: i128,
        /// Token1 change.
        delta1: i128,
    },
    /// Reserve deltas of a burn (negative amounts).
    PairBurn {
        /// Token0 change.
        delta0: i128,
        /// Token1 change.
        delta1: i128,
    },
}

impl ContractEvent {
    /// Signed deltas for delta events; `None` for `Sync`.
    #[must_use]
    pub const fn deltas(&self) -> Option<(i128, i128)> {
        match *self {
            Self::Sync { .. } => None,
            Self::SwapTokens { delta0, delta1 }
            | Self::PairMint { delta0, delta1 }
            | Self::PairBurn { delta0, delta1 } => Some((delta0, delta1)),
        }
    }
}

fn event_kind(log: &ContractLog) -> Option<EventKind> {
    EVENT_SIGNATURES
        .iter()
        .find(|(signature, _)| log.emits(signature))
        .map(|(_, kind)| *kind)
}

/// Decodes a pair log into a liquidity event.
///
/// Returns `Ok(None)` for logs of any other event, including logs whose
/// hash is unknown.
///
/// # Errors
///
/// Returns [`IndexerError::InvalidLog`] when a known event carries too few
/// or unparseable integer fields.
pub fn parse_event(log: &ContractLog) -> Result<Option<ContractEvent>, IndexerError> {
    let Some(kind) = event_kind(log) else {
        return Ok(None);
    };

    let values = integer_fields(log)?;
    let arity = kind.arity();
    if values.len() < arity {
        return Err(IndexerError::InvalidLog(format!(
            "{kind:?} at {}#{} carries {} integer fields, expected {arity}",
            log.call_tx_hash,
            log.log_idx,
            values.len()
        )));
    }

    let signed = if kind == EventKind::Sync {
        Vec::new()
    } else {
        values
            .iter()
            .take(arity)
            .map(|v| {
                i128::try_from(*v)
                    .map_err(|_| IndexerError::InvalidLog(format!("value {v} exceeds i128")))
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let event = match (kind, values.as_slice(), signed.as_slice()) {
        (EventKind::Sync, [reserve0, reserve1, ..], _) => ContractEvent::Sync {
            reserve0: *reserve0,
            reserve1: *reserve1,
        },
        (EventKind::SwapTokens, _, [in0, in1, out0, out1]) => ContractEvent::SwapTokens {
            delta0: in0 - out0,
            delta1: in1 - out1,
        },
        (EventKind::PairMint, _, [amount0, amount1]) => ContractEvent::PairMint {
            delta0: *amount0,
            delta1: *amount1,
        },
        (EventKind::PairBurn, _, [amount0, amount1]) => ContractEvent::PairBurn {
            delta0: -amount0,
            delta1: -amount1,
        },
        _ => {
            return Err(IndexerError::InvalidLog(format!(
                "{kind:?} field layout mismatch at {}#{}",
                log.call_tx_hash, log.log_idx
            )));
        }
    };

    Ok(Some(event))
}

/// Collects the integer fields of a log: indexed integer arguments first,
/// then the `|`-separated data payload. Address arguments are skipped.
fn integer_fields(log: &ContractLog) -> Result<Vec<u128>, IndexerError> {
    let mut values = Vec::with_capacity(log.args.len() + 4);

    for arg in &log.args {
        match arg {
            serde_json::Value::String(s) if is_address(s) => {}
            serde_json::Value::String(s) => values.push(parse_integer(s)?),
            serde_json::Value::Number(n) => {
                let v = n.as_u64().ok_or_else(|| {
                    IndexerError::InvalidLog(format!("non-integer argument {n}"))
                })?;
                values.push(u128::from(v));
            }
            other => {
                return Err(IndexerError::InvalidLog(format!(
                    "unsupported argument {other}"
                )));
            }
        }
    }

    for part in log.data.split('|').map(str::trim).filter(|p| !p.is_empty()) {
        values.push(parse_integer(part)?);
    }

    Ok(values)
}

fn is_address(s: &str) -> bool {
    ["ak_", "ct_", "ok_", "nm_"]
        .iter()
        .any(|prefix| s.starts_with(prefix))
}

fn parse_integer(s: &str) -> Result<u128, IndexerError> {
    s.parse::<u128>()
        .map_err(|e| IndexerError::InvalidLog(format!("cannot parse {s:?} as integer: {e}")))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(signature: EventSignature, args: serde_json::Value, data: &str) -> ContractLog {
        ContractLog {
            args: args.as_array().cloned().unwrap_or_default(),
            data: data.to_string(),
            block_hash: "mh_1".to_string(),
            block_time: 1_000,
            call_tx_hash: "th_1".to_string(),
            call_txi: 7,
            contract_id: "ct_pair".to_string(),
            event_hash: Some(signature.hash.to_string()),
            event_name: Some(signature.name.to_string()),
            height: 10,
            log_idx: 0,
        }
    }

    #[test]
    fn sync_reads_reserves() {
        let parsed = parse_event(&log(SYNC_EVENT, json!(["100", "250"]), ""));
        let Ok(Some(event)) = parsed else {
            panic!("expected a Sync event, got {parsed:?}");
        };
        assert_eq!(
            event,
            ContractEvent::Sync {
                reserve0: 100,
                reserve1: 250
            }
        );
        assert!(event.deltas().is_none());
    }

    #[test]
    fn swap_deltas_are_in_minus_out() {
        let parsed = parse_event(&log(SWAP_TOKENS_EVENT, json!(["ak_caller", "ak_to"]), "1|0|0|1"));
        let Ok(Some(event)) = parsed else {
            panic!("expected a SwapTokens event, got {parsed:?}");
        };
        assert_eq!(event.deltas(), Some((1, -1)));
    }

    #[test]
    fn mint_keeps_sign_and_burn_negates() {
        let mint = parse_event(&log(PAIR_MINT_EVENT, json!(["ak_sender", "23", "0"]), ""));
        let Ok(Some(mint)) = mint else {
            panic!("expected PairMint");
        };
        assert_eq!(mint.deltas(), Some((23, 0)));

        let burn = parse_event(&log(PAIR_BURN_EVENT, json!(["ak_sender", "ak_to"]), "5|7"));
        let Ok(Some(burn)) = burn else {
            panic!("expected PairBurn");
        };
        assert_eq!(burn.deltas(), Some((-5, -7)));
    }

    #[test]
    fn unknown_event_is_dropped() {
        let transfer = EventSignature {
            name: "Transfer",
            hash: "48U3JOKTVTI6FVMTK2BLHM8NG72JEBG93VS6MENPSC8E71IM5FNG====",
        };
        let parsed = parse_event(&log(transfer, json!(["ak_a", "ak_b", "5"]), ""));
        assert!(matches!(parsed, Ok(None)));

        let mut renamed = log(transfer, json!(["1", "2"]), "");
        renamed.event_name = Some("Sync".to_string());
        assert!(matches!(parse_event(&renamed), Ok(None)));
    }

    #[test]
    fn events_are_matched_by_hash_without_a_name() {
        let mut sync = log(SYNC_EVENT, json!(["100", "100"]), "");
        sync.event_name = None;
        let parsed = parse_event(&sync);
        assert_eq!(
            parsed.ok().flatten(),
            Some(ContractEvent::Sync {
                reserve0: 100,
                reserve1: 100
            })
        );

        let mut created = log(PAIR_CREATED_EVENT, json!(["ct_p", "ct_a", "ct_b"]), "");
        created.event_name = None;
        assert!(created.emits(&PAIR_CREATED_EVENT));
        assert!(!created.emits(&SYNC_EVENT));
    }

    #[test]
    fn name_is_used_only_when_the_hash_is_missing() {
        let mut mint = log(PAIR_MINT_EVENT, json!(["ak_sender", "23", "0"]), "");
        mint.event_hash = None;
        let Ok(Some(event)) = parse_event(&mint) else {
            panic!("expected PairMint");
        };
        assert_eq!(event.deltas(), Some((23, 0)));
    }

    #[test]
    fn missing_fields_are_an_error() {
        let parsed = parse_event(&log(SWAP_TOKENS_EVENT, json!([]), "1|2"));
        assert!(matches!(parsed, Err(IndexerError::InvalidLog(_))));

        let garbage = parse_event(&log(SYNC_EVENT, json!(["12x", "3"]), ""));
        assert!(matches!(garbage, Err(IndexerError::InvalidLog(_))));
    }

    #[test]
    fn deserializes_middleware_shape() {
        let raw = json!({
            "args": ["10", "20"],
            "block_hash": "mh_abc",
            "block_time": 1_700_000_000_000_i64,
            "call_tx_hash": "th_abc",
            "call_txi": 99,
            "contract_id": "ct_pair",
            "contract_txi": 5,
            "event_hash": "6O232NLB36RGK54HEJPVDFJVCSIVFV29KPORC07CSSDARM7LV4L0====",
            "event_name": null,
            "ext_caller_contract_id": null,
            "height": 800_000,
            "log_idx": 2,
            "micro_index": 3
        });
        let parsed: Result<ContractLog, _> = serde_json::from_value(raw);
        let Ok(parsed) = parsed else {
            panic!("log should deserialize");
        };
        assert_eq!(parsed.position().transaction_index, 99);
        assert_eq!(parsed.data, "");
        assert!(parsed.emits(&SYNC_EVENT));
    }
}

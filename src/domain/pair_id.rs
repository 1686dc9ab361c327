//! Type-safe pair identifier.
//!
//! [`PairId`] wraps the database-assigned serial key of a pair so it cannot
//! be confused with token ids, heights or log indexes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a liquidity pair.
///
/// Ids are handed out in insertion order, which discovery keeps equal to
/// chronological factory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairId(i32);

impl PairId {
    /// Creates a `PairId` from a raw store key.
    #[must_use]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw store key.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for PairId {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl From<PairId> for i32 {
    fn from(id: PairId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_raw_key() {
        assert!(PairId::new(1) < PairId::new(2));
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&PairId::new(7)).unwrap_or_default();
        assert_eq!(json, "7");
    }
}

//! Per-connection subscription bookkeeping.
//!
//! Tracks which targets were requested on the current socket so a target is
//! sent at most once, and which ones the server acknowledged.

use std::collections::HashSet;

use super::messages::{Subscription, SubscriptionAck};

/// Requested and acknowledged subscriptions of one connection.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    requested: HashSet<Subscription>,
    acknowledged: SubscriptionAck,
}

impl SubscriptionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request; returns `false` if it was already requested.
    pub fn request(&mut self, subscription: &Subscription) -> bool {
        self.requested.insert(subscription.clone())
    }

    /// Replaces the acknowledged list with the server's latest view.
    pub fn acknowledge(&mut self, ack: SubscriptionAck) {
        self.acknowledged = ack;
    }

    /// Returns `true` if the server acknowledged `subscription`.
    #[must_use]
    pub fn is_acknowledged(&self, subscription: &Subscription) -> bool {
        match subscription {
            Subscription::Transactions => self.acknowledged.transactions,
            Subscription::Object(target) => self.acknowledged.targets.contains(target),
        }
    }

    /// Requests not (yet) acknowledged.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.requested
            .iter()
            .filter(|s| !self.is_acknowledged(s))
            .count()
    }

    /// Number of requested subscriptions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.requested.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(target: &str) -> Subscription {
        Subscription::Object(target.to_string())
    }

    #[test]
    fn requests_are_deduplicated() {
        let mut set = SubscriptionSet::new();
        assert!(set.request(&object("ct_a")));
        assert!(!set.request(&object("ct_a")));
        assert!(set.request(&Subscription::Transactions));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn acknowledgement_clears_pending() {
        let mut set = SubscriptionSet::new();
        set.request(&object("ct_a"));
        set.request(&object("ct_b"));
        assert_eq!(set.pending(), 2);

        set.acknowledge(SubscriptionAck {
            transactions: false,
            targets: vec!["ct_a".to_string()],
        });
        assert!(set.is_acknowledged(&object("ct_a")));
        assert!(!set.is_acknowledged(&Subscription::Transactions));
        assert_eq!(set.pending(), 1);
    }
}

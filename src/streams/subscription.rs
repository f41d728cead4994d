//! Subscription table
//!
//! Read-only after construction; shared by reference between all callback
//! threads without locking.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::PluginConfig;
use crate::streams::store::SessionStore;

/// One configured (system, talkgroup) pattern and where its calls go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Talkgroup to match, 0 matches any talkgroup
    pub talkgroup_id: u64,
    /// System to match, empty matches any system
    pub system_short_name: String,
    /// Listener receiving this stream's frames
    pub destination: SocketAddr,
}

impl Subscription {
    pub fn new(talkgroup_id: u64, system_short_name: impl Into<String>, destination: SocketAddr) -> Self {
        Self {
            talkgroup_id,
            system_short_name: system_short_name.into(),
            destination,
        }
    }

    /// Whether a call on `short_name` carrying any of `candidates` belongs here
    pub fn matches(&self, short_name: &str, candidates: &[u64]) -> bool {
        let system_matches =
            self.system_short_name.is_empty() || self.system_short_name == short_name;
        system_matches
            && candidates
                .iter()
                .any(|&tg| self.talkgroup_id == 0 || tg == self.talkgroup_id)
    }
}

/// Talkgroups a call is matched on: its patches, or its own talkgroup if unpatched
pub fn talkgroup_candidates(talkgroup: u64, patched_talkgroups: &[u64]) -> Vec<u64> {
    if patched_talkgroups.is_empty() {
        vec![talkgroup]
    } else {
        patched_talkgroups.to_vec()
    }
}

/// All configured streams, in configuration order
#[derive(Debug)]
pub struct SubscriptionTable {
    streams: Vec<Arc<SessionStore>>,
}

impl SubscriptionTable {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        let streams = subscriptions
            .into_iter()
            .map(|subscription| Arc::new(SessionStore::new(Arc::new(subscription))))
            .collect();
        Self { streams }
    }

    pub fn from_config(config: &PluginConfig) -> Self {
        let subscriptions = config
            .streams
            .iter()
            .map(|stream| {
                let subscription = Subscription::new(
                    stream.talkgroup_id,
                    stream.short_name.clone(),
                    stream.destination(config.address, config.port),
                );
                tracing::info!(
                    tgid = subscription.talkgroup_id,
                    system = %subscription.system_short_name,
                    destination = %subscription.destination,
                    "streaming talkgroup"
                );
                subscription
            })
            .collect();
        Self::new(subscriptions)
    }

    /// First stream matching the call, if any
    pub fn resolve(&self, short_name: &str, candidates: &[u64]) -> Option<&Arc<SessionStore>> {
        self.streams
            .iter()
            .find(|store| store.subscription().matches(short_name, candidates))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Sessions currently in flight across every stream
    pub fn active_sessions(&self) -> usize {
        self.streams.iter().map(|store| store.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dest() -> SocketAddr {
        "127.0.0.1:9123".parse().unwrap()
    }

    #[test]
    fn test_exact_match() {
        let sub = Subscription::new(100, "SYS1", dest());
        assert!(sub.matches("SYS1", &[100]));
        assert!(!sub.matches("SYS2", &[100]));
        assert!(!sub.matches("SYS1", &[101]));
    }

    #[test]
    fn test_wildcards() {
        let any_tg = Subscription::new(0, "SYS1", dest());
        assert!(any_tg.matches("SYS1", &[1]));
        assert!(any_tg.matches("SYS1", &[65535]));
        assert!(!any_tg.matches("SYS2", &[1]));

        let any_system = Subscription::new(100, "", dest());
        assert!(any_system.matches("SYS1", &[100]));
        assert!(any_system.matches("OTHER", &[100]));
        assert!(!any_system.matches("SYS1", &[7]));
    }

    #[test]
    fn test_no_candidates_never_match() {
        let everything = Subscription::new(0, "", dest());
        assert!(!everything.matches("SYS1", &[]));
    }

    #[test]
    fn test_candidates_fall_back_to_talkgroup() {
        assert_eq!(talkgroup_candidates(100, &[]), vec![100]);
        assert_eq!(talkgroup_candidates(100, &[200, 300]), vec![200, 300]);
    }

    #[test]
    fn test_patched_talkgroup_matches() {
        let table = SubscriptionTable::new(vec![Subscription::new(300, "SYS1", dest())]);
        let candidates = talkgroup_candidates(100, &[100, 300]);
        assert!(table.resolve("SYS1", &candidates).is_some());
    }

    #[test]
    fn test_first_match_wins() {
        let table = SubscriptionTable::new(vec![
            Subscription::new(100, "SYS1", "127.0.0.1:1".parse().unwrap()),
            Subscription::new(0, "", "127.0.0.1:2".parse().unwrap()),
        ]);

        let store = table.resolve("SYS1", &[100]).unwrap();
        assert_eq!(store.subscription().destination.port(), 1);

        let store = table.resolve("SYS2", &[100]).unwrap();
        assert_eq!(store.subscription().destination.port(), 2);
    }

    #[test]
    fn test_unmatched_resolves_to_none() {
        let table = SubscriptionTable::new(vec![Subscription::new(100, "SYS1", dest())]);
        assert!(table.resolve("SYS1", &[200]).is_none());
        assert!(table.resolve("SYS9", &[100]).is_none());
    }

    proptest! {
        #[test]
        fn prop_zero_tgid_matches_any_talkgroup(tg in any::<u64>(), name in "[A-Z0-9]{1,8}") {
            let sub = Subscription::new(0, name.clone(), dest());
            prop_assert!(sub.matches(&name, &[tg]));
        }

        #[test]
        fn prop_empty_system_matches_any_system(tg in 1u64.., name in ".{0,16}") {
            let sub = Subscription::new(tg, "", dest());
            prop_assert!(sub.matches(&name, &[tg]));
        }

        #[test]
        fn prop_specific_subscription_rejects_other_talkgroups(tg in 1u64.., other in 1u64..) {
            prop_assume!(tg != other);
            let sub = Subscription::new(tg, "SYS1", dest());
            prop_assert!(!sub.matches("SYS1", &[other]));
        }
    }
}

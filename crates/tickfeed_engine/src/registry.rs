//! Per-collection subscription filters.

use crate::error::{FollowError, FollowResult};
use std::collections::{HashMap, HashSet};
use tickfeed_protocol::EventKind;

/// Filter state for one collection.
///
/// An empty set matches everything for its dimension; a non-empty set
/// admits only its members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionFilter {
    events: HashSet<EventKind>,
    keys: HashSet<String>,
}

impl CollectionFilter {
    /// Returns true if an event of `kind` on document `key` passes.
    pub fn accepts(&self, kind: EventKind, key: &str) -> bool {
        (self.events.is_empty() || self.events.contains(&kind))
            && (self.keys.is_empty() || self.keys.contains(key))
    }

    /// Accepted event kinds (empty = all).
    pub fn events(&self) -> &HashSet<EventKind> {
        &self.events
    }

    /// Accepted document keys (empty = all).
    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    /// Returns true if the filter admits every change.
    pub fn is_wildcard(&self) -> bool {
        self.events.is_empty() && self.keys.is_empty()
    }
}

/// A subscription descriptor.
///
/// `None` for events or keys means "not given". On unsubscribe, a
/// descriptor with neither removes the collection entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Collection name.
    pub collection: String,
    /// Event kinds to add or remove.
    pub events: Option<Vec<EventKind>>,
    /// Document keys to add or remove.
    pub keys: Option<Vec<String>>,
}

impl Subscription {
    /// Creates a descriptor for a whole collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            events: None,
            keys: None,
        }
    }

    /// Sets the event kinds.
    pub fn with_events(mut self, events: impl IntoIterator<Item = EventKind>) -> Self {
        self.events = Some(events.into_iter().collect());
        self
    }

    /// Sets the event kinds from their labels.
    pub fn with_event_labels<S: AsRef<str>>(
        self,
        labels: impl IntoIterator<Item = S>,
    ) -> FollowResult<Self> {
        let events = labels
            .into_iter()
            .map(|label| {
                let label = label.as_ref();
                EventKind::from_label(label).ok_or_else(|| FollowError::UnknownEvent(label.into()))
            })
            .collect::<FollowResult<Vec<_>>>()?;
        Ok(self.with_events(events))
    }

    /// Sets the document keys.
    pub fn with_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

impl From<&str> for Subscription {
    fn from(collection: &str) -> Self {
        Self::new(collection)
    }
}

impl From<String> for Subscription {
    fn from(collection: String) -> Self {
        Self::new(collection)
    }
}

/// Anything that normalizes to a list of subscription descriptors.
pub trait IntoSubscriptions {
    /// Converts into descriptors.
    fn into_subscriptions(self) -> Vec<Subscription>;
}

impl IntoSubscriptions for &str {
    fn into_subscriptions(self) -> Vec<Subscription> {
        vec![Subscription::new(self)]
    }
}

impl IntoSubscriptions for String {
    fn into_subscriptions(self) -> Vec<Subscription> {
        vec![Subscription::new(self)]
    }
}

impl IntoSubscriptions for Subscription {
    fn into_subscriptions(self) -> Vec<Subscription> {
        vec![self]
    }
}

impl IntoSubscriptions for Vec<Subscription> {
    fn into_subscriptions(self) -> Vec<Subscription> {
        self
    }
}

impl<const N: usize> IntoSubscriptions for [Subscription; N] {
    fn into_subscriptions(self) -> Vec<Subscription> {
        self.into()
    }
}

/// Collection name to filter state.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    collections: HashMap<String, CollectionFilter>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds events and keys to each named collection's filter.
    ///
    /// The filter is created empty (wildcard) if absent. Adding a value
    /// that is already present has no effect.
    pub fn subscribe(&mut self, subscriptions: impl IntoSubscriptions) {
        for sub in subscriptions.into_subscriptions() {
            let filter = self.collections.entry(sub.collection).or_default();
            if let Some(events) = sub.events {
                filter.events.extend(events);
            }
            if let Some(keys) = sub.keys {
                filter.keys.extend(keys);
            }
        }
    }

    /// Removes events and keys, or whole collections.
    ///
    /// Fails without changing anything if any descriptor names a
    /// collection that has no filter, including one removed by an earlier
    /// descriptor in the same call.
    pub fn unsubscribe(&mut self, subscriptions: impl IntoSubscriptions) -> FollowResult<()> {
        let subscriptions = subscriptions.into_subscriptions();
        {
            let mut present: HashSet<&str> = self.collections.keys().map(String::as_str).collect();
            for sub in &subscriptions {
                if !present.contains(sub.collection.as_str()) {
                    return Err(FollowError::UnknownCollection(sub.collection.clone()));
                }
                if sub.events.is_none() && sub.keys.is_none() {
                    present.remove(sub.collection.as_str());
                }
            }
        }

        for sub in subscriptions {
            if sub.events.is_none() && sub.keys.is_none() {
                self.collections.remove(&sub.collection);
                continue;
            }
            if let Some(filter) = self.collections.get_mut(&sub.collection) {
                for event in sub.events.unwrap_or_default() {
                    filter.events.remove(&event);
                }
                for key in sub.keys.unwrap_or_default() {
                    filter.keys.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Returns the filter for a collection.
    pub fn filter(&self, collection: &str) -> Option<&CollectionFilter> {
        self.collections.get(collection)
    }

    /// Returns true if the collection has a filter.
    pub fn contains(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }

    /// Returns the subscribed collection names.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Returns the number of subscribed collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Returns true if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_subscription() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe("users");

        let filter = registry.filter("users").unwrap();
        assert!(filter.is_wildcard());
        assert!(filter.accepts(EventKind::InsertOrUpdate, "any"));
        assert!(filter.accepts(EventKind::Delete, "other"));
        assert!(registry.filter("orders").is_none());
    }

    #[test]
    fn event_filter() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("users").with_events([EventKind::Delete]));

        let filter = registry.filter("users").unwrap();
        assert!(filter.accepts(EventKind::Delete, "k"));
        assert!(!filter.accepts(EventKind::InsertOrUpdate, "k"));
    }

    #[test]
    fn key_filter_applies_to_every_kind() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("users").with_keys(["k1"]));

        let filter = registry.filter("users").unwrap();
        assert!(filter.accepts(EventKind::InsertOrUpdate, "k1"));
        assert!(filter.accepts(EventKind::Delete, "k1"));
        assert!(!filter.accepts(EventKind::Delete, "k2"));
    }

    #[test]
    fn subscribe_is_additive_and_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("c").with_keys(["a"]));
        registry.subscribe(vec![
            Subscription::new("c").with_keys(["a", "b"]),
            Subscription::new("d"),
        ]);

        assert_eq!(registry.len(), 2);
        let keys = registry.filter("c").unwrap().keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("a") && keys.contains("b"));
    }

    #[test]
    fn unsubscribe_narrows() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("c").with_events(EventKind::ALL));
        registry
            .unsubscribe(Subscription::new("c").with_events([EventKind::InsertOrUpdate]))
            .unwrap();

        let filter = registry.filter("c").unwrap();
        assert!(filter.accepts(EventKind::Delete, "k"));
        assert!(!filter.accepts(EventKind::InsertOrUpdate, "k"));
    }

    #[test]
    fn bare_unsubscribe_removes_collection() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("c").with_keys(["a"]));
        registry.unsubscribe("c").unwrap();
        assert!(!registry.contains("c"));
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_lists_do_not_remove_collection() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("c").with_keys(["a"]));
        registry
            .unsubscribe(Subscription::new("c").with_keys(Vec::<String>::new()))
            .unwrap();
        assert_eq!(registry.filter("c").unwrap().keys().len(), 1);
    }

    #[test]
    fn unsubscribe_unknown_collection_fails_atomically() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("c").with_keys(["a"]));

        let err = registry
            .unsubscribe([Subscription::new("c"), Subscription::new("missing")])
            .unwrap_err();
        assert!(matches!(err, FollowError::UnknownCollection(ref name) if name == "missing"));
        assert!(registry.contains("c"));
    }

    #[test]
    fn repeated_descriptor_after_removal_fails_atomically() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(Subscription::new("c").with_keys(["a", "b"]));

        let err = registry
            .unsubscribe([Subscription::new("c"), Subscription::new("c").with_keys(["a"])])
            .unwrap_err();
        assert!(matches!(err, FollowError::UnknownCollection(ref name) if name == "c"));
        assert_eq!(registry.filter("c").unwrap().keys().len(), 2);
    }

    #[test]
    fn narrowing_unknown_collection_fails() {
        let mut registry = SubscriptionRegistry::new();
        for sub in [
            Subscription::new("x").with_events([EventKind::Delete]),
            Subscription::new("x").with_keys(["k"]),
        ] {
            let err = registry.unsubscribe(sub).unwrap_err();
            assert!(matches!(err, FollowError::UnknownCollection(ref name) if name == "x"));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn event_labels() {
        let sub = Subscription::new("c")
            .with_event_labels(["insert/update", "delete"])
            .unwrap();
        assert_eq!(
            sub.events,
            Some(vec![EventKind::InsertOrUpdate, EventKind::Delete])
        );

        let err = Subscription::new("c").with_event_labels(["update"]).unwrap_err();
        assert!(matches!(err, FollowError::UnknownEvent(ref label) if label == "update"));
    }
}

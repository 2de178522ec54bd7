//! Filtered dispatch of change events to listeners.

use crate::registry::SubscriptionRegistry;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use tickfeed_protocol::{EventKind, LogEntry, Tick};

/// A committed document change delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Log position of the entry, if the record carried one.
    pub tick: Option<Tick>,
    /// Collection name.
    pub collection: String,
    /// Document key.
    pub key: String,
    /// Kind of change.
    pub kind: EventKind,
    /// Transaction the change belonged to (`"0"` for standalone writes).
    pub transaction_id: String,
    /// Raw JSON text of the document.
    pub payload: String,
}

impl ChangeEvent {
    /// Builds an event from a document entry. Control and unrecognized
    /// entries yield `None`.
    pub fn from_entry(entry: LogEntry) -> Option<Self> {
        let kind = entry.op_type.event_kind()?;
        Some(Self {
            tick: entry.tick,
            collection: entry.collection?,
            key: entry.document_key?,
            kind,
            transaction_id: entry.transaction_id,
            payload: entry.payload?,
        })
    }

    /// Returns the operation label (`"insert/update"` or `"delete"`).
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

/// A change listener.
pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// An accepted event together with the listeners it goes to.
///
/// Deliveries are built under the engine lock and invoked after it is
/// released, so listeners may call back into the follower.
pub struct Delivery {
    /// The event.
    pub event: ChangeEvent,
    listeners: Vec<Listener>,
}

impl Delivery {
    /// Invokes every listener in registration order.
    pub fn deliver(&self) {
        for listener in &self.listeners {
            listener(&self.event);
        }
    }

    /// Returns the number of listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Applies subscription filters and fans accepted events out to listeners.
#[derive(Default)]
pub struct Dispatcher {
    registry: SubscriptionRegistry,
    listeners: HashMap<String, Vec<Listener>>,
}

impl Dispatcher {
    /// Creates a dispatcher with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Returns the subscription registry for mutation.
    pub fn registry_mut(&mut self) -> &mut SubscriptionRegistry {
        &mut self.registry
    }

    /// Registers a listener for a collection.
    pub fn add_listener(&mut self, collection: impl Into<String>, listener: Listener) {
        self.listeners
            .entry(collection.into())
            .or_default()
            .push(listener);
    }

    /// Registers a channel for a collection and returns its receiver.
    ///
    /// A receiver that is dropped simply stops receiving.
    pub fn add_channel(&mut self, collection: impl Into<String>) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.add_listener(
            collection,
            Arc::new(move |event: &ChangeEvent| {
                let _ = tx.send(event.clone());
            }),
        );
        rx
    }

    /// Removes every listener for a collection.
    pub fn remove_listeners(&mut self, collection: &str) -> usize {
        self.listeners
            .remove(collection)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Returns the number of listeners for a collection.
    pub fn listener_count(&self, collection: &str) -> usize {
        self.listeners.get(collection).map(Vec::len).unwrap_or(0)
    }

    /// Filters an entry. Returns a delivery if the collection is subscribed
    /// and its filter admits the entry's kind and key.
    pub fn dispatch(&self, entry: LogEntry) -> Option<Delivery> {
        let filter = self.registry.filter(entry.collection.as_deref()?)?;
        let kind = entry.op_type.event_kind()?;
        if !filter.accepts(kind, entry.document_key.as_deref()?) {
            return None;
        }

        let event = ChangeEvent::from_entry(entry)?;
        let listeners = self
            .listeners
            .get(&event.collection)
            .cloned()
            .unwrap_or_default();
        Some(Delivery { event, listeners })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Subscription;
    use parking_lot::Mutex;
    use tickfeed_protocol::OperationType;

    fn entry(op_type: OperationType, collection: &str, key: &str) -> LogEntry {
        LogEntry {
            tick: Some(Tick::from(1)),
            op_type,
            transaction_id: "0".into(),
            collection: Some(collection.into()),
            document_key: Some(key.into()),
            payload: Some(format!(r#"{{"_key":"{key}"}}"#)),
        }
    }

    fn recorder(dispatcher: &mut Dispatcher, collection: &str) -> Arc<Mutex<Vec<(String, String)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.add_listener(
            collection,
            Arc::new(move |event: &ChangeEvent| {
                sink.lock()
                    .push((event.payload.clone(), event.label().to_string()));
            }),
        );
        seen
    }

    #[test]
    fn unsubscribed_collection_is_dropped() {
        let mut dispatcher = Dispatcher::new();
        let seen = recorder(&mut dispatcher, "users");
        assert!(dispatcher
            .dispatch(entry(OperationType::InsertOrUpdate, "users", "u1"))
            .is_none());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn accepted_event_reaches_listeners() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.registry_mut().subscribe("users");
        let seen = recorder(&mut dispatcher, "users");

        let delivery = dispatcher
            .dispatch(entry(OperationType::Delete, "users", "u2"))
            .unwrap();
        assert_eq!(delivery.listener_count(), 1);
        delivery.deliver();

        assert_eq!(
            *seen.lock(),
            vec![(r#"{"_key":"u2"}"#.to_string(), "delete".to_string())]
        );
    }

    #[test]
    fn filters_are_applied() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.registry_mut().subscribe(
            Subscription::new("users")
                .with_events([EventKind::Delete])
                .with_keys(["u1"]),
        );

        assert!(dispatcher
            .dispatch(entry(OperationType::Delete, "users", "u1"))
            .is_some());
        assert!(dispatcher
            .dispatch(entry(OperationType::InsertOrUpdate, "users", "u1"))
            .is_none());
        assert!(dispatcher
            .dispatch(entry(OperationType::Delete, "users", "u2"))
            .is_none());
    }

    #[test]
    fn control_entries_are_never_dispatched() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.registry_mut().subscribe("users");
        let mut control = entry(OperationType::TxnCommit, "users", "u1");
        control.transaction_id = "12".into();
        assert!(dispatcher.dispatch(control).is_none());
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.registry_mut().subscribe("c");
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            dispatcher.add_listener("c", Arc::new(move |_: &ChangeEvent| order.lock().push(n)));
        }

        dispatcher
            .dispatch(entry(OperationType::InsertOrUpdate, "c", "k"))
            .unwrap()
            .deliver();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn channel_listener() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.registry_mut().subscribe("c");
        let rx = dispatcher.add_channel("c");

        dispatcher
            .dispatch(entry(OperationType::InsertOrUpdate, "c", "k"))
            .unwrap()
            .deliver();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.label(), "insert/update");

        drop(rx);
        // A dropped receiver must not break delivery.
        dispatcher
            .dispatch(entry(OperationType::InsertOrUpdate, "c", "k"))
            .unwrap()
            .deliver();
        assert_eq!(dispatcher.remove_listeners("c"), 1);
        assert_eq!(dispatcher.listener_count("c"), 0);
    }
}

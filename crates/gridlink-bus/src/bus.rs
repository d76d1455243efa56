//! [`EventBus`] – shared facade over the topic trie.
//!
//! Parses topic strings into segment paths, validates the wildcard grammar,
//! and exposes the subscribe/publish/unsubscribe surface the rest of the
//! platform uses. Clone it cheaply – all clones share the same tree.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gridlink_types::{BusError, BusEvent};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::topic::{
    self, Listener, MULTI_LEVEL_WILDCARD, PATH_SEPARATOR, SINGLE_LEVEL_WILDCARD, TopicNode,
};

// ---------------------------------------------------------------------------
// Topic parsing
// ---------------------------------------------------------------------------

/// Split a subscription pattern into segments.
///
/// Rejects empty topics, empty segments, and a multi-level wildcard anywhere
/// but the final position. These are programming errors in the caller, so
/// they are raised eagerly here rather than silently mis-routing later.
fn parse_pattern(topic: &str) -> Result<Vec<String>, BusError> {
    if topic.is_empty() {
        return Err(BusError::EmptyTopic);
    }
    let path: Vec<String> = topic.split(PATH_SEPARATOR).map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return Err(BusError::EmptySegment {
            topic: topic.to_string(),
        });
    }
    if let Some(i) = path.iter().position(|s| s == MULTI_LEVEL_WILDCARD) {
        if i < path.len() - 1 {
            return Err(BusError::WildcardPosition {
                topic: topic.to_string(),
            });
        }
    }
    Ok(path)
}

/// Split a concrete publish topic into segments.
///
/// Publish topics name a single channel; wildcards are only meaningful in
/// subscription patterns and are rejected here.
fn parse_topic(topic: &str) -> Result<Vec<String>, BusError> {
    let path = parse_pattern(topic)?;
    if path
        .iter()
        .any(|s| s == SINGLE_LEVEL_WILDCARD || s == MULTI_LEVEL_WILDCARD)
    {
        return Err(BusError::WildcardInPublish {
            topic: topic.to_string(),
        });
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Hierarchical topic-based event bus.
///
/// One instance is constructed at application start and handed to every
/// component that needs live updates; clones share the same underlying tree.
/// All operations are synchronous and run to completion – there is no I/O
/// and no async boundary inside the bus.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use gridlink_bus::{EventBus, Listener};
///
/// let bus = EventBus::new();
/// let listener: Listener = Arc::new(|event, _args| {
///     println!("update on {}", event.topic);
/// });
/// let subscription = bus.subscribe("devices/+/temperature", listener).unwrap();
/// bus.publish("devices/d1/temperature", &[]).unwrap();
/// subscription.dispose();
/// ```
#[derive(Clone, Debug)]
pub struct EventBus {
    root: Arc<Mutex<TopicNode>>,
}

impl EventBus {
    /// Create a bus with an empty topic tree.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Mutex::new(TopicNode::new())),
        }
    }

    /// Subscribe `listener` to a topic pattern.
    ///
    /// Pattern segments are separated by `/` and may contain a single-level
    /// wildcard (`+`) or a multi-level wildcard (`#`, final segment only).
    /// Returns a [`Subscription`] whose [`dispose`](Subscription::dispose)
    /// removes the listener again.
    pub fn subscribe(&self, topic: &str, listener: Listener) -> Result<Subscription, BusError> {
        let path = parse_pattern(topic)?;
        self.root.lock().subscribe(&path, listener.clone());
        trace!(topic, "listener subscribed");
        Ok(Subscription {
            root: Arc::clone(&self.root),
            path,
            listener,
            disposed: AtomicBool::new(false),
        })
    }

    /// Remove a listener previously subscribed with exactly this `topic`.
    ///
    /// Returns whether the listener was found and removed. Prefer holding the
    /// [`Subscription`] from `subscribe`; this entry point exists for callers
    /// that manage listener lifetimes themselves.
    pub fn unsubscribe(&self, topic: &str, listener: &Listener) -> Result<bool, BusError> {
        let path = parse_pattern(topic)?;
        let removed = self.root.lock().unsubscribe(&path, listener);
        if removed {
            trace!(topic, "listener unsubscribed");
        }
        Ok(removed)
    }

    /// Publish to a concrete topic, invoking every listener whose pattern
    /// matches. `args` are passed to each listener after the event.
    pub fn publish(&self, topic: &str, args: &[Value]) -> Result<(), BusError> {
        let path = parse_topic(topic)?;
        self.dispatch(&path, &BusEvent::new(topic), args);
        Ok(())
    }

    /// Publish a caller-constructed event, routing on its embedded topic.
    ///
    /// Used by relays that already carry a [`BusEvent`] (e.g. one rebuilt
    /// from a pushed frame) and want to preserve its id and timestamp.
    pub fn publish_event(&self, event: &BusEvent, args: &[Value]) -> Result<(), BusError> {
        let path = parse_topic(&event.topic)?;
        self.dispatch(&path, event, args);
        Ok(())
    }

    /// True when no subscription exists anywhere on the bus.
    pub fn is_empty(&self) -> bool {
        self.root.lock().is_empty()
    }

    /// Collect the matching listeners under the lock, then invoke them with
    /// the lock released so a listener may publish, subscribe, or unsubscribe
    /// re-entrantly without deadlocking.
    fn dispatch(&self, path: &[String], event: &BusEvent, args: &[Value]) {
        let matched = {
            let root = self.root.lock();
            let mut matched = Vec::new();
            root.collect(path, &mut matched);
            matched
        };
        topic::dispatch(&matched, event, args);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Disposer handle returned from [`EventBus::subscribe`].
///
/// Dropping the handle does *not* unsubscribe – subscriptions live until
/// they are explicitly disposed, matching the bus's application-lifetime
/// model where most listeners are never removed.
pub struct Subscription {
    root: Arc<Mutex<TopicNode>>,
    path: Vec<String>,
    listener: Listener,
    disposed: AtomicBool,
}

impl Subscription {
    /// Unsubscribe the captured listener. The first call performs the removal
    /// and returns whether it occurred; every later call is a no-op returning
    /// `false`.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.root.lock().unsubscribe(&self.path, &self.listener)
    }

    /// The pattern this subscription was registered against.
    pub fn topic(&self) -> String {
        self.path.join(&PATH_SEPARATOR.to_string())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn counting() -> (Listener, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let listener: Listener = Arc::new(move |_event, _args| {
            hits.fetch_add(1, Ordering::SeqCst);
        });
        (listener, count)
    }

    #[test]
    fn exact_match_invokes_listener_once_with_args() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener = Arc::new(move |event, args| {
            sink.lock()
                .unwrap()
                .push((event.topic.clone(), args.to_vec()));
        });

        bus.subscribe("a/b/c", listener).unwrap();
        bus.publish("a/b/c", &[json!(42)]).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "a/b/c");
        assert_eq!(seen[0].1, vec![json!(42)]);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.publish("x/y/z", &[]).unwrap();
    }

    #[test]
    fn single_level_wildcard_matches_exactly_one_segment() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        bus.subscribe("devices/+/temperature", listener).unwrap();

        bus.publish("devices/d1/temperature", &[json!(42)]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Too deep – "+" consumes exactly one segment.
        bus.publish("devices/d1/d2/temperature", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Too shallow.
        bus.publish("devices/temperature", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multi_level_wildcard_matches_prefix_and_descendants() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        bus.subscribe("devices/#", listener).unwrap();

        bus.publish("devices", &[]).unwrap();
        bus.publish("devices/d1", &[]).unwrap();
        bus.publish("devices/d1/temperature", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // Sibling hierarchy stays unmatched.
        bus.publish("users/u1", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn subscribers_fire_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(StdMutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            bus.subscribe("a", Arc::new(move |_e, _a| log.lock().unwrap().push(tag)))
                .unwrap();
        }

        bus.publish("a", &[]).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_listener_does_not_block_later_subscribers() {
        init_tracing();
        let bus = EventBus::new();
        bus.subscribe("a", Arc::new(|_e, _a| panic!("boom"))).unwrap();
        let (listener, count) = counting();
        bus.subscribe("a", listener).unwrap();

        bus.publish("a", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_prunes_the_emptied_branch() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        bus.subscribe("a/b", listener.clone()).unwrap();
        assert!(!bus.is_empty());

        assert_eq!(bus.unsubscribe("a/b", &listener), Ok(true));
        assert!(bus.is_empty());

        // A fresh subscription on the same topic works on a clean branch.
        bus.subscribe("a/b", listener).unwrap();
        bus.publish("a/b", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (listener, _) = counting();
        bus.subscribe("a/b", listener.clone()).unwrap();

        assert_eq!(bus.unsubscribe("a/b", &listener), Ok(true));
        assert_eq!(bus.unsubscribe("a/b", &listener), Ok(false));
    }

    #[test]
    fn disposer_unsubscribes_exactly_once() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        let subscription = bus.subscribe("watchdog/status", listener).unwrap();

        assert!(subscription.dispose());
        assert!(!subscription.dispose());

        bus.publish("watchdog/status", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(bus.is_empty());
    }

    #[test]
    fn dropping_the_subscription_keeps_the_listener() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        drop(bus.subscribe("a", listener).unwrap());

        bus.publish("a", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_matches_are_additive() {
        let bus = EventBus::new();
        let (plus, plus_count) = counting();
        let (hash, hash_count) = counting();
        bus.subscribe("devices/+/temperature", plus).unwrap();
        bus.subscribe("devices/#", hash).unwrap();

        bus.publish("devices/d1/temperature", &[]).unwrap();
        assert_eq!(plus_count.load(Ordering::SeqCst), 1);
        assert_eq!(hash_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn duplicate_subscription_delivers_once() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        bus.subscribe("a", listener.clone()).unwrap();
        bus.subscribe("a", listener).unwrap();

        bus.publish("a", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_malformed_topics() {
        let bus = EventBus::new();
        let (listener, _) = counting();

        assert_eq!(
            bus.subscribe("", listener.clone()).map(|_| ()),
            Err(BusError::EmptyTopic)
        );
        assert_eq!(
            bus.subscribe("a//b", listener.clone()).map(|_| ()),
            Err(BusError::EmptySegment {
                topic: "a//b".to_string()
            })
        );
        assert_eq!(
            bus.subscribe("a/#/b", listener).map(|_| ()),
            Err(BusError::WildcardPosition {
                topic: "a/#/b".to_string()
            })
        );
        assert_eq!(
            bus.publish("devices/+", &[]),
            Err(BusError::WildcardInPublish {
                topic: "devices/+".to_string()
            })
        );
        assert_eq!(
            bus.publish("devices/#", &[]),
            Err(BusError::WildcardInPublish {
                topic: "devices/#".to_string()
            })
        );
    }

    #[test]
    fn listener_may_publish_reentrantly() {
        let bus = EventBus::new();
        let (listener, count) = counting();
        bus.subscribe("derived", listener).unwrap();

        let relay_bus = bus.clone();
        let relay: Listener = Arc::new(move |_event, _args| {
            relay_bus.publish("derived", &[]).unwrap();
        });
        bus.subscribe("raw", relay).unwrap();

        bus.publish("raw", &[]).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_event_routes_on_embedded_topic() {
        let bus = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Listener =
            Arc::new(move |event, _args| sink.lock().unwrap().push(event.id));
        bus.subscribe("users/+", listener).unwrap();

        let event = BusEvent::new("users/42");
        bus.publish_event(&event, &[]).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![event.id]);
    }

    #[test]
    fn subscription_reports_its_topic() {
        let bus = EventBus::new();
        let (listener, _) = counting();
        let subscription = bus.subscribe("devices/+/temperature", listener).unwrap();
        assert_eq!(subscription.topic(), "devices/+/temperature");
    }
}

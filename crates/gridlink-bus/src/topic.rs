//! [`TopicNode`] – one node of the topic trie.
//!
//! Each node owns the subscribers registered at its exact path and a map from
//! path segment to child node. The two wildcard segment names are ordinary
//! map keys; matching during publish simply visits the extra branches.
//!
//! The trie is grown lazily by `subscribe` and shrunk by `unsubscribe`: a
//! node that ends up with no subscribers and no children is detached from its
//! parent on the way back up the recursion, so the tree never accumulates
//! empty branches.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use gridlink_types::BusEvent;
use serde_json::Value;
use tracing::error;

/// Pattern segment matching exactly one arbitrary segment at its position.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Pattern segment matching the remainder of a topic; only valid at the end.
pub const MULTI_LEVEL_WILDCARD: &str = "#";
/// Separator between topic segments.
pub const PATH_SEPARATOR: char = '/';

/// Listener callback invoked with the event and the publisher's arguments.
///
/// Listener identity is pointer identity of the `Arc`: subscribing the same
/// `Arc` twice is a no-op, and `unsubscribe` removes exactly that `Arc`.
pub type Listener = Arc<dyn Fn(&BusEvent, &[Value]) + Send + Sync>;

// ---------------------------------------------------------------------------
// TopicNode
// ---------------------------------------------------------------------------

/// A single level of the topic hierarchy.
#[derive(Default)]
pub struct TopicNode {
    subscribers: Vec<Listener>,
    subtopics: HashMap<String, TopicNode>,
}

impl TopicNode {
    /// Create a node with no subscribers and no subtopics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the child node for `segment`, creating and linking it first if
    /// it does not exist yet. Idempotent.
    pub fn subtopic(&mut self, segment: &str) -> &mut TopicNode {
        self.subtopics.entry(segment.to_string()).or_default()
    }

    /// Register `listener` at the node reached by walking `path` from here,
    /// creating intermediate nodes as needed.
    ///
    /// Subscribing a listener that is already present at the terminal node is
    /// a no-op; the subscriber set keeps insertion order for dispatch.
    pub fn subscribe(&mut self, path: &[String], listener: Listener) {
        match path.split_first() {
            None => {
                if !self.subscribers.iter().any(|l| Arc::ptr_eq(l, &listener)) {
                    self.subscribers.push(listener);
                }
            }
            Some((segment, rest)) => self.subtopic(segment).subscribe(rest, listener),
        }
    }

    /// Remove `listener` from the node reached by walking `path` from here.
    ///
    /// Returns whether a removal occurred. Nodes left with no subscribers and
    /// no subtopics are detached from their parent as the recursion unwinds,
    /// cascading upward until a non-empty ancestor (or this node) is reached.
    pub fn unsubscribe(&mut self, path: &[String], listener: &Listener) -> bool {
        match path.split_first() {
            None => {
                let before = self.subscribers.len();
                self.subscribers.retain(|l| !Arc::ptr_eq(l, listener));
                self.subscribers.len() != before
            }
            Some((segment, rest)) => {
                let Some(subtopic) = self.subtopics.get_mut(segment.as_str()) else {
                    return false;
                };
                let removed = subtopic.unsubscribe(rest, listener);
                if removed && subtopic.is_empty() {
                    self.subtopics.remove(segment.as_str());
                }
                removed
            }
        }
    }

    /// True when this node holds no subscribers and no subtopics.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty() && self.subtopics.is_empty()
    }

    /// Dispatch `event` to every listener matching `path` below this node.
    pub fn publish(&self, path: &[String], event: &BusEvent, args: &[Value]) {
        let mut matched = Vec::new();
        self.collect(path, &mut matched);
        dispatch(&matched, event, args);
    }

    /// Invoke every listener registered directly on this node, in insertion
    /// order, without walking any children.
    pub fn publish_to_subscribers(&self, event: &BusEvent, args: &[Value]) {
        dispatch(&self.subscribers, event, args);
    }

    /// Gather the listeners matching `path`, in match order: exact branch
    /// first, then the `+` branch, then the `#` branch.
    ///
    /// Matching is additive; every branch that exists is visited. A `#` child
    /// absorbs the remaining segments without recursing further, and also
    /// matches when the path is already exhausted (`devices/#` matches the
    /// topic `devices` itself).
    pub(crate) fn collect(&self, path: &[String], matched: &mut Vec<Listener>) {
        match path.split_first() {
            None => {
                matched.extend(self.subscribers.iter().cloned());
                if let Some(wild) = self.subtopics.get(MULTI_LEVEL_WILDCARD) {
                    matched.extend(wild.subscribers.iter().cloned());
                }
            }
            Some((segment, rest)) => {
                if let Some(child) = self.subtopics.get(segment.as_str()) {
                    child.collect(rest, matched);
                }
                if let Some(plus) = self.subtopics.get(SINGLE_LEVEL_WILDCARD) {
                    plus.collect(rest, matched);
                }
                if let Some(wild) = self.subtopics.get(MULTI_LEVEL_WILDCARD) {
                    matched.extend(wild.subscribers.iter().cloned());
                }
            }
        }
    }
}

impl fmt::Debug for TopicNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicNode")
            .field("subscribers", &self.subscribers.len())
            .field("subtopics", &self.subtopics.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Invoke `listeners` in order, containing any panic so a failing listener
/// can neither abort nor hide delivery to the listeners after it.
pub(crate) fn dispatch(listeners: &[Listener], event: &BusEvent, args: &[Value]) {
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event, args))) {
            error!(
                topic = %event.topic,
                reason = panic_reason(panic.as_ref()),
                "listener panicked during dispatch"
            );
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

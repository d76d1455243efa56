//! `gridlink-bus` – the live-update nervous system of the platform UI.
//!
//! An in-process, synchronous, hierarchical topic-based event bus. Push
//! notifications (data point updates, user changes, watchdog status, menu
//! edits) enter through [`EventBus::publish`] and fan out to every listener
//! whose pattern matches, including single-level (`+`) and multi-level (`#`)
//! wildcards.
//!
//! # Modules
//!
//! - [`topic`] – the recursive topic trie; one [`topic::TopicNode`] per path
//!   segment, grown lazily on subscribe and pruned on unsubscribe.
//! - [`bus`] – topic-string parsing and the shared [`EventBus`] facade with
//!   its [`Subscription`] disposer handles.

pub mod bus;
pub mod topic;

pub use bus::{EventBus, Subscription};
pub use topic::{
    Listener, MULTI_LEVEL_WILDCARD, PATH_SEPARATOR, SINGLE_LEVEL_WILDCARD, TopicNode,
};

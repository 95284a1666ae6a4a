//! Per-call dispatch context.
//!
//! A [`DispatchContext`] travels with one logical call. It carries the trace
//! id shared by all nested calls, the id of the message currently being
//! dispatched, snapshots of the current message and response, and three
//! bags of [`ContextData`]:
//!
//! | Bag | Flows |
//! |---|---|
//! | [`downstream_data`](DispatchContext::downstream_data) | from a caller into nested calls |
//! | [`upstream_data`](DispatchContext::upstream_data) | from nested calls back to the caller |
//! | [`data`](DispatchContext::data) | both ways |
//!
//! Flow direction is implemented by [`fork`](DispatchContext::fork) and
//! [`merge_into`](DispatchContext::merge_into), which the message clients
//! call around every nested dispatch.
//!
//! # Example
//!
//! ```
//! use emissary_core::{DataScope, DispatchContext};
//!
//! let parent = DispatchContext::new();
//! parent.downstream_data().set("tenant", "acme");
//!
//! let child = parent.fork();
//! assert_eq!(child.downstream_data().get_text("tenant").as_deref(), Some("acme"));
//!
//! child.upstream_data().set_with_scope("etag", "42", DataScope::AcrossTransports);
//! child.merge_into(&parent);
//! assert_eq!(parent.upstream_data().get_text("etag").as_deref(), Some("42"));
//! ```

use crate::message::Message;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// How far a context data entry travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataScope {
    /// Only visible inside the current process.
    #[default]
    InProcess,
    /// Also encoded when a message crosses a transport boundary.
    AcrossTransports,
}

/// A context data value.
#[derive(Clone)]
pub enum ContextValue {
    /// A string value. Only strings can cross transports.
    Text(String),
    /// An arbitrary in-process object.
    Object(Arc<dyn Any + Send + Sync>),
}

impl ContextValue {
    /// Returns the text if this is a string value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Object(_) => None,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// One entry of a [`ContextData`] bag.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    /// The stored value.
    pub value: ContextValue,
    /// How far the value travels.
    pub scope: DataScope,
}

impl ContextEntry {
    /// Returns `true` if both entries hold the same value with the same
    /// scope. Objects compare by identity.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        let same_value = match (&self.value, &other.value) {
            (ContextValue::Text(a), ContextValue::Text(b)) => a == b,
            (ContextValue::Object(a), ContextValue::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        same_value && self.scope == other.scope
    }
}

/// An ordered, shared key/value bag.
///
/// Clones share storage. Use [`ContextData::deep_copy`] for an independent
/// copy.
#[derive(Clone, Default)]
pub struct ContextData {
    entries: Arc<RwLock<IndexMap<String, ContextEntry>>>,
}

impl ContextData {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a string visible inside the current process.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set_with_scope(key, value, DataScope::InProcess);
    }

    /// Stores a string with an explicit scope.
    pub fn set_with_scope(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        scope: DataScope,
    ) {
        self.entries.write().insert(
            key.into(),
            ContextEntry {
                value: ContextValue::Text(value.into()),
                scope,
            },
        );
    }

    /// Stores an in-process object.
    pub fn set_object<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.entries.write().insert(
            key.into(),
            ContextEntry {
                value: ContextValue::Object(Arc::new(value)),
                scope: DataScope::InProcess,
            },
        );
    }

    /// Returns the entry stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<ContextEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Returns the string stored under `key`.
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .get(key)
            .and_then(|entry| entry.value.as_text().map(str::to_owned))
    }

    /// Returns the object of type `T` stored under `key`.
    #[must_use]
    pub fn get_object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entries = self.entries.read();
        match &entries.get(key)?.value {
            ContextValue::Object(object) => object.clone().downcast::<T>().ok(),
            ContextValue::Text(_) => None,
        }
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Removes `key`, returning `true` if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.write().shift_remove(key).is_some()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns a snapshot of all entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, ContextEntry)> {
        self.entries
            .read()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Returns an independent copy of this bag.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            entries: Arc::new(RwLock::new(self.entries.read().clone())),
        }
    }

    /// Returns `true` if both handles share storage.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Copies every entry of `other` into this bag, overwriting equal keys.
    pub fn extend_from(&self, other: &Self) {
        if self.ptr_eq(other) {
            return;
        }
        let source = other.entries.read().clone();
        self.entries.write().extend(source);
    }

    /// Applies the changes `changed` made relative to `base`.
    ///
    /// Keys added or overwritten in `changed` are copied; keys present in
    /// `base` but missing from `changed` are removed. Keys neither side
    /// touched keep their current value here.
    pub fn apply_changes(&self, base: &Self, changed: &Self) {
        if self.ptr_eq(changed) {
            return;
        }
        let base = base.entries.read().clone();
        let changed = changed.entries.read().clone();
        let mut entries = self.entries.write();
        for key in base.keys().filter(|key| !changed.contains_key(*key)) {
            entries.shift_remove(key);
        }
        for (key, entry) in changed {
            if base.get(&key).map_or(true, |before| !before.same_as(&entry)) {
                entries.insert(key, entry);
            }
        }
    }

    /// Replaces the content of this bag with the content of `other`.
    pub fn replace_with(&self, other: &Self) {
        if self.ptr_eq(other) {
            return;
        }
        let source = other.entries.read().clone();
        *self.entries.write() = source;
    }
}

impl fmt::Debug for ContextData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.read().iter().map(|(k, v)| (k.clone(), v.clone())))
            .finish()
    }
}

#[derive(Clone)]
struct Snapshot {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

struct Identity {
    trace_id: String,
    message_id: Option<String>,
    current_message: Option<Snapshot>,
    current_response: Option<Snapshot>,
}

/// Ambient state of one logical call.
///
/// Clones share state. Concurrent branches of a call each work on their own
/// [`fork`](Self::fork).
#[derive(Clone)]
pub struct DispatchContext {
    identity: Arc<RwLock<Identity>>,
    downstream: ContextData,
    upstream: ContextData,
    bidirectional: ContextData,
    // Bidirectional data as it was when this context was forked.
    fork_base: Option<ContextData>,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchContext {
    /// Creates a context with a fresh trace id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_trace_id(new_id())
    }

    /// Creates a context that continues an existing trace.
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            identity: Arc::new(RwLock::new(Identity {
                trace_id: trace_id.into(),
                message_id: None,
                current_message: None,
                current_response: None,
            })),
            downstream: ContextData::new(),
            upstream: ContextData::new(),
            bidirectional: ContextData::new(),
            fork_base: None,
        }
    }

    /// Returns the trace id shared by all nested calls.
    #[must_use]
    pub fn trace_id(&self) -> String {
        self.identity.read().trace_id.clone()
    }

    /// Replaces the trace id.
    pub fn set_trace_id(&self, trace_id: impl Into<String>) {
        self.identity.write().trace_id = trace_id.into();
    }

    /// Returns the id of the message being dispatched, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<String> {
        self.identity.read().message_id.clone()
    }

    /// Sets the id of the message being dispatched.
    pub fn set_message_id(&self, message_id: impl Into<String>) {
        self.identity.write().message_id = Some(message_id.into());
    }

    /// Assigns a fresh message id and returns it.
    pub fn assign_message_id(&self) -> String {
        let id = new_id();
        self.set_message_id(id.clone());
        id
    }

    /// Data flowing from callers into nested calls.
    #[must_use]
    pub fn downstream_data(&self) -> &ContextData {
        &self.downstream
    }

    /// Data flowing from nested calls back to callers.
    #[must_use]
    pub fn upstream_data(&self) -> &ContextData {
        &self.upstream
    }

    /// Data flowing both ways.
    #[must_use]
    pub fn data(&self) -> &ContextData {
        &self.bidirectional
    }

    /// Records the message currently flowing through the pipeline.
    pub fn set_current_message<M: Message>(&self, message: &M) {
        self.identity.write().current_message = Some(Snapshot {
            type_name: M::type_name(),
            value: Arc::new(message.clone()),
        });
    }

    /// Records the latest response produced in the pipeline.
    pub fn set_current_response<M: Message>(&self, response: &M::Response) {
        self.identity.write().current_response = Some(Snapshot {
            type_name: std::any::type_name::<M::Response>(),
            value: Arc::new(response.clone()),
        });
    }

    /// Returns the current message if it is an `M`.
    #[must_use]
    pub fn current_message<M: Message>(&self) -> Option<M> {
        let identity = self.identity.read();
        let snapshot = identity.current_message.as_ref()?;
        snapshot.value.downcast_ref::<M>().cloned()
    }

    /// Returns the current response if it is an `R`.
    #[must_use]
    pub fn current_response<R: Clone + Send + Sync + 'static>(&self) -> Option<R> {
        let identity = self.identity.read();
        let snapshot = identity.current_response.as_ref()?;
        snapshot.value.downcast_ref::<R>().cloned()
    }

    /// Returns the type name of the current message.
    #[must_use]
    pub fn current_message_type(&self) -> Option<&'static str> {
        self.identity
            .read()
            .current_message
            .as_ref()
            .map(|snapshot| snapshot.type_name)
    }

    /// Returns the type name of the current response.
    #[must_use]
    pub fn current_response_type(&self) -> Option<&'static str> {
        self.identity
            .read()
            .current_response
            .as_ref()
            .map(|snapshot| snapshot.type_name)
    }

    /// Forgets the current message and response.
    pub fn clear_current(&self) {
        let mut identity = self.identity.write();
        identity.current_message = None;
        identity.current_response = None;
    }

    /// Creates a child context for a nested or concurrent call.
    ///
    /// The child continues the trace and starts with copies of the downstream
    /// and bidirectional data. Upstream data starts empty.
    #[must_use]
    pub fn fork(&self) -> Self {
        let identity = self.identity.read();
        Self {
            identity: Arc::new(RwLock::new(Identity {
                trace_id: identity.trace_id.clone(),
                message_id: identity.message_id.clone(),
                current_message: None,
                current_response: None,
            })),
            downstream: self.downstream.deep_copy(),
            upstream: ContextData::new(),
            bidirectional: self.bidirectional.deep_copy(),
            fork_base: Some(self.bidirectional.deep_copy()),
        }
    }

    /// Copies the data a finished child call returns to its parent.
    ///
    /// Upstream entries are added to the parent's upstream data. The child's
    /// additions, overwrites and removals of bidirectional data are applied
    /// to the parent's, so concurrent siblings do not undo each other. A
    /// context that was not created by [`fork`](Self::fork) replaces the
    /// parent's bidirectional data instead.
    pub fn merge_into(&self, parent: &Self) {
        if self.ptr_eq(parent) {
            return;
        }
        parent.upstream.extend_from(&self.upstream);
        match &self.fork_base {
            Some(base) => parent.bidirectional.apply_changes(base, &self.bidirectional),
            None => parent.bidirectional.replace_with(&self.bidirectional),
        }
    }

    /// Returns `true` if both handles share state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.identity, &other.identity)
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let identity = self.identity.read();
        f.debug_struct("DispatchContext")
            .field("trace_id", &identity.trace_id)
            .field("message_id", &identity.message_id)
            .field(
                "current_message",
                &identity.current_message.as_ref().map(|s| s.type_name),
            )
            .field("downstream", &self.downstream)
            .field("upstream", &self.upstream)
            .field("data", &self.bidirectional)
            .finish()
    }
}

fn new_id() -> String {
    Uuid::now_v7().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageKind;

    #[derive(Debug, Clone, PartialEq)]
    struct Ping(u32);

    impl Message for Ping {
        type Response = u32;
        const KIND: MessageKind = MessageKind::Query;
    }

    #[test]
    fn test_context_data_set_get_remove() {
        let data = ContextData::new();
        data.set("a", "1");
        data.set_with_scope("b", "2", DataScope::AcrossTransports);
        data.set_object("c", vec![1_u8, 2, 3]);

        assert_eq!(data.len(), 3);
        assert_eq!(data.get_text("a").as_deref(), Some("1"));
        assert_eq!(data.get("b").map(|e| e.scope), Some(DataScope::AcrossTransports));
        assert_eq!(data.get_object::<Vec<u8>>("c").as_deref(), Some(&vec![1, 2, 3]));
        assert!(data.get_text("c").is_none());
        assert!(data.get_object::<String>("c").is_none());

        assert!(data.remove("a"));
        assert!(!data.remove("a"));
        assert_eq!(data.entries()[0].0, "b");
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let data = ContextData::new();
        data.set("k", "v");
        let copy = data.deep_copy();
        copy.set("k", "changed");
        assert_eq!(data.get_text("k").as_deref(), Some("v"));

        let shared = data.clone();
        shared.set("k", "shared");
        assert_eq!(data.get_text("k").as_deref(), Some("shared"));
    }

    #[test]
    fn test_fork_copies_downstream_and_bidirectional() {
        let parent = DispatchContext::new();
        parent.downstream_data().set("down", "1");
        parent.upstream_data().set("up", "1");
        parent.data().set("both", "1");

        let child = parent.fork();
        assert_eq!(child.trace_id(), parent.trace_id());
        assert!(child.downstream_data().contains_key("down"));
        assert!(!child.upstream_data().contains_key("up"));
        assert!(child.data().contains_key("both"));

        child.downstream_data().set("down", "2");
        assert_eq!(parent.downstream_data().get_text("down").as_deref(), Some("1"));
    }

    #[test]
    fn test_merge_returns_upstream_and_bidirectional() {
        let parent = DispatchContext::new();
        parent.data().set("removed", "x");
        let child = parent.fork();

        child.downstream_data().set("down", "child");
        child.upstream_data().set("up", "child");
        child.data().remove("removed");
        child.data().set("both", "child");
        child.merge_into(&parent);

        assert!(!parent.downstream_data().contains_key("down"));
        assert_eq!(parent.upstream_data().get_text("up").as_deref(), Some("child"));
        assert_eq!(parent.data().get_text("both").as_deref(), Some("child"));
        assert!(!parent.data().contains_key("removed"));
    }

    #[test]
    fn test_sibling_forks_keep_each_others_bidirectional_writes() {
        let parent = DispatchContext::new();
        parent.data().set("shared", "parent");
        parent.data().set("dropped", "parent");

        let first = parent.fork();
        let second = parent.fork();
        first.data().set("from_first", "yes");
        first.data().remove("dropped");
        second.data().set("from_second", "yes");
        second.data().set("shared", "second");

        first.merge_into(&parent);
        second.merge_into(&parent);

        assert_eq!(parent.data().get_text("from_first").as_deref(), Some("yes"));
        assert_eq!(parent.data().get_text("from_second").as_deref(), Some("yes"));
        assert_eq!(parent.data().get_text("shared").as_deref(), Some("second"));
        assert!(!parent.data().contains_key("dropped"));
    }

    #[test]
    fn test_current_message_and_response() {
        let ctx = DispatchContext::new();
        assert!(ctx.current_message::<Ping>().is_none());

        ctx.set_current_message(&Ping(7));
        ctx.set_current_response::<Ping>(&14);

        assert_eq!(ctx.current_message::<Ping>(), Some(Ping(7)));
        assert_eq!(ctx.current_response::<u32>(), Some(14));
        assert!(ctx.current_message_type().is_some_and(|t| t.ends_with("Ping")));
        assert_eq!(ctx.current_response_type(), Some("u32"));

        ctx.clear_current();
        assert!(ctx.current_message::<Ping>().is_none());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let ctx = DispatchContext::new();
        assert!(ctx.message_id().is_none());
        let first = ctx.assign_message_id();
        let second = ctx.assign_message_id();
        assert_ne!(first, second);
        assert_eq!(ctx.message_id(), Some(second));
        assert_ne!(DispatchContext::new().trace_id(), ctx.trace_id());
    }
}

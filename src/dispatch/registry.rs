use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::core::WidgetId;

/// Error type widget refresh actions may fail with.
pub type ActionError = Box<dyn Error + Send + Sync>;

/// Future produced by one invocation of a refresh action.
pub type RefreshFuture = BoxFuture<'static, Result<(), ActionError>>;

/// Parameterless refresh action registered by a widget.
///
/// Typically re-runs the widget's REST fetch. Cheap to clone; clones share the same closure.
#[derive(Clone)]
pub struct RefreshAction(Arc<dyn Fn() -> RefreshFuture + Send + Sync>);

impl RefreshAction {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActionError>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    pub fn invoke(&self) -> RefreshFuture {
        (self.0)()
    }

    pub fn ptr_eq(&self, other: &RefreshAction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RefreshAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefreshAction")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// Widget id → refresh action map with replace-on-re-register semantics.
///
/// Not synchronised on its own; the dispatcher owns the only instance behind its lock.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    entries: HashMap<WidgetId, RefreshAction>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the action for `widget_id`, returning the replaced one.
    pub fn register(&mut self, widget_id: WidgetId, action: RefreshAction) -> Option<RefreshAction> {
        self.entries.insert(widget_id, action)
    }

    /// Remove the mapping if present. Returns whether anything was removed.
    pub fn unregister(&mut self, widget_id: &str) -> bool {
        self.entries.remove(widget_id).is_some()
    }

    /// Remove the mapping only if it still points at `action` (compared by identity).
    pub fn unregister_if(&mut self, widget_id: &str, action: &RefreshAction) -> bool {
        if !self.is_registered_as(widget_id, action) {
            return false;
        }
        self.entries.remove(widget_id);
        true
    }

    /// Whether `widget_id` currently maps to `action` itself.
    pub fn is_registered_as(&self, widget_id: &str, action: &RefreshAction) -> bool {
        self.entries
            .get(widget_id)
            .is_some_and(|current| current.ptr_eq(action))
    }

    pub fn lookup(&self, widget_id: &str) -> Option<RefreshAction> {
        self.entries.get(widget_id).cloned()
    }

    pub fn contains(&self, widget_id: &str) -> bool {
        self.entries.contains_key(widget_id)
    }

    /// Snapshot of every registered id; later registrations do not show up in it.
    pub fn all_ids(&self) -> BTreeSet<WidgetId> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Fan-out of push messages to registered widget refresh actions.
//!
//! Targets are resolved synchronously when a dispatch call is made. Every refresh runs in its own
//! tokio task so a failing or panicking action cannot touch its siblings, and dropping the returned
//! future never cancels work that has already started.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::groups::{ALL_TOKEN, TypeGroupTable};
use super::registry::{RefreshAction, SubscriberRegistry};
use super::widget::WidgetHandle;
use crate::core::{InboundMessage, WidgetId};

const DEFAULT_LOADING_DELAY: Duration = Duration::from_millis(150);

/// How a refresh request for an id that is already refreshing is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Invoke the action again; both invocations run to completion.
    #[default]
    Reentrant,
    /// Join the in-flight refresh and report its outcome without invoking again.
    Coalesce,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Pause between marking a widget refreshing and invoking its action, so the loading state is
    /// visible. Zero disables it.
    pub loading_delay: Duration,
    pub overlap: OverlapPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            loading_delay: DEFAULT_LOADING_DELAY,
            overlap: OverlapPolicy::Reentrant,
        }
    }
}

impl DispatcherConfig {
    pub fn immediate() -> Self {
        Self {
            loading_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_loading_delay(mut self, delay: Duration) -> Self {
        self.loading_delay = delay;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }
}

/// Settled result of one widget refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Succeeded,
    Failed(String),
    /// No action was registered for the id when the dispatch was made.
    Skipped,
}

/// All-settled summary of one dispatch. Purely informational; dispatch never fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Every resolved id, in resolution order.
    pub targets: Vec<WidgetId>,
    pub succeeded: Vec<WidgetId>,
    pub failed: Vec<(WidgetId, String)>,
    pub skipped: Vec<WidgetId>,
    /// Ids whose request joined a refresh already in flight instead of invoking the action.
    /// Their settled result is still bucketed in `succeeded` or `failed`.
    pub joined: Vec<WidgetId>,
}

impl DispatchReport {
    fn from_outcomes(outcomes: Vec<(WidgetId, RefreshOutcome, bool)>) -> Self {
        let mut report = Self::default();
        for (widget_id, outcome, joined) in outcomes {
            report.targets.push(widget_id.clone());
            if joined {
                report.joined.push(widget_id.clone());
            }
            match outcome {
                RefreshOutcome::Succeeded => report.succeeded.push(widget_id),
                RefreshOutcome::Failed(reason) => report.failed.push((widget_id, reason)),
                RefreshOutcome::Skipped => report.skipped.push(widget_id),
            }
        }
        report
    }

    /// Number of actions this dispatch actually ran (successfully or not). Joined refreshes are
    /// not counted.
    pub fn invoked(&self) -> usize {
        (self.succeeded.len() + self.failed.len()).saturating_sub(self.joined.len())
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// A refresh that was started, or joined when another one for the same id was in flight.
struct Started {
    outcome: BoxFuture<'static, RefreshOutcome>,
    joined: bool,
}

struct DispatcherInner {
    config: DispatcherConfig,
    groups: TypeGroupTable,
    registry: Mutex<SubscriberRegistry>,
    /// In-flight count per id; the public view is the key set.
    refreshing: Mutex<HashMap<WidgetId, usize>>,
    refreshing_tx: watch::Sender<BTreeSet<WidgetId>>,
    in_flight: Mutex<HashMap<WidgetId, SharedRefresh>>,
}

impl DispatcherInner {
    fn mark_refreshing(&self, widget_id: &WidgetId) {
        let mut refreshing = self.refreshing.lock();
        let count = refreshing.entry(widget_id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.refreshing_tx
                .send_replace(refreshing.keys().cloned().collect());
        }
    }

    fn clear_refreshing(&self, widget_id: &WidgetId) {
        let mut refreshing = self.refreshing.lock();
        let Some(count) = refreshing.get_mut(widget_id) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            refreshing.remove(widget_id);
            self.refreshing_tx
                .send_replace(refreshing.keys().cloned().collect());
        }
    }
}

/// Holds a widget in the refreshing set for as long as its refresh task is alive.
///
/// Lives inside the spawned task, so it is released on success, error, panic and runtime
/// shutdown alike.
struct RefreshingGuard {
    inner: Arc<DispatcherInner>,
    widget_id: WidgetId,
    coalesced: bool,
}

impl RefreshingGuard {
    fn enter(inner: Arc<DispatcherInner>, widget_id: WidgetId, coalesced: bool) -> Self {
        inner.mark_refreshing(&widget_id);
        Self {
            inner,
            widget_id,
            coalesced,
        }
    }
}

impl Drop for RefreshingGuard {
    fn drop(&mut self) {
        if self.coalesced {
            self.inner.in_flight.lock().remove(&self.widget_id);
        }
        self.inner.clear_refreshing(&self.widget_id);
    }
}

/// Process-wide refresh coordinator: owns the subscriber registry, the type-group table and the
/// refreshing set.
///
/// Cheap to clone; clones share state. Dispatch methods spawn tasks and therefore must be called
/// from within a tokio runtime.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.inner.config)
            .field("groups", &self.inner.groups.len())
            .field("registered", &self.registered_count())
            .field("refreshing", &self.inner.refreshing.lock().len())
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default(), TypeGroupTable::empty())
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, groups: TypeGroupTable) -> Self {
        let (refreshing_tx, _) = watch::channel(BTreeSet::new());
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                groups,
                registry: Mutex::new(SubscriberRegistry::new()),
                refreshing: Mutex::new(HashMap::new()),
                refreshing_tx,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn groups(&self) -> &TypeGroupTable {
        &self.inner.groups
    }

    /// Register (or replace) the refresh action for `widget_id`.
    ///
    /// The returned capability removes the mapping only while it still points at this same
    /// action, so it does nothing once the id has been re-registered with another action or
    /// unregistered by someone else.
    pub fn register(&self, widget_id: impl Into<WidgetId>, action: RefreshAction) -> Unregister {
        let widget_id = widget_id.into();
        let replaced = self
            .inner
            .registry
            .lock()
            .register(widget_id.clone(), action.clone());
        debug!(widget_id = %widget_id, replaced = replaced.is_some(), "widget registered");
        Unregister {
            inner: Arc::downgrade(&self.inner),
            widget_id,
            action,
        }
    }

    /// Remove whatever is registered for `widget_id`. Idempotent.
    pub fn unregister(&self, widget_id: &str) -> bool {
        let removed = self.inner.registry.lock().unregister(widget_id);
        if removed {
            debug!(widget_id, "widget unregistered");
        }
        removed
    }

    pub fn lookup(&self, widget_id: &str) -> Option<RefreshAction> {
        self.inner.registry.lock().lookup(widget_id)
    }

    pub fn registered_ids(&self) -> BTreeSet<WidgetId> {
        self.inner.registry.lock().all_ids()
    }

    pub fn registered_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Register `action` and tie the registration to the lifetime of the returned handle.
    pub fn activate(&self, widget_id: impl Into<WidgetId>, action: RefreshAction) -> WidgetHandle {
        let registration = self.register(widget_id, action);
        WidgetHandle::new(self.clone(), registration)
    }

    pub fn is_refreshing(&self, widget_id: &str) -> bool {
        self.inner.refreshing.lock().contains_key(widget_id)
    }

    pub fn refreshing_ids(&self) -> BTreeSet<WidgetId> {
        self.inner.refreshing.lock().keys().cloned().collect()
    }

    /// Receiver that observes every change of the refreshing set.
    pub fn watch_refreshing(&self) -> watch::Receiver<BTreeSet<WidgetId>> {
        self.inner.refreshing_tx.subscribe()
    }

    /// Refresh a single widget.
    ///
    /// An unknown id is logged and settles as [`RefreshOutcome::Skipped`]. Otherwise the id is in
    /// the refreshing set by the time this returns.
    pub fn refresh_widget(&self, widget_id: &str) -> BoxFuture<'static, RefreshOutcome> {
        self.start_widget(widget_id).outcome
    }

    fn start_widget(&self, widget_id: &str) -> Started {
        let Some(action) = self.lookup(widget_id) else {
            debug!(widget_id, "refresh requested for unregistered widget");
            return Started::skipped();
        };
        self.start(WidgetId::from(widget_id), action)
    }

    /// Refresh every widget `type_token` resolves to and settle once all of them have.
    ///
    /// A group token resolves to its members, [`ALL_TOKEN`] to everything registered right now,
    /// and any other token is tried as a widget id.
    pub fn refresh_by_type(&self, type_token: &str) -> BoxFuture<'static, DispatchReport> {
        let targets = self.resolve_targets(type_token);
        let started = targets.iter().filter(|(_, action)| action.is_some()).count();
        if started == 0 {
            debug!(type_token, targets = targets.len(), "no registered widgets for token");
        } else {
            info!(type_token, targets = started, "dispatching widget refresh");
        }

        let pending: Vec<_> = targets
            .into_iter()
            .map(|(widget_id, action)| {
                let started = match action {
                    Some(action) => self.start(widget_id.clone(), action),
                    None => {
                        debug!(widget_id = %widget_id, type_token, "target not registered");
                        Started::skipped()
                    }
                };
                async move { (widget_id, started.outcome.await, started.joined) }
            })
            .collect();

        async move { DispatchReport::from_outcomes(join_all(pending).await) }.boxed()
    }

    /// Route one push message.
    pub fn handle_message(&self, message: &InboundMessage) -> BoxFuture<'static, DispatchReport> {
        match message {
            InboundMessage::NewDataFor { type_token } => self.refresh_by_type(type_token),
            InboundMessage::RefreshAll => self.refresh_by_type(ALL_TOKEN),
            InboundMessage::RefreshWidget { widget_id } => {
                let id = WidgetId::from(widget_id.as_str());
                let started = self.start_widget(widget_id);
                async move {
                    let outcome = started.outcome.await;
                    DispatchReport::from_outcomes(vec![(id, outcome, started.joined)])
                }
                .boxed()
            }
        }
    }

    /// Route one push message without waiting for it to settle.
    ///
    /// Targets are resolved before this returns, so messages dispatched in arrival order resolve
    /// in arrival order too.
    pub fn dispatch_detached(&self, message: &InboundMessage) -> JoinHandle<DispatchReport> {
        tokio::spawn(self.handle_message(message))
    }

    fn resolve_targets(&self, type_token: &str) -> Vec<(WidgetId, Option<RefreshAction>)> {
        let registry = self.inner.registry.lock();
        let ids: Vec<WidgetId> = if TypeGroupTable::is_all(type_token) {
            registry.all_ids().into_iter().collect()
        } else if let Some(members) = self.inner.groups.members(type_token) {
            members.iter().cloned().collect()
        } else {
            vec![WidgetId::from(type_token)]
        };
        ids.into_iter()
            .map(|widget_id| {
                let action = registry.lookup(&widget_id);
                (widget_id, action)
            })
            .collect()
    }

    fn start(&self, widget_id: WidgetId, action: RefreshAction) -> Started {
        match self.inner.config.overlap {
            OverlapPolicy::Reentrant => Started::new(self.spawn_refresh(widget_id, action, false)),
            OverlapPolicy::Coalesce => {
                let mut in_flight = self.inner.in_flight.lock();
                if let Some(running) = in_flight.get(&widget_id) {
                    debug!(widget_id = %widget_id, "joining in-flight refresh");
                    return Started {
                        outcome: running.clone().boxed(),
                        joined: true,
                    };
                }
                // The entry is inserted before the lock is released, so the task's guard cannot
                // remove it early.
                let shared = self
                    .spawn_refresh(widget_id.clone(), action, true)
                    .boxed()
                    .shared();
                in_flight.insert(widget_id, shared.clone());
                Started::new(shared)
            }
        }
    }

    fn spawn_refresh(
        &self,
        widget_id: WidgetId,
        action: RefreshAction,
        coalesced: bool,
    ) -> impl Future<Output = RefreshOutcome> + Send + 'static {
        let guard = RefreshingGuard::enter(self.inner.clone(), widget_id.clone(), coalesced);
        let delay = self.inner.config.loading_delay;
        let task_widget = widget_id.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match action.invoke().await {
                Ok(()) => {
                    debug!(widget_id = %task_widget, "widget refreshed");
                    RefreshOutcome::Succeeded
                }
                Err(err) => {
                    warn!(widget_id = %task_widget, error = %err, "widget refresh failed");
                    RefreshOutcome::Failed(err.to_string())
                }
            }
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let reason = if err.is_panic() {
                        "refresh action panicked"
                    } else {
                        "refresh task cancelled"
                    };
                    warn!(widget_id = %widget_id, error = %err, "{reason}");
                    RefreshOutcome::Failed(reason.to_string())
                }
            }
        }
    }
}

impl Started {
    fn new(outcome: impl Future<Output = RefreshOutcome> + Send + 'static) -> Self {
        Self {
            outcome: outcome.boxed(),
            joined: false,
        }
    }

    fn skipped() -> Self {
        Self::new(futures_util::future::ready(RefreshOutcome::Skipped))
    }
}

/// Revocable capability returned by [`Dispatcher::register`].
#[derive(Debug)]
pub struct Unregister {
    inner: Weak<DispatcherInner>,
    widget_id: WidgetId,
    action: RefreshAction,
}

impl Unregister {
    pub fn widget_id(&self) -> &WidgetId {
        &self.widget_id
    }

    /// Whether the id still maps to the action this capability was issued for.
    pub fn is_current(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| {
            inner
                .registry
                .lock()
                .is_registered_as(&self.widget_id, &self.action)
        })
    }

    /// Remove the mapping if it still points at this capability's action. Returns false when it
    /// had already been replaced by another action or removed.
    pub fn unregister(self) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let removed = inner
            .registry
            .lock()
            .unregister_if(&self.widget_id, &self.action);
        if removed {
            debug!(widget_id = %self.widget_id, "widget unregistered");
        } else {
            debug!(widget_id = %self.widget_id, "stale unregister ignored");
        }
        removed
    }
}

impl fmt::Debug for DispatcherInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherInner").finish_non_exhaustive()
    }
}

//! Reload dispatcher
//!
//! Subscribers register for one module or for all modules. After a swap the
//! dispatcher calls every matching subscriber on the notifying thread, in
//! subscription order, and collects failures instead of stopping early.

use parking_lot::RwLock;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::error::DispatchCallbackError;
use crate::registry::Swap;
use crate::unit::{LoadedUnit, ModuleName};

/// Error type subscriber callbacks may fail with
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Identifier of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which modules a subscriber wants to hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleFilter {
    Any,
    Exact(ModuleName),
}

impl ModuleFilter {
    pub fn exact(name: impl Into<ModuleName>) -> Self {
        Self::Exact(name.into())
    }

    pub fn matches(&self, module: &str) -> bool {
        match self {
            ModuleFilter::Any => true,
            ModuleFilter::Exact(name) => name.as_str() == module,
        }
    }
}

impl From<&str> for ModuleFilter {
    fn from(name: &str) -> Self {
        Self::exact(name)
    }
}

impl From<ModuleName> for ModuleFilter {
    fn from(name: ModuleName) -> Self {
        Self::Exact(name)
    }
}

/// What subscribers receive after a swap
#[derive(Debug, Clone)]
pub struct ReloadNotice {
    pub module: ModuleName,
    pub previous: Option<LoadedUnit>,
    pub current: LoadedUnit,
}

impl From<&Swap> for ReloadNotice {
    fn from(swap: &Swap) -> Self {
        Self {
            module: swap.current.name().clone(),
            previous: swap.previous.clone(),
            current: swap.current.clone(),
        }
    }
}

type Callback = dyn Fn(&ReloadNotice) -> Result<(), CallbackError> + Send + Sync;

struct Subscriber {
    id: SubscriptionId,
    filter: ModuleFilter,
    callback: Box<Callback>,
}

/// Handle returned by [`ReloadDispatcher::subscribe`]
#[must_use = "dropping the handle leaves the subscription active with no way to remove it"]
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

/// Outcome of one notification pass
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Callbacks that ran to completion
    pub delivered: usize,
    /// Callbacks that failed or panicked, in invocation order
    pub failures: Vec<DispatchCallbackError>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total callbacks invoked
    pub fn invoked(&self) -> usize {
        self.delivered + self.failures.len()
    }

    pub fn into_result(self) -> Result<usize, Vec<DispatchCallbackError>> {
        if self.failures.is_empty() {
            Ok(self.delivered)
        } else {
            Err(self.failures)
        }
    }
}

/// Central hub delivering reload notices to subscribers
pub struct ReloadDispatcher {
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl ReloadDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for reloads matching `filter`
    pub fn subscribe<F>(&self, filter: impl Into<ModuleFilter>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ReloadNotice) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let filter = filter.into();
        debug!("Subscriber {} registered for {:?}", id, filter);
        self.subscribers.write().push(Arc::new(Subscriber {
            id,
            filter,
            callback: Box::new(callback),
        }));
        SubscriptionHandle { id }
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != handle.id);
        let removed = subscribers.len() != before;
        if removed {
            debug!("Subscriber {} removed", handle.id);
        }
        removed
    }

    /// Deliver a reload of `module` to every matching subscriber.
    ///
    /// Runs synchronously on the calling thread. The subscriber list is
    /// snapshotted first, so callbacks may subscribe or unsubscribe.
    pub fn notify(
        &self,
        module: &ModuleName,
        previous: Option<LoadedUnit>,
        current: LoadedUnit,
    ) -> DispatchReport {
        let notice = ReloadNotice {
            module: module.clone(),
            previous,
            current,
        };
        self.deliver(&notice)
    }

    /// Deliver the notice for a registry swap
    pub fn notify_swap(&self, swap: &Swap) -> DispatchReport {
        self.deliver(&ReloadNotice::from(swap))
    }

    fn deliver(&self, notice: &ReloadNotice) -> DispatchReport {
        let matching: Vec<Arc<Subscriber>> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filter.matches(notice.module.as_str()))
            .cloned()
            .collect();

        let mut report = DispatchReport::default();
        for subscriber in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(notice)));
            let failure = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => (err.to_string(), false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };

            let (reason, panicked) = failure;
            warn!(
                "Reload subscriber {} failed for {} v{}: {}",
                subscriber.id,
                notice.module,
                notice.current.version(),
                reason
            );
            report.failures.push(DispatchCallbackError {
                subscription: subscriber.id,
                module: notice.module.clone(),
                reason,
                panicked,
            });
        }
        report
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Drop every subscription
    pub fn clear(&self) {
        let mut subscribers = self.subscribers.write();
        debug!("Clearing {} subscriber(s)", subscribers.len());
        subscribers.clear();
    }
}

impl Default for ReloadDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

//! Process-wide hot reload state
//!
//! [`HotRuntime`] owns the version registry, the reload dispatcher and every
//! live watch binding. It is created explicitly and torn down with
//! [`HotRuntime::shutdown`] (also run on drop).

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use error_stack::Report;
use hotmod_kernel::{
    CallbackError, DispatchReport, LoadedCode, LoadedUnit, ModuleFilter, ModuleLoader, ModuleName,
    ObjectFactory, ReloadDispatcher, ReloadNotice, SubscriptionHandle, VersionRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{DuplicateBindPolicy, HotReloadConfig};
use crate::error::{HotError, HotResult, IntoHotReport, WatchError};
use crate::event::ReloadEvent;
use crate::watch::{BindingContext, WatchBinding};

/// Registry, dispatcher and bindings for one process
pub struct HotRuntime {
    config: HotReloadConfig,
    registry: Arc<VersionRegistry>,
    dispatcher: Arc<ReloadDispatcher>,
    loader: Arc<dyn ModuleLoader>,
    bindings: DashMap<ModuleName, Arc<WatchBinding>>,
    event_tx: broadcast::Sender<ReloadEvent>,
    shut_down: AtomicBool,
}

impl HotRuntime {
    /// Create a runtime that loads every bound artifact with `loader`
    pub fn new(config: HotReloadConfig, loader: Arc<dyn ModuleLoader>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        info!("Hot reload runtime created with {} loader", loader.kind());
        Self {
            config,
            registry: Arc::new(VersionRegistry::new()),
            dispatcher: Arc::new(ReloadDispatcher::new()),
            loader,
            bindings: DashMap::new(),
            event_tx,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create a runtime with the default configuration
    pub fn with_loader(loader: impl ModuleLoader + 'static) -> Self {
        Self::new(HotReloadConfig::default(), Arc::new(loader))
    }

    pub fn config(&self) -> &HotReloadConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VersionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<ReloadDispatcher> {
        &self.dispatcher
    }

    /// A factory resolving against this runtime's registry
    pub fn factory(&self) -> ObjectFactory {
        ObjectFactory::new(self.registry.clone())
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ReloadEvent> {
        self.event_tx.subscribe()
    }

    fn ensure_running(&self) -> HotResult<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Report::new(HotError::ShutDown));
        }
        Ok(())
    }

    fn context(&self) -> BindingContext {
        BindingContext {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            loader: self.loader.clone(),
            events: self.event_tx.clone(),
        }
    }

    /// Watch `path` and reload module `name` whenever it changes.
    ///
    /// A second bind for the same name is rejected or replaces the existing
    /// binding depending on [`DuplicateBindPolicy`]. The name is claimed
    /// before the new binding watches or loads anything, so a rejected bind
    /// never publishes.
    pub fn bind(
        &self,
        name: impl Into<ModuleName>,
        path: impl AsRef<Path>,
    ) -> HotResult<Arc<WatchBinding>> {
        self.ensure_running()?;
        let name = name.into();
        let path = path.as_ref();

        let binding = Arc::new(WatchBinding::new(
            name.clone(),
            path,
            self.config.watch.clone(),
            self.context(),
        ));

        // The map lock is never held while a binding starts or is disposed.
        let replaced = match self.bindings.entry(name.clone()) {
            Entry::Occupied(mut slot) => match self.config.duplicate_bind {
                DuplicateBindPolicy::Reject => {
                    let existing = slot.get().path().to_path_buf();
                    return Err(WatchError::AlreadyBound {
                        module: name,
                        path: existing,
                    })
                    .into_report();
                }
                DuplicateBindPolicy::Reattach => Some(slot.insert(binding.clone())),
            },
            Entry::Vacant(slot) => {
                slot.insert(binding.clone());
                None
            }
        };

        if let Some(old) = replaced {
            info!("Reattaching {} from {:?} to {:?}", name, old.path(), binding.path());
            old.dispose();
        }

        if let Err(e) = binding.bind() {
            self.bindings
                .remove_if(&name, |_, claimed| Arc::ptr_eq(claimed, &binding));
            return Err(e)
                .into_report()
                .map_err(|report| report.attach(format!("binding {} to {}", name, path.display())));
        }
        Ok(binding)
    }

    /// Dispose the binding for `name`.
    ///
    /// Fails with [`HotError::NotBound`] when nothing is bound under `name`.
    pub fn unbind(&self, name: &str) -> HotResult<()> {
        let Some((name, binding)) = self.bindings.remove(name) else {
            debug!("Unbind of {} ignored, nothing bound", name);
            return Err(Report::new(HotError::NotBound(ModuleName::new(name))));
        };
        binding.dispose();
        if !self.config.retain_units_on_unbind {
            self.registry.remove(name.as_str());
        }
        info!("Unbound module {}", name);
        Ok(())
    }

    pub fn binding(&self, name: &str) -> Option<Arc<WatchBinding>> {
        self.bindings.get(name).map(|b| b.clone())
    }

    /// Names of all bound modules, sorted
    pub fn bindings(&self) -> Vec<ModuleName> {
        let mut names: Vec<ModuleName> = self.bindings.iter().map(|b| b.key().clone()).collect();
        names.sort();
        names
    }

    pub fn subscribe<F>(&self, filter: impl Into<ModuleFilter>, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ReloadNotice) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(filter, callback)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.dispatcher.unsubscribe(handle)
    }

    /// Publish code directly, without a watched artifact, and notify
    /// subscribers. Returns the published unit with the dispatch report.
    pub fn publish(&self, code: LoadedCode) -> HotResult<(LoadedUnit, DispatchReport)> {
        self.ensure_running()?;
        let name = ModuleName::new(code.module_name());
        let (swap, report) = self
            .registry
            .swap_then(&name, code, |swap| self.dispatcher.notify_swap(swap));
        if !report.is_clean() {
            warn!(
                "{} subscriber(s) failed on publish of {}",
                report.failures.len(),
                name
            );
        }
        Ok((swap.current, report))
    }

    pub fn current(&self, name: &str) -> Option<LoadedUnit> {
        self.registry.current(name)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Dispose every binding and drop every subscriber. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let names: Vec<ModuleName> = self.bindings.iter().map(|b| b.key().clone()).collect();
        let mut disposed = 0;
        for name in names {
            if let Some((_, binding)) = self.bindings.remove(&name) {
                binding.dispose();
                disposed += 1;
            }
        }
        self.dispatcher.clear();
        if !self.config.retain_units_on_unbind {
            self.registry.clear();
        }
        info!("Hot reload runtime shut down ({} binding(s) disposed)", disposed);
    }
}

impl Drop for HotRuntime {
    fn drop(&mut self) {
        debug!("Dropping hot reload runtime");
        self.shutdown();
    }
}

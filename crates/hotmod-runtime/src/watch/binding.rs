//! Watch binding: one module name bound to one artifact path
//!
//! ```text
//! Unbound --bind--> Watching --change--> Reloading --done--> Watching
//!    \                 \                     \
//!     +-----------------+---------------------+--dispose--> Disposed
//! ```
//!
//! The binding watches the artifact's parent directory so rename-replace
//! writes are seen, filters events down to last-write style changes of the
//! artifact itself and hands them to a dedicated worker thread. The worker
//! coalesces bursts, then reads, loads, publishes and notifies on its own
//! thread.

use crossbeam_channel::{Receiver, Sender, select};
use hotmod_kernel::{ModuleLoader, ModuleName, ReloadDispatcher, VersionRegistry};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::reader::{digest, read_artifact};
use crate::config::WatchConfig;
use crate::error::{ReloadError, WatchError};
use crate::event::ReloadEvent;

/// Lifecycle state of a [`WatchBinding`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Watching,
    Reloading,
    Disposed,
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BindingState::Unbound => "unbound",
            BindingState::Watching => "watching",
            BindingState::Reloading => "reloading",
            BindingState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Successful result of one reload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new unit was published under this version
    Published { version: u64 },
    /// The artifact matched the last published bytes
    Unchanged,
}

/// Collaborators every binding reloads through
#[derive(Clone)]
pub struct BindingContext {
    pub registry: Arc<VersionRegistry>,
    pub dispatcher: Arc<ReloadDispatcher>,
    pub loader: Arc<dyn ModuleLoader>,
    pub events: broadcast::Sender<ReloadEvent>,
}

struct Shared {
    name: ModuleName,
    path: PathBuf,
    config: WatchConfig,
    ctx: BindingContext,
    state: Mutex<BindingState>,
    /// Serialises reloads from the worker and from `reload_now`
    reload_lock: ReentrantMutex<()>,
    /// Thread currently inside `reload`, if any
    reloading_on: Mutex<Option<ThreadId>>,
    last_digest: Mutex<Option<String>>,
    last_error: Mutex<Option<ReloadError>>,
    reload_count: AtomicU64,
    failures: AtomicU32,
    disposed: AtomicBool,
}

impl Shared {
    fn emit(&self, event: ReloadEvent) {
        // No receivers is fine.
        let _ = self.ctx.events.send(event);
    }

    fn transition(&self, from: BindingState, to: BindingState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        let target = self.path.file_name();
        let names_target = |p: &PathBuf| p.file_name() == target;
        match event.kind {
            EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
            | EventKind::Modify(ModifyKind::Name(RenameMode::Any))
            | EventKind::Any => event.paths.iter().any(names_target),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.last().is_some_and(names_target)
            }
            _ => false,
        }
    }

    fn reload(&self) -> Result<ReloadOutcome, ReloadError> {
        let _reloading = self.reload_lock.lock();
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ReloadError::Disposed(self.name.clone()));
        }

        let entered = self.transition(BindingState::Watching, BindingState::Reloading);
        self.emit(ReloadEvent::ReloadStarted {
            module: self.name.clone(),
            path: self.path.clone(),
        });
        debug!("Reloading {} from {:?}", self.name, self.path);

        let started = Instant::now();
        *self.reloading_on.lock() = Some(std::thread::current().id());
        let result = self.load_and_publish();
        *self.reloading_on.lock() = None;
        if entered {
            self.transition(BindingState::Reloading, BindingState::Watching);
        }

        match &result {
            Ok(ReloadOutcome::Published { version }) => {
                self.reload_count.fetch_add(1, Ordering::SeqCst);
                self.failures.store(0, Ordering::SeqCst);
                *self.last_error.lock() = None;
                info!(
                    "Reloaded {} v{} in {:?}",
                    self.name,
                    version,
                    started.elapsed()
                );
                self.emit(ReloadEvent::ReloadCompleted {
                    module: self.name.clone(),
                    path: self.path.clone(),
                    version: *version,
                    duration: started.elapsed(),
                });
            }
            Ok(ReloadOutcome::Unchanged) => {
                debug!("Artifact for {} unchanged, skipping", self.name);
                self.emit(ReloadEvent::ReloadSkipped {
                    module: self.name.clone(),
                    path: self.path.clone(),
                });
            }
            Err(ReloadError::Disposed(_)) => {
                debug!("Reload of {} abandoned, binding disposed", self.name);
            }
            Err(e) => {
                let attempt = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    "Reload of {} failed (attempt {}): {}; previous version stays current",
                    self.name, attempt, e
                );
                *self.last_error.lock() = Some(e.clone());
                self.emit(ReloadEvent::ReloadFailed {
                    module: self.name.clone(),
                    path: self.path.clone(),
                    error: e.to_string(),
                    attempt,
                });
            }
        }
        result
    }

    fn load_and_publish(&self) -> Result<ReloadOutcome, ReloadError> {
        let bytes = read_artifact(&self.path, &self.config.read_retry)?;
        let digest = digest(&bytes);
        if self.config.skip_unchanged && self.last_digest.lock().as_deref() == Some(digest.as_str())
        {
            return Ok(ReloadOutcome::Unchanged);
        }

        let code = self.ctx.loader.load(&bytes)?;
        if code.module_name() != self.name.as_str() {
            return Err(ReloadError::ModuleMismatch {
                expected: self.name.clone(),
                actual: code.module_name().to_string(),
            });
        }

        let dispatcher = &self.ctx.dispatcher;
        let disposed = &self.disposed;
        let (swap, report) = self
            .ctx
            .registry
            .try_swap_then(
                &self.name,
                code,
                || !disposed.load(Ordering::SeqCst),
                |swap| dispatcher.notify_swap(swap),
            )
            .ok_or_else(|| ReloadError::Disposed(self.name.clone()))?;
        *self.last_digest.lock() = Some(digest);

        if !report.is_clean() {
            debug!(
                "{} of {} subscriber(s) failed for {} v{}",
                report.failures.len(),
                report.invoked(),
                self.name,
                swap.current.version()
            );
        }
        Ok(ReloadOutcome::Published {
            version: swap.current.version(),
        })
    }
}

/// Binding of one module name to one artifact file
pub struct WatchBinding {
    shared: Arc<Shared>,
    /// Serialises starting against disposing
    lifecycle: Mutex<()>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    shutdown: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WatchBinding {
    /// Create an unbound binding; relative paths are made absolute
    pub fn new(
        name: impl Into<ModuleName>,
        path: impl AsRef<Path>,
        config: WatchConfig,
        ctx: BindingContext,
    ) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                path,
                config,
                ctx,
                state: Mutex::new(BindingState::Unbound),
                reload_lock: ReentrantMutex::new(()),
                reloading_on: Mutex::new(None),
                last_digest: Mutex::new(None),
                last_error: Mutex::new(None),
                reload_count: AtomicU64::new(0),
                failures: AtomicU32::new(0),
                disposed: AtomicBool::new(false),
            }),
            lifecycle: Mutex::new(()),
            watcher: Mutex::new(None),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &ModuleName {
        &self.shared.name
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn state(&self) -> BindingState {
        *self.shared.state.lock()
    }

    /// Error of the most recent failed reload, cleared by the next success
    pub fn last_error(&self) -> Option<ReloadError> {
        self.shared.last_error.lock().clone()
    }

    /// Number of reloads that published a new unit
    pub fn reload_count(&self) -> u64 {
        self.shared.reload_count.load(Ordering::SeqCst)
    }

    /// Start watching: `Unbound -> Watching`.
    ///
    /// With `initial_load` set, an existing artifact is loaded before this
    /// returns; a failure there is reported like any other reload failure
    /// and does not fail the bind.
    pub fn bind(&self) -> Result<(), WatchError> {
        let shared = &self.shared;
        {
            let _starting = self.lifecycle.lock();
            {
                let mut state = shared.state.lock();
                if *state != BindingState::Unbound {
                    return Err(WatchError::InvalidState {
                        module: shared.name.clone(),
                        state: state.to_string(),
                    });
                }
                *state = BindingState::Watching;
            }

            if let Err(e) = self.start_watching() {
                *shared.state.lock() = BindingState::Unbound;
                return Err(e);
            }

            info!("Watching {} at {:?}", shared.name, shared.path);
            shared.emit(ReloadEvent::WatchStarted {
                module: shared.name.clone(),
                path: shared.path.clone(),
            });
        }

        if shared.config.initial_load {
            if shared.path.exists() {
                // Failures are already reported through the usual channels.
                let _ = shared.reload();
            } else {
                debug!("No artifact yet for {} at {:?}", shared.name, shared.path);
            }
        }
        Ok(())
    }

    fn start_watching(&self) -> Result<(), WatchError> {
        let shared = &self.shared;
        let dir = shared
            .path
            .parent()
            .ok_or_else(|| WatchError::NoParent(shared.path.clone()))?;

        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = event_tx.send(result);
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("hotmod-watch-{}", shared.name))
            .spawn(move || run_worker(worker_shared, event_rx, shutdown_rx))
            .map_err(|e| WatchError::Spawn(e.to_string()))?;

        *self.watcher.lock() = Some(watcher);
        *self.shutdown.lock() = Some(shutdown_tx);
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Reload on the calling thread and return the outcome directly
    pub fn reload_now(&self) -> Result<ReloadOutcome, ReloadError> {
        self.shared.reload()
    }

    /// Stop watching: `* -> Disposed`.
    ///
    /// A reload already in progress completes first and no notification
    /// from this binding fires after this returns. Called from a subscriber
    /// (on the worker, or under a publish of the same module) it does not
    /// wait; a reload still queued behind the publish lock then publishes
    /// nothing. Disposing twice is a no-op.
    pub fn dispose(&self) {
        let shared = &self.shared;
        let (was, worker) = {
            let _stopping = self.lifecycle.lock();
            let was = {
                let mut state = shared.state.lock();
                if *state == BindingState::Disposed {
                    return;
                }
                std::mem::replace(&mut *state, BindingState::Disposed)
            };
            shared.disposed.store(true, Ordering::SeqCst);
            drop(self.watcher.lock().take());
            drop(self.shutdown.lock().take());
            (was, self.worker.lock().take())
        };
        if was == BindingState::Unbound {
            debug!("Binding {} disposed before it started", shared.name);
            return;
        }

        // No join while the worker may be waiting on a lock this thread holds.
        let current = std::thread::current().id();
        let nested = *shared.reloading_on.lock() == Some(current)
            || shared.ctx.registry.is_publishing(shared.name.as_str());
        match worker {
            Some(handle) if nested || handle.thread().id() == current => {
                // The worker exits on its own; its pending publish sees the
                // disposed flag under the publish lock.
                debug!("Binding {} disposed from inside a publish", shared.name);
            }
            Some(handle) => {
                if handle.join().is_err() {
                    error!("Watch worker for {} panicked", shared.name);
                }
                // Wait out a reload_now running on another thread.
                drop(shared.reload_lock.lock());
            }
            None => {
                if !nested {
                    drop(shared.reload_lock.lock());
                }
            }
        }

        info!("Stopped watching {} at {:?}", shared.name, shared.path);
        shared.emit(ReloadEvent::WatchStopped {
            module: shared.name.clone(),
            path: shared.path.clone(),
        });
    }
}

impl Drop for WatchBinding {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for WatchBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchBinding")
            .field("name", &self.shared.name)
            .field("path", &self.shared.path)
            .field("state", &self.state())
            .finish()
    }
}

fn run_worker(
    shared: Arc<Shared>,
    events: Receiver<notify::Result<Event>>,
    shutdown: Receiver<()>,
) {
    debug!("Watch worker for {} started", shared.name);
    let debounce = shared.config.debounce();

    'outer: loop {
        select! {
            recv(shutdown) -> _ => break 'outer,
            recv(events) -> msg => match msg {
                Ok(Ok(event)) if shared.is_relevant(&event) => {
                    debug!("Change event for {}: {:?}", shared.name, event.kind);
                }
                Ok(Ok(_)) => continue 'outer,
                Ok(Err(e)) => {
                    warn!("Watcher error for {}: {}", shared.name, e);
                    continue 'outer;
                }
                Err(_) => break 'outer,
            },
        }

        // Coalesce the burst: wait until no relevant event arrives for `debounce`.
        loop {
            select! {
                recv(shutdown) -> _ => break 'outer,
                recv(events) -> msg => match msg {
                    Ok(Ok(event)) if shared.is_relevant(&event) => {
                        debug!("Debounced event for {}", shared.name);
                    }
                    Ok(_) => {}
                    Err(_) => break 'outer,
                },
                default(debounce) => break,
            }
        }

        if shared.disposed.load(Ordering::SeqCst) {
            break;
        }
        // Failures are reported inside reload and never stop the loop.
        let _ = shared.reload();
    }
    debug!("Watch worker for {} exiting", shared.name);
}

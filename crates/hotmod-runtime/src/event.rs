//! Lifecycle events
//!
//! Broadcast to every receiver obtained from
//! [`HotRuntime::events`](crate::HotRuntime::events). Reload subscribers are
//! still notified synchronously through the dispatcher; these events are an
//! observation channel for logging, metrics and tests.

use hotmod_kernel::ModuleName;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ReloadEvent {
    /// A binding started watching its artifact
    WatchStarted { module: ModuleName, path: PathBuf },
    /// A reload began
    ReloadStarted { module: ModuleName, path: PathBuf },
    /// A new unit was published and subscribers were notified
    ReloadCompleted {
        module: ModuleName,
        path: PathBuf,
        version: u64,
        duration: Duration,
    },
    /// The artifact bytes matched the last published unit
    ReloadSkipped { module: ModuleName, path: PathBuf },
    /// A reload failed; the previous unit stays current
    ReloadFailed {
        module: ModuleName,
        path: PathBuf,
        error: String,
        /// Consecutive failures of this binding
        attempt: u32,
    },
    /// A binding was disposed
    WatchStopped { module: ModuleName, path: PathBuf },
}

impl ReloadEvent {
    pub fn module(&self) -> &ModuleName {
        match self {
            ReloadEvent::WatchStarted { module, .. }
            | ReloadEvent::ReloadStarted { module, .. }
            | ReloadEvent::ReloadCompleted { module, .. }
            | ReloadEvent::ReloadSkipped { module, .. }
            | ReloadEvent::ReloadFailed { module, .. }
            | ReloadEvent::WatchStopped { module, .. } => module,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReloadEvent::ReloadCompleted { .. }
                | ReloadEvent::ReloadSkipped { .. }
                | ReloadEvent::ReloadFailed { .. }
        )
    }
}

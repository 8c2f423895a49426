//! hotmod runtime
//!
//! Drives the hot reload pipeline end to end:
//! - Watch bindings tying a module name to an artifact file
//! - Debounced, retrying artifact reads
//! - Load, swap and notify on every change
//! - A lifecycle event stream for observers
//! - [`HotRuntime`], the explicit process-wide state object

pub mod artifact;
pub mod config;
pub mod error;
mod event;
mod runtime;
pub mod watch;

pub use config::{DuplicateBindPolicy, HotReloadConfig, RetryPolicy, WatchConfig};
pub use error::{HotError, HotResult, IntoHotReport, ReloadError, WatchError};
pub use event::ReloadEvent;
pub use runtime::HotRuntime;
pub use watch::{BindingState, ReloadOutcome, WatchBinding};

// Re-export the kernel surface callers need alongside the runtime
pub use hotmod_kernel::{
    LoadedCode, LoadedUnit, ModuleFilter, ModuleLoader, ModuleName, ObjectFactory, ReflectiveObject,
    ReloadNotice, SubscriptionHandle, Value, ValueKind,
};

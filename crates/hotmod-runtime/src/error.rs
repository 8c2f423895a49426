//! Typed errors and result aliases for the hot reload runtime.

use error_stack::Report;
use hotmod_kernel::{LoadError, ModuleName};
use std::path::PathBuf;
use thiserror::Error;

/// Error-stack–backed result alias for runtime operations.
///
/// Equivalent to `Result<T, error_stack::Report<HotError>>`.
pub type HotResult<T> = ::std::result::Result<T, Report<HotError>>;

/// Extension trait to convert typed runtime results into [`HotResult<T>`].
pub trait IntoHotReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> HotResult<T>;
}

impl<T, E> IntoHotReport<T> for ::std::result::Result<T, E>
where
    E: Into<HotError>,
{
    #[inline]
    fn into_report(self) -> HotResult<T> {
        self.map_err(|e| Report::new(e.into()))
    }
}

/// Failures of a single reload attempt.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ReloadError {
    /// The artifact could not be read, even after retrying.
    #[error("Failed to read {path:?} after {attempts} attempt(s): {reason}")]
    Read {
        path: PathBuf,
        attempts: u32,
        reason: String,
    },

    /// The loader rejected the artifact.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// The artifact declares a different module than the binding watches.
    #[error("Artifact declares module {actual}, binding watches {expected}")]
    ModuleMismatch { expected: ModuleName, actual: String },

    /// The binding was disposed before the reload started.
    #[error("Binding for {0} is disposed")]
    Disposed(ModuleName),
}

/// Failures setting up or tearing down a watch.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchError {
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Watch path has no parent directory: {0:?}")]
    NoParent(PathBuf),

    #[error("Module {module} is already bound to {path:?}")]
    AlreadyBound { module: ModuleName, path: PathBuf },

    #[error("Binding for {module} cannot start from state {state}")]
    InvalidState { module: ModuleName, state: String },

    #[error("Failed to spawn watch worker: {0}")]
    Spawn(String),
}

/// Crate-level error for runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HotError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Reload error: {0}")]
    Reload(#[from] ReloadError),

    #[error("Module not bound: {0}")]
    NotBound(ModuleName),

    #[error("Runtime is shut down")]
    ShutDown,
}

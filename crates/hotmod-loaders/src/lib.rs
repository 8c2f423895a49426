//! hotmod loaders
//!
//! Concrete [`ModuleLoader`](hotmod_kernel::ModuleLoader) implementations:
//!
//! - [`script`]: TOML unit manifests whose bodies are Rhai functions
//! - [`dylib`]: native shared libraries exporting a unit via [`declare_unit!`]

use sha2::{Digest, Sha256};

#[cfg(feature = "script")]
pub mod script;
#[cfg(feature = "script")]
pub use script::{ScriptLimits, ScriptLoader};

#[cfg(feature = "dylib")]
pub mod dylib;
#[cfg(feature = "dylib")]
pub use dylib::{DylibLoader, UNIT_API_VERSION};

/// Hex SHA-256 of artifact bytes
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

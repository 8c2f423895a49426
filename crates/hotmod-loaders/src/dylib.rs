//! Native dynamic-library units
//!
//! A library built as a `cdylib` exports its unit with [`declare_unit!`].
//! Each load writes the bytes to a fresh file so the platform loader never
//! hands back a cached handle for an earlier version. Libraries are never
//! closed: instances and vtables created by an old version must stay valid.

use hotmod_kernel::{LoadError, LoadedCode, ModuleLoader, TypeShape, UnitCode};
use libloading::{Library, Symbol};
use std::io::Write;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::content_digest;

/// API version a library must report through `_hotmod_api_version`
pub const UNIT_API_VERSION: u32 = 1;

const API_VERSION_SYMBOL: &[u8] = b"_hotmod_api_version";
const ENTRY_SYMBOL: &[u8] = b"_hotmod_unit_entry";

/// Loader for native shared libraries
pub struct DylibLoader {
    /// Directory copies are written to; the system temp dir when unset
    staging_dir: Option<PathBuf>,
    api_version: u32,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self {
            staging_dir: None,
            api_version: UNIT_API_VERSION,
        }
    }

    /// Write library copies into `dir` instead of the system temp dir
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    fn stage(&self, bytes: &[u8]) -> Result<PathBuf, LoadError> {
        let mut builder = tempfile::Builder::new();
        builder
            .prefix("hotmod-")
            .suffix(std::env::consts::DLL_SUFFIX);
        let file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = file.map_err(|e| LoadError::Io(e.to_string()))?;
        file.write_all(bytes)
            .and_then(|_| file.flush())
            .map_err(|e| LoadError::Io(e.to_string()))?;
        let (_, path) = file.keep().map_err(|e| LoadError::Io(e.to_string()))?;
        Ok(path)
    }

    fn open(&self, path: &Path, digest: String) -> Result<DylibUnit, LoadError> {
        let library = unsafe { Library::new(path) }
            .map_err(|e| LoadError::Malformed(format!("cannot open library: {}", e)))?;

        let api_version = unsafe {
            let version_fn: Symbol<unsafe extern "C" fn() -> u32> = library
                .get(API_VERSION_SYMBOL)
                .map_err(|e| LoadError::Malformed(format!("missing _hotmod_api_version: {}", e)))?;
            version_fn()
        };
        if api_version != self.api_version {
            return Err(LoadError::Incompatible {
                expected: self.api_version,
                actual: api_version,
            });
        }

        let code = unsafe {
            let entry: Symbol<unsafe extern "C" fn() -> *mut LoadedCode> = library
                .get(ENTRY_SYMBOL)
                .map_err(|e| LoadError::Malformed(format!("missing _hotmod_unit_entry: {}", e)))?;
            let raw = entry();
            if raw.is_null() {
                return Err(LoadError::Malformed(
                    "unit entry returned null".to_string(),
                ));
            }
            *Box::from_raw(raw)
        };

        Ok(DylibUnit {
            code,
            digest,
            path: path.to_path_buf(),
            _library: ManuallyDrop::new(library),
        })
    }
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, bytes: &[u8]) -> Result<LoadedCode, LoadError> {
        let digest = content_digest(bytes);
        let path = self.stage(bytes)?;
        debug!("Staged library copy at {:?}", path);

        match self.open(&path, digest) {
            Ok(unit) => {
                info!(
                    "Loaded native unit {} from {:?}",
                    unit.code.module_name(),
                    unit.path
                );
                Ok(Arc::new(unit))
            }
            Err(e) => {
                warn!("Rejected native unit: {}", e);
                // Nothing was mapped from a copy that failed to open.
                if let Err(remove) = std::fs::remove_file(&path) {
                    debug!("Could not remove rejected copy {:?}: {}", path, remove);
                }
                Err(e)
            }
        }
    }

    fn kind(&self) -> &'static str {
        "dylib"
    }
}

/// Code exported by a loaded library
pub struct DylibUnit {
    code: LoadedCode,
    digest: String,
    path: PathBuf,
    _library: ManuallyDrop<Library>,
}

impl DylibUnit {
    /// Path of the staged copy the library was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UnitCode for DylibUnit {
    fn module_name(&self) -> &str {
        self.code.module_name()
    }

    fn type_names(&self) -> Vec<&str> {
        self.code.type_names()
    }

    fn resolve_type(&self, name: &str) -> Option<Arc<dyn TypeShape>> {
        self.code.resolve_type(name)
    }

    fn digest(&self) -> Option<&str> {
        Some(&self.digest)
    }
}

/// Export a unit from a `cdylib`.
///
/// ```ignore
/// use hotmod_kernel::native::{NativeMethod, NativeType, NativeUnit};
///
/// hotmod_loaders::declare_unit!(
///     NativeUnit::builder("greeter")
///         .with_type(NativeType::new("T").with_method(NativeMethod::instance(
///             "Greet",
///             |_, _| Ok("hi".into()),
///         )))
///         .build()
/// );
/// ```
#[macro_export]
macro_rules! declare_unit {
    ($build:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _hotmod_api_version() -> u32 {
            $crate::dylib::UNIT_API_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _hotmod_unit_entry() -> *mut $crate::dylib::ExportedCode {
            let code: $crate::dylib::ExportedCode = $build;
            Box::into_raw(Box::new(code))
        }
    };
}

#[doc(hidden)]
pub type ExportedCode = LoadedCode;

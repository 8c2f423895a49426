//! Artifact path conventions
//!
//! A live artifact `greeter.toml` is hot-loaded from its staged sibling
//! `greeter.hot.toml`. Writers replace the staged file atomically with
//! [`stage`] so a binding never observes a half-written artifact.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

const STAGED_MARKER: &str = "hot";

/// The staged name for a live artifact: `.hot` inserted before the extension
pub fn staged_path(live: &Path) -> PathBuf {
    let stem = live.file_stem().unwrap_or_default();
    let mut name = OsString::from(stem);
    name.push(".");
    name.push(STAGED_MARKER);
    if let Some(ext) = live.extension() {
        name.push(".");
        name.push(ext);
    }
    live.with_file_name(name)
}

/// Whether `path` follows the staged naming convention
pub fn is_staged(path: &Path) -> bool {
    let stem = match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) => stem,
        None => return false,
    };
    match path.extension() {
        Some(_) => Path::new(stem).extension().is_some_and(|e| e == STAGED_MARKER),
        None => false,
    }
}

/// Replace `path` with `bytes` atomically: write a temp file in the same
/// directory, then rename it over the target
pub fn stage(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut file = tempfile::Builder::new()
        .prefix(".hotmod-stage-")
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Resolve `file_name` next to the running executable
pub fn beside_executable(file_name: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "executable has no parent directory")
    })?;
    Ok(dir.join(file_name))
}

/// The staged artifact for `live_name`, next to the running executable
pub fn staged_beside_executable(live_name: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    Ok(staged_path(&beside_executable(live_name)?))
}

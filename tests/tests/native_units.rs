//! Native units built from `tests/fixtures/greeter-unit` and loaded through
//! the dylib loader.

use hotmod_kernel::{LoadError, LoadedUnit, ModuleLoader, ObjectFactory, Value, VersionRegistry};
use hotmod_loaders::{DylibLoader, UNIT_API_VERSION};
use hotmod_runtime::HotRuntime;
use hotmod_testing::{ArtifactDir, NoticeRecorder, init_tracing};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const FIXTURE: &str = "hotmod-greeter-unit";

/// Library bytes per feature set; builds share one target dir
fn fixture_library(feature: Option<&str>) -> Vec<u8> {
    static BUILT: OnceLock<Mutex<HashMap<Option<String>, Vec<u8>>>> = OnceLock::new();
    let built = BUILT.get_or_init(|| Mutex::new(HashMap::new()));
    let mut built = built.lock();
    let key = feature.map(str::to_string);
    if let Some(bytes) = built.get(&key) {
        return bytes.clone();
    }

    let workspace = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..");
    let target_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("greeter-unit");
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut build = Command::new(cargo);
    build
        .arg("build")
        .args(["-p", FIXTURE])
        .arg("--manifest-path")
        .arg(workspace.join("Cargo.toml"))
        .arg("--offline")
        .arg("--target-dir")
        .arg(&target_dir);
    if let Some(feature) = feature {
        build.args(["--features", feature]);
    }
    let output = build.output().expect("failed to run cargo");
    assert!(
        output.status.success(),
        "building {} ({:?}) failed:\n{}",
        FIXTURE,
        feature,
        String::from_utf8_lossy(&output.stderr)
    );

    let library = target_dir.join("debug").join(format!(
        "{}hotmod_greeter_unit{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    ));
    let bytes = std::fs::read(&library).unwrap();
    built.insert(key, bytes.clone());
    bytes
}

fn loader(dir: &ArtifactDir) -> DylibLoader {
    DylibLoader::new().with_staging_dir(dir.path())
}

#[test]
fn test_declared_unit_loads_and_constructs() {
    init_tracing();
    let dir = ArtifactDir::new().unwrap();
    let code = loader(&dir).load(&fixture_library(None)).unwrap();

    assert_eq!(code.module_name(), "native_greeter");
    assert_eq!(code.type_names(), vec!["T"]);
    assert!(code.digest().is_some());

    let unit = LoadedUnit::detached(code);
    let factory = ObjectFactory::new(Arc::new(VersionRegistry::new()));
    let obj = factory.construct_from(&unit, "T", vec![]).unwrap();
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "hi from native");
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "hi from native");
    assert_eq!(obj.get_value("calls").unwrap(), Value::Int(2));
}

#[test]
fn test_each_load_gets_its_own_copy() {
    let dir = ArtifactDir::new().unwrap();
    let bytes = fixture_library(None);
    let loader = loader(&dir);
    let first = loader.load(&bytes).unwrap();
    let second = loader.load(&bytes).unwrap();

    assert_eq!(first.digest(), second.digest());
    // Both copies stay mapped while their units are alive.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn test_wrong_api_version_is_incompatible() {
    let dir = ArtifactDir::new().unwrap();
    match loader(&dir).load(&fixture_library(Some("wrong-api"))) {
        Err(LoadError::Incompatible { expected, actual }) => {
            assert_eq!(expected, UNIT_API_VERSION);
            assert_eq!(actual, UNIT_API_VERSION + 1);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("incompatible library loaded"),
    }
}

#[test]
fn test_missing_symbols_are_malformed() {
    let dir = ArtifactDir::new().unwrap();
    let loader = loader(&dir);

    match loader.load(&fixture_library(Some("no-entry"))) {
        Err(LoadError::Malformed(reason)) => assert!(reason.contains("_hotmod_unit_entry")),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("library without an entry loaded"),
    }
    match loader.load(&fixture_library(Some("bare"))) {
        Err(LoadError::Malformed(reason)) => assert!(reason.contains("_hotmod_api_version")),
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("library without symbols loaded"),
    }
}

#[test]
fn test_bound_library_publishes_through_runtime() {
    init_tracing();
    let artifacts = ArtifactDir::new().unwrap();
    let staging = ArtifactDir::new().unwrap();
    let path = artifacts
        .write("greeter.unit", fixture_library(None))
        .unwrap();

    let rt = HotRuntime::with_loader(loader(&staging));
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "native_greeter");
    let binding = rt.bind("native_greeter", &path).unwrap();

    assert_eq!(recorder.next(Duration::from_secs(5)).unwrap().current, 1);
    assert_eq!(binding.reload_count(), 1);
    let obj = rt.factory().construct("native_greeter::T", vec![]).unwrap();
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "hi from native");

    // A broken rebuild leaves the published library in place.
    artifacts
        .write("greeter.unit", fixture_library(Some("wrong-api")))
        .unwrap();
    assert!(binding.reload_now().is_err());
    assert_eq!(rt.current("native_greeter").unwrap().version(), 1);
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "hi from native");
}

use hotmod_kernel::{LoadedUnit, ModuleLoader, Value};
use hotmod_loaders::ScriptLoader;
use hotmod_runtime::{BindingState, HotReloadConfig, HotRuntime, ReloadError, WatchConfig};
use hotmod_testing::{
    ArtifactDir, NoticeRecorder, RecordedNotice, assert_notified, greeter_manifest, init_tracing,
    wait_until,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(400);

fn runtime() -> HotRuntime {
    init_tracing();
    let config = HotReloadConfig::new()
        .with_watch(WatchConfig::new().with_debounce(Duration::from_millis(30)));
    HotRuntime::new(config, Arc::new(ScriptLoader::new()))
}

fn notice(previous: Option<u64>, current: u64) -> RecordedNotice {
    RecordedNotice {
        module: "greeter".to_string(),
        previous,
        current,
    }
}

#[test]
fn test_end_to_end_swap_keeps_old_wrappers_on_old_unit() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir
        .write("greeter.hot.toml", greeter_manifest("greeter", "hi"))
        .unwrap();

    let rt = runtime();
    let binding = rt.bind("greeter", &path).unwrap();
    assert_eq!(binding.state(), BindingState::Watching);
    let a1 = rt.current("greeter").unwrap();

    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");
    let old = rt.factory().construct("greeter::T", vec![]).unwrap();
    assert_eq!(old.call::<String>("greet", vec![]).unwrap(), "hi");

    dir.write("greeter.hot.toml", greeter_manifest("greeter", "hi v2"))
        .unwrap();
    assert_eq!(recorder.next(WAIT), Some(notice(Some(1), 2)));
    assert!(recorder.stays_quiet(QUIET));
    assert_notified!(recorder, 1);

    let notices = recorder.notices();
    let swap = &notices[0];
    assert!(swap.previous.as_ref().unwrap().same_unit(&a1));
    let a2 = rt.current("greeter").unwrap();
    assert!(swap.current.same_unit(&a2));

    let fresh = rt.factory().construct("greeter::T", vec![]).unwrap();
    assert_eq!(fresh.call::<String>("greet", vec![]).unwrap(), "hi v2");
    assert_eq!(
        fresh.invoke("shout", vec![Value::Int(2)]).unwrap(),
        Value::from("hi v2!hi v2!")
    );

    // Bound to A1 for as long as it lives.
    assert!(old.unit().same_unit(&a1));
    assert_eq!(old.call::<String>("greet", vec![]).unwrap(), "hi");
}

#[test]
fn test_malformed_artifact_keeps_current_version() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir
        .write("greeter.hot.toml", greeter_manifest("greeter", "hi"))
        .unwrap();

    let rt = runtime();
    let binding = rt.bind("greeter", &path).unwrap();
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");

    dir.write("greeter.hot.toml", "module = \"greeter\"\nscript = 'fn broken( {'\n")
        .unwrap();
    assert!(wait_until(WAIT, || binding.last_error().is_some()));
    assert!(matches!(binding.last_error(), Some(ReloadError::Load(_))));
    assert_eq!(rt.current("greeter").unwrap().version(), 1);
    assert_notified!(recorder, 0);

    // The watch loop survives and picks up the next good artifact.
    dir.write("greeter.hot.toml", greeter_manifest("greeter", "back"))
        .unwrap();
    assert_eq!(recorder.next(WAIT), Some(notice(Some(1), 2)));
    assert!(binding.last_error().is_none());
}

#[test]
fn test_in_place_overwrite_is_picked_up() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir
        .overwrite("greeter.hot.toml", greeter_manifest("greeter", "hi"))
        .unwrap();

    let rt = runtime();
    rt.bind("greeter", &path).unwrap();
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");

    dir.overwrite("greeter.hot.toml", greeter_manifest("greeter", "again"))
        .unwrap();
    assert_eq!(recorder.next(WAIT), Some(notice(Some(1), 2)));
    assert!(recorder.stays_quiet(QUIET));
}

#[test]
fn test_no_notifications_after_dispose() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir
        .write("greeter.hot.toml", greeter_manifest("greeter", "hi"))
        .unwrap();

    let rt = runtime();
    let binding = rt.bind("greeter", &path).unwrap();
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");

    binding.dispose();
    binding.dispose();
    assert_eq!(binding.state(), BindingState::Disposed);

    dir.write("greeter.hot.toml", greeter_manifest("greeter", "late"))
        .unwrap();
    assert!(recorder.stays_quiet(QUIET));
    assert_eq!(rt.current("greeter").unwrap().version(), 1);
}

#[test]
fn test_bind_before_artifact_exists() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir.file("greeter.hot.toml");

    let rt = runtime();
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");
    rt.bind("greeter", &path).unwrap();
    assert!(rt.current("greeter").is_none());

    dir.write("greeter.hot.toml", greeter_manifest("greeter", "hi"))
        .unwrap();
    assert_eq!(recorder.next(WAIT), Some(notice(None, 1)));
}

#[test]
fn test_latest_or_falls_back_to_static_unit() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir.file("greeter.hot.toml");
    let rt = runtime();

    let builtin = ScriptLoader::new()
        .load(greeter_manifest("greeter", "built in").as_bytes())
        .unwrap();
    let builtin = LoadedUnit::detached(builtin);
    assert_eq!(builtin.version(), 0);

    let unit = rt.registry().latest_or(&builtin);
    assert!(unit.same_unit(&builtin));
    let obj = rt.factory().construct_from(&unit, "T", vec![]).unwrap();
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "built in");

    dir.write("greeter.hot.toml", greeter_manifest("greeter", "hot"))
        .unwrap();
    rt.bind("greeter", &path).unwrap();
    let unit = rt.registry().latest_or(&builtin);
    assert_eq!(unit.version(), 1);
    let obj = rt.factory().construct_from(&unit, "T", vec![]).unwrap();
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "hot");
}

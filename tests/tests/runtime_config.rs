use hotmod_loaders::ScriptLoader;
use hotmod_runtime::artifact::{self, staged_path};
use hotmod_runtime::{DuplicateBindPolicy, HotReloadConfig, HotRuntime, ReloadEvent};
use hotmod_testing::{ArtifactDir, greeter_manifest, init_tracing};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

async fn next_terminal(events: &mut Receiver<ReloadEvent>) -> ReloadEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a reload event")
            .expect("event channel closed");
        if event.is_terminal() {
            return event;
        }
    }
}

#[test]
fn test_runtime_from_config_file() {
    let dir = ArtifactDir::new().unwrap();
    let config_path = dir
        .overwrite(
            "hotmod.yaml",
            "duplicate_bind: reattach\nwatch:\n  debounce_ms: 25\n  initial_load: false\n",
        )
        .unwrap();
    let vars = HashMap::from([("HOTMOD_EVENT_CAPACITY".to_string(), "16".to_string())]);
    let config = HotReloadConfig::from_file_with_env(&config_path, vars).unwrap();
    assert_eq!(config.duplicate_bind, DuplicateBindPolicy::Reattach);
    assert_eq!(config.event_capacity, 16);

    let live = dir.file("greeter.toml");
    let staged = staged_path(&live);
    artifact::stage(&staged, greeter_manifest("greeter", "hi").as_bytes()).unwrap();

    let rt = HotRuntime::new(config, Arc::new(ScriptLoader::new()));
    rt.bind("greeter", &staged).unwrap();
    // initial_load is off
    assert!(rt.current("greeter").is_none());
    assert!(artifact::is_staged(&staged));
    assert_eq!(staged.file_name().unwrap(), "greeter.hot.toml");
}

#[test]
fn test_config_errors_carry_path() {
    let dir = ArtifactDir::new().unwrap();
    let path = dir.overwrite("hotmod.toml", "event_capacity = \"lots\"\n").unwrap();
    let report = HotReloadConfig::from_file(&path).unwrap_err();
    assert!(format!("{report:?}").contains("hotmod.toml"));
    assert!(HotReloadConfig::from_file(Path::new("hotmod.xml")).is_err());
}

#[tokio::test]
async fn test_event_stream_follows_watch_loop() {
    init_tracing();
    let dir = ArtifactDir::new().unwrap();
    let path = dir
        .write("greeter.hot.toml", greeter_manifest("greeter", "hi"))
        .unwrap();

    let rt = HotRuntime::with_loader(ScriptLoader::new());
    let mut events = rt.events();
    rt.bind("greeter", &path).unwrap();

    match events.recv().await.unwrap() {
        ReloadEvent::WatchStarted { module, .. } => assert_eq!(module.as_str(), "greeter"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        next_terminal(&mut events).await,
        ReloadEvent::ReloadCompleted { version: 1, .. }
    ));

    dir.write("greeter.hot.toml", "not a manifest = [").unwrap();
    match next_terminal(&mut events).await {
        ReloadEvent::ReloadFailed { error, attempt, .. } => {
            assert!(attempt >= 1);
            assert!(!error.is_empty());
        }
        other => panic!("unexpected {:?}", other),
    }

    dir.write("greeter.hot.toml", greeter_manifest("greeter", "hi v2"))
        .unwrap();
    match next_terminal(&mut events).await {
        ReloadEvent::ReloadCompleted { version, duration, .. } => {
            assert_eq!(version, 2);
            assert!(duration < Duration::from_secs(5));
        }
        other => panic!("unexpected {:?}", other),
    }

    rt.unbind("greeter").unwrap();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if let ReloadEvent::WatchStopped { .. } = event {
            break;
        }
    }
}

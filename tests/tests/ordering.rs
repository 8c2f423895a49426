use hotmod_kernel::native::{NativeMethod, NativeType, NativeUnit};
use hotmod_kernel::{LoadedCode, ModuleFilter, Value, ValueKind};
use hotmod_loaders::ScriptLoader;
use hotmod_runtime::{
    BindingState, DuplicateBindPolicy, HotError, HotReloadConfig, HotRuntime, WatchConfig,
    WatchError, artifact,
};
use hotmod_testing::{ArtifactDir, NoticeRecorder, greeter_manifest, init_tracing, wait_until};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn tagged(module: &str, tag: i64) -> LoadedCode {
    NativeUnit::builder(module)
        .with_type(NativeType::new("Tag").with_method(
            NativeMethod::static_fn("tag", move |_| Ok(Value::Int(tag))).with_returns(ValueKind::Int),
        ))
        .build()
}

#[test]
fn test_per_name_notifications_follow_publish_order() {
    init_tracing();
    let rt = Arc::new(HotRuntime::with_loader(ScriptLoader::new()));
    let alpha = NoticeRecorder::attach(rt.dispatcher(), "alpha");
    let all = NoticeRecorder::attach(rt.dispatcher(), ModuleFilter::Any);

    let threads = 8;
    let per_thread = 25;
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            let rt = rt.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let module = if t % 2 == 0 { "alpha" } else { "beta" };
                    rt.publish(tagged(module, (t * per_thread + i) as i64)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let total = (threads / 2 * per_thread) as u64;
    let versions: Vec<u64> = alpha.history().iter().map(|n| n.current).collect();
    assert_eq!(versions, (1..=total).collect::<Vec<_>>());
    for notice in alpha.history() {
        assert_eq!(notice.previous, notice.current.checked_sub(1).filter(|v| *v > 0));
    }

    for module in ["alpha", "beta"] {
        let seen: Vec<u64> = all
            .history()
            .into_iter()
            .filter(|n| n.module == module)
            .map(|n| n.current)
            .collect();
        assert_eq!(seen, (1..=total).collect::<Vec<_>>());
    }
    assert_eq!(rt.current("beta").unwrap().version(), total);
}

#[test]
fn test_reentrant_publish_from_subscriber() {
    let rt = Arc::new(HotRuntime::with_loader(ScriptLoader::new()));
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "derived");

    let weak = Arc::downgrade(&rt);
    let _bridge = rt.subscribe("source", move |notice| {
        if let Some(rt) = weak.upgrade() {
            rt.publish(tagged("derived", notice.current.version() as i64))
                .map_err(|e| format!("{e:?}"))?;
        }
        Ok(())
    });

    rt.publish(tagged("source", 0)).unwrap();
    rt.publish(tagged("source", 0)).unwrap();

    let derived: Vec<u64> = recorder.history().iter().map(|n| n.current).collect();
    assert_eq!(derived, vec![1, 2]);
    let obj = rt.factory().construct("derived::Tag", vec![]).unwrap();
    assert_eq!(obj.call::<i64>("tag", vec![]).unwrap(), 2);
}

#[test]
fn test_failing_subscriber_does_not_block_others() {
    let rt = HotRuntime::with_loader(ScriptLoader::new());
    let _fails = rt.subscribe("m", |_| Err("migration failed".into()));
    let _panics = rt.subscribe("m", |_| panic!("subscriber bug"));
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "m");

    let (unit, report) = rt.publish(tagged("m", 1)).unwrap();
    assert_eq!(unit.version(), 1);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures[1].panicked);
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_duplicate_bind_policies() {
    init_tracing();
    let dir = ArtifactDir::new().unwrap();
    let first = dir.write("a.hot.toml", greeter_manifest("greeter", "a")).unwrap();
    let second = dir.write("b.hot.toml", greeter_manifest("greeter", "b")).unwrap();

    let strict = HotRuntime::with_loader(ScriptLoader::new());
    strict.bind("greeter", &first).unwrap();
    let err = strict.bind("greeter", &second).unwrap_err();
    assert!(matches!(
        err.current_context(),
        HotError::Watch(WatchError::AlreadyBound { .. })
    ));
    assert_eq!(strict.bindings().len(), 1);

    let relaxed = HotRuntime::new(
        HotReloadConfig::new().with_duplicate_bind(DuplicateBindPolicy::Reattach),
        Arc::new(ScriptLoader::new()),
    );
    let recorder = NoticeRecorder::attach(relaxed.dispatcher(), "greeter");
    let old = relaxed.bind("greeter", &first).unwrap();
    relaxed.bind("greeter", &second).unwrap();
    assert_eq!(relaxed.bindings().len(), 1);

    // Writes to the old path no longer reach the registry.
    dir.write("a.hot.toml", greeter_manifest("greeter", "stale")).unwrap();
    assert!(recorder.stays_quiet(Duration::from_millis(400)));
    assert_eq!(recorder.count(), 2);
    assert_eq!(old.state(), hotmod_runtime::BindingState::Disposed);

    let obj = relaxed.factory().construct("greeter::T", vec![]).unwrap();
    assert_eq!(obj.call::<String>("greet", vec![]).unwrap(), "b");
}

#[test]
fn test_unbind_from_subscriber_while_watcher_waits_to_publish() {
    init_tracing();
    let dir = ArtifactDir::new().unwrap();
    let path = dir.write("greeter.hot.toml", greeter_manifest("greeter", "v1")).unwrap();
    let config = HotReloadConfig::new()
        .with_watch(WatchConfig::new().with_debounce(Duration::from_millis(20)));
    let rt = Arc::new(HotRuntime::new(config, Arc::new(ScriptLoader::new())));
    let binding = rt.bind("greeter", &path).unwrap();
    assert_eq!(rt.current("greeter").unwrap().version(), 1);
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");

    // On the host's publish: change the artifact, let the watcher block on
    // the publish lock this thread holds, then unbind.
    let fired = Arc::new(AtomicBool::new(false));
    let worker_reloading = Arc::new(AtomicBool::new(false));
    let _unbinder = {
        let weak = Arc::downgrade(&rt);
        let binding = binding.clone();
        let fired = fired.clone();
        let worker_reloading = worker_reloading.clone();
        let path = path.clone();
        rt.subscribe("greeter", move |_| {
            if fired.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            artifact::stage(&path, greeter_manifest("greeter", "v3").as_bytes())
                .map_err(|e| e.to_string())?;
            if wait_until(Duration::from_secs(5), || {
                binding.state() == BindingState::Reloading
            }) {
                worker_reloading.store(true, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(100));
            if let Some(rt) = weak.upgrade() {
                rt.unbind("greeter").map_err(|e| format!("{e:?}"))?;
            }
            Ok(())
        })
    };

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let host = {
        let rt = rt.clone();
        std::thread::spawn(move || {
            let (unit, report) = rt.publish(tagged("greeter", 2)).unwrap();
            let _ = done_tx.send((unit.version(), report.is_clean()));
        })
    };
    let (version, clean) = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("publish with an unbinding subscriber never returned");
    host.join().unwrap();

    assert_eq!(version, 2);
    assert!(clean);
    assert!(worker_reloading.load(Ordering::SeqCst));
    assert_eq!(binding.state(), BindingState::Disposed);
    assert!(rt.binding("greeter").is_none());

    assert_eq!(recorder.next(Duration::from_secs(1)).unwrap().current, 2);
    // The reload that was waiting on the lock is dropped, not published.
    assert!(recorder.stays_quiet(Duration::from_millis(400)));
    assert_eq!(recorder.count(), 1);
    assert_eq!(rt.current("greeter").unwrap().version(), 2);
    assert_eq!(binding.reload_count(), 1);
    assert!(binding.last_error().is_none());
}

#[test]
fn test_concurrent_binds_publish_only_the_winner() {
    init_tracing();
    let dir = ArtifactDir::new().unwrap();
    let contenders = 6;
    let paths: Vec<_> = (0..contenders)
        .map(|i| {
            dir.write(
                &format!("greeter-{i}.hot.toml"),
                greeter_manifest("greeter", &format!("from {i}")),
            )
            .unwrap()
        })
        .collect();

    let rt = Arc::new(HotRuntime::with_loader(ScriptLoader::new()));
    let recorder = NoticeRecorder::attach(rt.dispatcher(), "greeter");
    let barrier = Arc::new(Barrier::new(contenders));
    let attempts: Vec<_> = paths
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, path)| {
            let rt = rt.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                (i, rt.bind("greeter", &path))
            })
        })
        .collect();

    let mut winners = Vec::new();
    for attempt in attempts {
        match attempt.join().unwrap() {
            (i, Ok(binding)) => winners.push((i, binding)),
            (_, Err(err)) => assert!(matches!(
                err.current_context(),
                HotError::Watch(WatchError::AlreadyBound { .. })
            )),
        }
    }
    assert_eq!(winners.len(), 1);
    let (winner, binding) = &winners[0];
    assert_eq!(binding.path(), paths[*winner].as_path());
    assert_eq!(binding.state(), BindingState::Watching);

    assert_eq!(recorder.next(Duration::from_secs(1)).unwrap().current, 1);
    assert!(recorder.stays_quiet(Duration::from_millis(300)));
    assert_eq!(recorder.count(), 1);
    assert_eq!(rt.current("greeter").unwrap().version(), 1);
    let obj = rt.factory().construct("greeter::T", vec![]).unwrap();
    assert_eq!(
        obj.call::<String>("greet", vec![]).unwrap(),
        format!("from {winner}")
    );
}

//! hotmod Testing Framework
//!
//! Fixtures and observers for exercising the hot reload pipeline against
//! real files, real watchers and real loaders.

pub mod recorder;

pub use fixtures::{ArtifactDir, greeter_manifest};
pub use recorder::{NoticeRecorder, RecordedNotice};

use std::sync::Once;
use std::time::{Duration, Instant};

static TRACING: Once = Once::new();

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Assert that a [`NoticeRecorder`] saw exactly `n` notifications
#[macro_export]
macro_rules! assert_notified {
    ($recorder:expr, $n:expr) => {
        assert_eq!(
            $recorder.count(),
            $n,
            "expected {} reload notification(s), got {:?}",
            $n,
            $recorder.history()
        );
    };
}

use crossbeam_channel::{Receiver, Sender};
use hotmod_kernel::{ModuleFilter, ReloadDispatcher, ReloadNotice, SubscriptionHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One observed notification, reduced to comparable parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotice {
    pub module: String,
    pub previous: Option<u64>,
    pub current: u64,
}

impl From<&ReloadNotice> for RecordedNotice {
    fn from(notice: &ReloadNotice) -> Self {
        Self {
            module: notice.module.to_string(),
            previous: notice.previous.as_ref().map(|u| u.version()),
            current: notice.current.version(),
        }
    }
}

/// A subscriber that records every notification it receives
///
/// Notifications are kept in arrival order and also forwarded to a channel
/// so tests can block with a timeout until the next one lands.
pub struct NoticeRecorder {
    history: Arc<Mutex<Vec<ReloadNotice>>>,
    rx: Receiver<RecordedNotice>,
    handle: Option<SubscriptionHandle>,
}

impl NoticeRecorder {
    /// Subscribe to `filter` on `dispatcher`
    pub fn attach(dispatcher: &ReloadDispatcher, filter: impl Into<ModuleFilter>) -> Self {
        let history = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx): (Sender<RecordedNotice>, _) = crossbeam_channel::unbounded();
        let sink = history.clone();
        let handle = dispatcher.subscribe(filter, move |notice: &ReloadNotice| {
            sink.lock().push(notice.clone());
            let _ = tx.send(RecordedNotice::from(notice));
            Ok(())
        });
        Self {
            history,
            rx,
            handle: Some(handle),
        }
    }

    /// Wait up to `timeout` for the next notification
    pub fn next(&self, timeout: Duration) -> Option<RecordedNotice> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// True when no notification arrives within `window`
    pub fn stays_quiet(&self, window: Duration) -> bool {
        self.rx.recv_timeout(window).is_err()
    }

    /// Full notices received so far, including the units they carry
    pub fn notices(&self) -> Vec<ReloadNotice> {
        self.history.lock().clone()
    }

    pub fn history(&self) -> Vec<RecordedNotice> {
        self.history.lock().iter().map(RecordedNotice::from).collect()
    }

    pub fn count(&self) -> usize {
        self.history.lock().len()
    }

    /// Stop recording; returns false when already detached
    pub fn detach(&mut self, dispatcher: &ReloadDispatcher) -> bool {
        match self.handle.take() {
            Some(handle) => dispatcher.unsubscribe(handle),
            None => false,
        }
    }
}

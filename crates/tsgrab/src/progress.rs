use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressUpdate {
    /// 0 to 100.
    pub percent: u8,
    pub downloaded: usize,
    pub total: usize,
    pub status: Option<ProgressStatus>,
}

type Observer = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Handle returned by [ProgressTracker::register].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
struct ProgressState {
    update: ProgressUpdate,
    observers: Vec<(ObserverId, Observer)>,
    next_id: u64,
}

impl ProgressState {
    fn notify(&self) {
        for (_, observer) in &self.observers {
            observer(self.update);
        }
    }
}

/// Session progress shared between the worker pool, the writer and any number
/// of observers.
///
/// Observers run while the internal lock is held, so every observer sees
/// updates in order. They must not call back into the tracker.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    state: Arc<Mutex<ProgressState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = ObserverId(state.next_id);
        state.next_id += 1;
        state.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove an observer. Returns false if it was already gone.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut state = self.lock();
        let before = state.observers.len();
        state.observers.retain(|(observer, _)| *observer != id);
        state.observers.len() != before
    }

    /// Start a new session of `total` segments.
    pub fn set_total(&self, total: usize) {
        let mut state = self.lock();
        state.update = ProgressUpdate {
            total,
            ..Default::default()
        };
        state.notify();
    }

    /// Record one more finished segment.
    pub fn increment(&self) {
        let mut state = self.lock();
        let update = &mut state.update;
        update.downloaded = (update.downloaded + 1).min(update.total);
        let percent = if update.total == 0 {
            0
        } else {
            (update.downloaded * 100 / update.total) as u8
        };
        update.percent = update.percent.max(percent);
        state.notify();
    }

    /// Tell observers the session failed. The percentage is left untouched.
    pub fn report_error(&self) {
        let mut state = self.lock();
        state.update.status = Some(ProgressStatus::Error);
        state.notify();
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.update = ProgressUpdate::default();
        state.notify();
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        self.lock().update
    }
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ProgressTracker")
            .field("update", &state.update)
            .field("observers", &state.observers.len())
            .finish()
    }
}

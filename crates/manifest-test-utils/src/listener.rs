//! [`RecordingListener`]: records engine events in order.

use std::sync::Mutex;

use manifest_core::{ChangeListener, Problem, ProblemKind, Snapshot};

/// One recorded engine event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Reloaded(u64),
    Error(ProblemKind, String),
}

#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Recorded problems as `(kind, message)` pairs
    pub fn errors(&self) -> Vec<(ProblemKind, String)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Error(kind, message) => Some((*kind, message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Generations reported as published, in order
    pub fn reloads(&self) -> Vec<u64> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                Event::Reloaded(generation) => Some(*generation),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChangeListener for RecordingListener {
    fn on_start_reload(&self) {
        self.lock().push(Event::Start);
    }

    fn on_reloaded(&self, snapshot: &Snapshot) {
        self.lock().push(Event::Reloaded(snapshot.generation));
    }

    fn on_error(&self, problem: &Problem) {
        self.lock().push(Event::Error(problem.kind, problem.message()));
    }
}

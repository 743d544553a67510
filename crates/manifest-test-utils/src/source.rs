//! [`MemorySource`]: an in-memory [`SourceLoader`] for engine tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use manifest_core::{Error, Result, SourceData, SourceLoader};

#[derive(Debug, Clone)]
enum Entry {
    Data(SourceData),
    NetworkFailure(String),
}

/// Manifests served from memory.
///
/// Every request is counted per URI. Individual URIs can be slowed down or
/// made to fail, which is enough to drive staleness and error scenarios.
///
/// # Example
///
/// ```rust,no_run
/// use manifest_test_utils::MemorySource;
///
/// let source = MemorySource::new()
///     .with("/root.yaml", "imports: [a.yaml]\n")
///     .with("/a.yaml", "title: A\n");
/// assert_eq!(source.requests("/root.yaml"), 0);
/// ```
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: Mutex<HashMap<String, Entry>>,
    delays: Mutex<HashMap<String, Duration>>,
    counts: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(self, uri: &str, body: &str) -> Self {
        self.set(uri, body);
        self
    }

    /// Serve `body` as text for `uri`, replacing whatever was there.
    pub fn set(&self, uri: &str, body: &str) {
        self.put(uri, Entry::Data(SourceData::text(body)));
    }

    /// Serve an already structured document for `uri`.
    pub fn set_value(&self, uri: &str, value: serde_json::Value) {
        self.put(uri, Entry::Data(SourceData::Structured(value)));
    }

    /// Serve an empty resource for `uri`.
    pub fn set_empty(&self, uri: &str) {
        self.put(uri, Entry::Data(SourceData::Empty));
    }

    /// Make requests for `uri` fail with a network error.
    pub fn fail(&self, uri: &str, reason: &str) {
        self.put(uri, Entry::NetworkFailure(reason.to_string()));
    }

    /// Stop serving `uri`; requests then fail with "not found".
    pub fn remove(&self, uri: &str) {
        lock(&self.entries).remove(uri);
    }

    /// Delay every response for `uri`.
    pub fn delay(&self, uri: &str, delay: Duration) {
        lock(&self.delays).insert(uri.to_string(), delay);
    }

    pub fn clear_delay(&self, uri: &str) {
        lock(&self.delays).remove(uri);
    }

    /// How many times `uri` was requested.
    pub fn requests(&self, uri: &str) -> usize {
        lock(&self.counts).get(uri).copied().unwrap_or(0)
    }

    /// Requests across all URIs.
    pub fn total_requests(&self) -> usize {
        lock(&self.counts).values().sum()
    }

    pub fn reset_counts(&self) {
        lock(&self.counts).clear();
        self.max_in_flight.store(0, Ordering::SeqCst);
    }

    /// Highest number of requests that were pending at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn put(&self, uri: &str, entry: Entry) {
        lock(&self.entries).insert(uri.to_string(), entry);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SourceLoader for MemorySource {
    async fn request(&self, uri: &str, _base: Option<&str>) -> Result<SourceData> {
        *lock(&self.counts).entry(uri.to_string()).or_default() += 1;
        let entry = lock(&self.entries).get(uri).cloned();
        let delay = lock(&self.delays).get(uri).copied();

        let pending = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(pending, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match entry {
            Some(Entry::Data(data)) => Ok(data),
            Some(Entry::NetworkFailure(reason)) => Err(Error::Network {
                uri: uri.to_string(),
                reason,
            }),
            None => Err(Error::NotFound {
                uri: uri.to_string(),
            }),
        }
    }
}

//! Background preload scheduler
//!
//! A single worker task drains a deduplicated queue of display-tier fetches,
//! one at a time, pausing for a short cooldown between entries so background
//! upgrades never compete with interactive loads for bandwidth.
//!
//! Success marks the ledger at `display`; failures are dropped without retry.

use crate::config::PreloadConfig;
use crate::fetch::ImageFetcher;
use crate::ledger::QualityLedger;
use crate::photo::{PhotoId, Tier};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// A queued background fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadEntry {
    pub photo_id: PhotoId,
    pub url: String,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<PreloadEntry>,
    /// Ids present in `entries`
    pending: HashSet<PhotoId>,
    in_flight: Option<PhotoId>,
}

impl QueueState {
    fn is_pending(&self, id: &PhotoId) -> bool {
        self.pending.contains(id) || self.in_flight.as_ref() == Some(id)
    }
}

struct SchedulerInner {
    ledger: QualityLedger,
    fetcher: Arc<dyn ImageFetcher>,
    config: PreloadConfig,
    queue: Mutex<QueueState>,
    wake: Arc<Notify>,
    busy: watch::Sender<bool>,
    shutdown: CancellationToken,
}

/// Handle to the preload queue; clones share one queue and one worker
#[derive(Clone)]
pub struct PreloadScheduler {
    inner: Arc<SchedulerInner>,
}

impl PreloadScheduler {
    /// Create the scheduler and spawn its worker.
    ///
    /// Must be called from within a Tokio runtime. The worker stops once
    /// every handle has been dropped.
    pub fn new(ledger: QualityLedger, fetcher: Arc<dyn ImageFetcher>, config: PreloadConfig) -> Self {
        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let (busy, _) = watch::channel(false);

        let inner = Arc::new(SchedulerInner {
            ledger,
            fetcher,
            config,
            queue: Mutex::new(QueueState::default()),
            wake: wake.clone(),
            busy,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_worker(Arc::downgrade(&inner), wake, shutdown));
        Self { inner }
    }

    /// Append a display-tier fetch for `id`.
    ///
    /// No-op (returns false) when preloading is disabled, the photo already
    /// has high quality, or it is already queued or in flight.
    pub fn queue_preload(&self, id: &PhotoId, url: impl Into<String>) -> bool {
        if !self.inner.config.enabled || self.inner.ledger.has_high_quality(id) {
            return false;
        }

        {
            let mut queue = self.inner.queue.lock();
            if queue.is_pending(id) {
                return false;
            }
            queue.pending.insert(id.clone());
            queue.entries.push_back(PreloadEntry { photo_id: id.clone(), url: url.into() });
            self.inner.busy.send_replace(true);
        }

        trace!(photo = %id, "Preload queued");
        self.inner.wake.notify_one();
        true
    }

    /// Put `id` at the head of the queue.
    ///
    /// An already queued entry is moved rather than duplicated; an entry
    /// already in flight is left alone. Never interrupts the active fetch.
    pub fn priority_preload(&self, id: &PhotoId, url: impl Into<String>) {
        if !self.inner.config.enabled || self.inner.ledger.has_high_quality(id) {
            return;
        }

        {
            let mut queue = self.inner.queue.lock();
            if let Some(pos) = queue.entries.iter().position(|e| &e.photo_id == id) {
                if pos > 0 {
                    if let Some(entry) = queue.entries.remove(pos) {
                        queue.entries.push_front(entry);
                    }
                }
            } else if !queue.is_pending(id) {
                queue.pending.insert(id.clone());
                queue.entries.push_front(PreloadEntry { photo_id: id.clone(), url: url.into() });
                self.inner.busy.send_replace(true);
            }
        }

        trace!(photo = %id, "Priority preload");
        self.inner.wake.notify_one();
    }

    /// Entries waiting to be fetched (the active fetch not included)
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().entries.len()
    }

    /// Snapshot of the waiting entries, head first
    pub fn queued(&self) -> Vec<PreloadEntry> {
        self.inner.queue.lock().entries.iter().cloned().collect()
    }

    pub fn in_flight(&self) -> Option<PhotoId> {
        self.inner.queue.lock().in_flight.clone()
    }

    /// Resolves once the queue is empty and nothing is in flight
    pub async fn wait_idle(&self) {
        let mut busy = self.inner.busy.subscribe();
        // the sender lives in `inner`, which `self` keeps alive
        let _ = busy.wait_for(|busy| !*busy).await;
    }
}

impl fmt::Debug for PreloadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.inner.queue.lock();
        f.debug_struct("PreloadScheduler")
            .field("queued", &queue.entries.len())
            .field("in_flight", &queue.in_flight)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl SchedulerInner {
    /// Process entries head-first until the queue is empty
    async fn drain(&self) {
        loop {
            let entry = {
                let mut queue = self.queue.lock();
                match queue.entries.pop_front() {
                    Some(entry) => {
                        queue.pending.remove(&entry.photo_id);
                        queue.in_flight = Some(entry.photo_id.clone());
                        entry
                    }
                    None => {
                        self.busy.send_replace(false);
                        return;
                    }
                }
            };

            match self.fetcher.load(&entry.url).await {
                Ok(_) => {
                    self.ledger.mark_loaded(&entry.photo_id, Tier::Display);
                    debug!(photo = %entry.photo_id, "Preloaded display tier");
                }
                Err(e) => {
                    debug!(photo = %entry.photo_id, error = %e, "Preload failed, dropped");
                }
            }
            self.queue.lock().in_flight = None;

            tokio::time::sleep(self.config.cooldown()).await;
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_worker(inner: Weak<SchedulerInner>, wake: Arc<Notify>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = wake.notified() => {}
        }
        let Some(inner) = inner.upgrade() else { break };
        inner.drain().await;
    }
    debug!("Preload worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;
    use std::time::Duration;

    fn id(s: &str) -> PhotoId {
        PhotoId::new(s)
    }

    fn url(s: &str) -> String {
        format!("http://cdn/{}/display.webp", s)
    }

    fn scheduler(fetcher: Arc<MockFetcher>) -> (QualityLedger, PreloadScheduler) {
        let ledger = QualityLedger::new();
        let scheduler = PreloadScheduler::new(ledger.clone(), fetcher, PreloadConfig::default());
        (ledger, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_fetch_in_flight_fifo() {
        let fetcher = MockFetcher::with_delay(Duration::from_millis(50));
        let (ledger, scheduler) = scheduler(fetcher.clone());

        for name in ["a", "b", "c", "d"] {
            assert!(scheduler.queue_preload(&id(name), url(name)));
        }
        scheduler.wait_idle().await;

        assert_eq!(fetcher.max_in_flight(), 1);
        assert_eq!(fetcher.calls(), vec![url("a"), url("b"), url("c"), url("d")]);
        for name in ["a", "b", "c", "d"] {
            assert_eq!(ledger.loaded_quality(&id(name)), Some(Tier::Display));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_dedups_pending() {
        let fetcher = MockFetcher::new();
        let gate = fetcher.gate(&url("a"));
        let (_ledger, scheduler) = scheduler(fetcher.clone());

        assert!(scheduler.queue_preload(&id("a"), url("a")));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(scheduler.in_flight(), Some(id("a")));

        assert!(scheduler.queue_preload(&id("b"), url("b")));
        assert!(!scheduler.queue_preload(&id("b"), url("b")));
        assert!(!scheduler.queue_preload(&id("a"), url("a")));
        assert_eq!(scheduler.queue_len(), 1);

        gate.notify_one();
        scheduler.wait_idle().await;
        assert_eq!(fetcher.call_count(&url("b")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_photos_with_high_quality() {
        let fetcher = MockFetcher::new();
        let (ledger, scheduler) = scheduler(fetcher.clone());
        ledger.mark_loaded(&id("a"), Tier::Original);

        assert!(!scheduler.queue_preload(&id("a"), url("a")));
        scheduler.priority_preload(&id("a"), url("a"));
        scheduler.wait_idle().await;
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_jumps_queue_without_interrupting() {
        let fetcher = MockFetcher::new();
        let gate = fetcher.gate(&url("a"));
        let (_ledger, scheduler) = scheduler(fetcher.clone());

        scheduler.queue_preload(&id("a"), url("a"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.queue_preload(&id("b"), url("b"));
        scheduler.queue_preload(&id("c"), url("c"));

        scheduler.priority_preload(&id("c"), url("c"));
        assert_eq!(scheduler.queue_len(), 2);
        scheduler.priority_preload(&id("d"), url("d"));
        scheduler.priority_preload(&id("a"), url("a"));
        assert_eq!(scheduler.queue_len(), 3);
        assert_eq!(scheduler.in_flight(), Some(id("a")));

        let order: Vec<_> = scheduler.queued().into_iter().map(|e| e.photo_id).collect();
        assert_eq!(order, vec![id("d"), id("c"), id("b")]);

        gate.notify_one();
        scheduler.wait_idle().await;
        assert_eq!(fetcher.calls(), vec![url("a"), url("d"), url("c"), url("b")]);
        assert_eq!(fetcher.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_dropped_and_processing_continues() {
        let fetcher = MockFetcher::new();
        fetcher.fail(&url("b"));
        let (ledger, scheduler) = scheduler(fetcher.clone());

        for name in ["a", "b", "c"] {
            scheduler.queue_preload(&id(name), url(name));
        }
        scheduler.wait_idle().await;

        assert_eq!(ledger.loaded_quality(&id("a")), Some(Tier::Display));
        assert_eq!(ledger.loaded_quality(&id("b")), None);
        assert_eq!(ledger.loaded_quality(&id("c")), Some(Tier::Display));
        assert_eq!(fetcher.call_count(&url("b")), 1);

        // dropped, not pending: it may be queued again
        assert!(scheduler.queue_preload(&id("b"), url("b")));
        scheduler.wait_idle().await;
        assert_eq!(fetcher.call_count(&url("b")), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_between_fetches() {
        let fetcher = MockFetcher::new();
        let (_ledger, scheduler) = scheduler(fetcher.clone());

        let start = tokio::time::Instant::now();
        for name in ["a", "b", "c"] {
            scheduler.queue_preload(&id(name), url(name));
        }
        scheduler.wait_idle().await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_scheduler_ignores_requests() {
        let fetcher = MockFetcher::new();
        let config = PreloadConfig { enabled: false, ..PreloadConfig::default() };
        let scheduler = PreloadScheduler::new(QualityLedger::new(), fetcher.clone(), config);

        assert!(!scheduler.queue_preload(&id("a"), url("a")));
        scheduler.priority_preload(&id("b"), url("b"));
        scheduler.wait_idle().await;
        assert_eq!(scheduler.queue_len(), 0);
        assert!(fetcher.calls().is_empty());
    }
}

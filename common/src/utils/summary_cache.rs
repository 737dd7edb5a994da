use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::Notify;
use tracing::debug;

/// Terminal and in-flight states of a per-URL summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryStatus {
    Generating,
    Completed { summary: String },
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct SummaryCacheEntry {
    pub status: SummaryStatus,
    pub created_at: Instant,
}

struct CacheSlot {
    entry: SummaryCacheEntry,
    notify: Arc<Notify>,
}

/// Outcome of [`SummaryCache::begin`].
pub enum BeginOutcome {
    /// The caller owns generation for this URL and must call
    /// `complete` or `fail` exactly once.
    Started,
    /// Another task is generating; await the handle then re-read.
    AlreadyGenerating(Arc<Notify>),
    /// A fresh completed summary exists.
    Cached(String),
}

/// Process-local monitor map coalescing concurrent summary work per URL.
/// A single mutex guards the whole map; every transition happens under it,
/// so at most one `Generating` entry exists per URL at any instant.
pub struct SummaryCache {
    ttl: Duration,
    inner: Mutex<HashMap<String, CacheSlot>>,
}

impl SummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, entry: &SummaryCacheEntry) -> bool {
        entry.created_at.elapsed() > self.ttl
    }

    /// Atomic check-and-set entry point for generation.
    pub fn begin(&self, url: &str) -> BeginOutcome {
        #[allow(clippy::unwrap_used)]
        let mut map = self.inner.lock().unwrap();

        if let Some(slot) = map.get(url) {
            if !self.is_expired(&slot.entry) {
                match &slot.entry.status {
                    SummaryStatus::Completed { summary } => {
                        return BeginOutcome::Cached(summary.clone());
                    }
                    SummaryStatus::Generating => {
                        return BeginOutcome::AlreadyGenerating(Arc::clone(&slot.notify));
                    }
                    // A failed entry is restartable
                    SummaryStatus::Failed { .. } => {}
                }
            }
        }

        map.insert(
            url.to_string(),
            CacheSlot {
                entry: SummaryCacheEntry {
                    status: SummaryStatus::Generating,
                    created_at: Instant::now(),
                },
                notify: Arc::new(Notify::new()),
            },
        );
        debug!(url, "summary generation started");

        BeginOutcome::Started
    }

    pub fn complete(&self, url: &str, summary: String) {
        self.finish(url, SummaryStatus::Completed { summary });
    }

    pub fn fail(&self, url: &str, error: String) {
        self.finish(url, SummaryStatus::Failed { error });
    }

    fn finish(&self, url: &str, status: SummaryStatus) {
        #[allow(clippy::unwrap_used)]
        let mut map = self.inner.lock().unwrap();

        if let Some(slot) = map.get_mut(url) {
            slot.entry = SummaryCacheEntry {
                status,
                created_at: Instant::now(),
            };
            slot.notify.notify_waiters();
        }
    }

    /// Current entry for a URL; expired entries are evicted on access.
    pub fn get(&self, url: &str) -> Option<SummaryCacheEntry> {
        #[allow(clippy::unwrap_used)]
        let mut map = self.inner.lock().unwrap();

        match map.get(url) {
            Some(slot) if self.is_expired(&slot.entry) => {
                map.remove(url);
                None
            }
            Some(slot) => Some(slot.entry.clone()),
            None => None,
        }
    }

    /// Waits until the URL reaches a terminal state (or the entry vanishes).
    pub async fn await_terminal(&self, url: &str) -> Option<SummaryCacheEntry> {
        loop {
            let notify = {
                #[allow(clippy::unwrap_used)]
                let map = self.inner.lock().unwrap();
                match map.get(url) {
                    Some(slot) if matches!(slot.entry.status, SummaryStatus::Generating) => {
                        Some(Arc::clone(&slot.notify))
                    }
                    _ => None,
                }
            };

            match notify {
                Some(notify) => notify.notified().await,
                None => return self.get(url),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> SummaryCache {
        SummaryCache::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_begin_then_complete_then_cached() {
        let cache = cache();

        assert!(matches!(cache.begin("https://a"), BeginOutcome::Started));
        cache.complete("https://a", "the summary".into());

        match cache.begin("https://a") {
            BeginOutcome::Cached(summary) => assert_eq!(summary, "the summary"),
            _ => panic!("Expected cached outcome"),
        }

        let entry = cache.get("https://a").expect("entry present");
        assert!(matches!(entry.status, SummaryStatus::Completed { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_begin_coalesces() {
        let cache = cache();

        assert!(matches!(cache.begin("https://a"), BeginOutcome::Started));
        assert!(matches!(
            cache.begin("https://a"),
            BeginOutcome::AlreadyGenerating(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_entry_is_restartable() {
        let cache = cache();

        assert!(matches!(cache.begin("https://a"), BeginOutcome::Started));
        cache.fail("https://a", "fetch failed".into());

        let entry = cache.get("https://a").expect("entry present");
        assert!(matches!(entry.status, SummaryStatus::Failed { .. }));

        assert!(matches!(cache.begin("https://a"), BeginOutcome::Started));
    }

    #[tokio::test]
    async fn test_expired_entries_evicted_on_access() {
        let cache = SummaryCache::new(Duration::from_millis(20));

        assert!(matches!(cache.begin("https://a"), BeginOutcome::Started));
        cache.complete("https://a", "summary".into());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("https://a").is_none(), "expired entry must vanish");
        assert!(
            matches!(cache.begin("https://a"), BeginOutcome::Started),
            "begin after expiry must restart generation"
        );
    }

    #[tokio::test]
    async fn test_await_terminal_wakes_on_completion() {
        let cache = Arc::new(cache());

        assert!(matches!(cache.begin("https://a"), BeginOutcome::Started));

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.await_terminal("https://a").await })
        };

        // Give the waiter a chance to register
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.complete("https://a", "done".into());

        let entry = waiter.await.expect("join").expect("entry");
        assert_eq!(
            entry.status,
            SummaryStatus::Completed {
                summary: "done".into()
            }
        );
    }

    #[tokio::test]
    async fn test_get_unknown_url_is_none() {
        let cache = cache();
        assert!(cache.get("https://missing").is_none());
    }
}

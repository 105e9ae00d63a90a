//! Shared snapshot of site content, refreshed in the background.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::site::loader::ContentSource;
use crate::site::SiteContent;

/// Latest site snapshot. Readers get an `Arc` to a complete snapshot; the
/// refresher swaps in a new one whole.
pub struct SiteCache {
    current: RwLock<Arc<SiteContent>>,
}

impl SiteCache {
    pub fn new(initial: SiteContent) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn snapshot(&self) -> Arc<SiteContent> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, content: SiteContent) {
        let content = Arc::new(content);
        match self.current.write() {
            Ok(mut guard) => *guard = content,
            Err(poisoned) => *poisoned.into_inner() = content,
        }
    }
}

/// Reload the cache from `source` every `interval`, starting immediately.
pub fn spawn_refresher<S>(source: S, cache: Arc<SiteCache>, interval: Duration) -> JoinHandle<()>
where
    S: ContentSource + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let previous = cache.snapshot();
            let fresh = source.load(&previous).await;
            cache.replace(fresh);
            info!("Next site refresh in {}s", interval.as_secs());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{Page, PageSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts loads and writes the count into every page.
    struct CountingSource {
        loads: Arc<AtomicUsize>,
    }

    impl ContentSource for CountingSource {
        async fn load(&self, previous: &SiteContent) -> SiteContent {
            let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            SiteContent {
                pages: previous
                    .pages
                    .iter()
                    .map(|p| Page {
                        name: p.name.clone(),
                        text: format!("load {n}"),
                    })
                    .collect(),
                refreshed_at: Some(chrono::Utc::now()),
            }
        }
    }

    #[test]
    fn test_replace_swaps_whole_snapshot() {
        let cache = SiteCache::new(SiteContent::empty(&[PageSpec::new("Цены", "/prices")]));
        let before = cache.snapshot();

        let mut next = SiteContent::empty(&[PageSpec::new("Цены", "/prices")]);
        next.pages[0].text = "5000 руб.".into();
        cache.replace(next);

        assert_eq!(before.get("Цены"), Some(""));
        assert_eq!(cache.snapshot().get("Цены"), Some("5000 руб."));
    }

    #[tokio::test]
    async fn test_refresher_loads_immediately_and_repeats() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(SiteCache::new(SiteContent::empty(&[PageSpec::new("Цены", "/")])));

        let handle = spawn_refresher(
            CountingSource { loads: loads.clone() },
            cache.clone(),
            Duration::from_millis(40),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.snapshot().get("Цены"), Some("load 1"));

        tokio::time::sleep(Duration::from_millis(140)).await;
        assert!(loads.load(Ordering::SeqCst) >= 3);
        assert!(cache.snapshot().refreshed_at.is_some());

        handle.abort();
    }

    #[tokio::test]
    async fn test_readers_keep_old_snapshot_during_refresh() {
        let cache = Arc::new(SiteCache::new(SiteContent::empty(&[PageSpec::new("Цены", "/")])));
        let held = cache.snapshot();

        let handle = spawn_refresher(
            CountingSource { loads: Arc::new(AtomicUsize::new(0)) },
            cache.clone(),
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(held.get("Цены"), Some(""));
        assert_eq!(cache.snapshot().get("Цены"), Some("load 1"));
        handle.abort();
    }
}

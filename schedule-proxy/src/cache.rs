use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub struct Config {
    pub enabled: bool,
    pub ttl: Duration,
}

struct Page {
    fetched_at: Instant,
    html: Arc<String>,
}

/// Listing pages by URL, served until they are `ttl` old.
///
/// Stale pages are dropped whenever a new one is stored.
pub struct PageCache {
    enabled: bool,
    ttl: Duration,
    pages: RwLock<HashMap<Url, Page>>,
}

impl PageCache {
    pub fn new(config: Config) -> Self {
        Self {
            enabled: config.enabled,
            ttl: config.ttl,
            pages: RwLock::default(),
        }
    }

    pub async fn get(&self, url: &Url) -> Option<Arc<String>> {
        if !self.enabled {
            return None;
        }

        let pages = self.pages.read().await;
        let page = pages.get(url)?;
        (page.fetched_at.elapsed() < self.ttl).then(|| Arc::clone(&page.html))
    }

    /// Stores `html` as the current copy of `url` and hands it back shared.
    pub async fn insert(&self, url: Url, html: String) -> Arc<String> {
        let html = Arc::new(html);
        if !self.enabled {
            return html;
        }

        let mut pages = self.pages.write().await;

        let before = pages.len();
        pages.retain(|_, page| page.fetched_at.elapsed() < self.ttl);
        if pages.len() < before {
            debug!("Dropped {} stale pages", before - pages.len());
        }

        pages.insert(
            url,
            Page {
                fetched_at: Instant::now(),
                html: Arc::clone(&html),
            },
        );

        html
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn cache(ttl: Duration) -> PageCache {
        PageCache::new(Config { enabled: true, ttl })
    }

    fn url(path: &str) -> Url {
        Url::parse("https://conf.example/").unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_cache_stores_nothing() {
        let cache = PageCache::new(Config {
            enabled: false,
            ttl: Duration::from_secs(60),
        });

        let html = cache.insert(url("program"), "<p>".into()).await;
        assert_eq!(html.as_str(), "<p>");
        assert_eq!(cache.get(&url("program")).await, None);
    }

    #[tokio::test]
    async fn test_pages_expire() {
        let cache = cache(Duration::from_millis(50));

        cache.insert(url("program"), "<p>".into()).await;
        assert_eq!(cache.get(&url("program")).await.as_deref().map(String::as_str), Some("<p>"));

        sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get(&url("program")).await, None);
    }

    #[tokio::test]
    async fn test_refetch_restarts_ttl() {
        let cache = cache(Duration::from_millis(400));

        cache.insert(url("program"), "first".into()).await;
        sleep(Duration::from_millis(250)).await;
        cache.insert(url("program"), "second".into()).await;
        sleep(Duration::from_millis(250)).await;

        let html = cache.get(&url("program")).await.unwrap();
        assert_eq!(html.as_str(), "second");
    }

    #[tokio::test]
    async fn test_stale_pages_are_dropped_on_insert() {
        let cache = cache(Duration::from_millis(50));

        cache.insert(url("day-1"), "1".into()).await;
        cache.insert(url("day-2"), "2".into()).await;
        sleep(Duration::from_millis(120)).await;
        cache.insert(url("day-3"), "3".into()).await;

        let pages = cache.pages.read().await;
        assert_eq!(pages.len(), 1);
        assert!(pages.contains_key(&url("day-3")));
    }
}

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::driver::traits::DeviceControl;
use crate::driver::uiautomator::{self, UiElement};
use crate::error::EngineError;

/// Short-lived cache of the last accessibility dump.
///
/// Polling loops invalidate before every attempt; the cache carries one dump
/// across the match pass and the interstitial check of a single attempt, and
/// across adjacent steps landing within the TTL. Executions are serialized,
/// so an entry is never shared across actions.
pub struct SnapshotCache {
    entry: Mutex<Option<(Instant, String)>>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Mutex::new(None),
            ttl,
        }
    }

    /// Drop the cached dump. Called after any operation that could change
    /// the screen.
    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
    }

    /// Raw dump XML, from cache if still fresh.
    pub async fn xml(&self, device: &dyn DeviceControl) -> Result<String, EngineError> {
        {
            let entry = self.entry.lock().await;
            if let Some((captured_at, xml)) = &*entry {
                if captured_at.elapsed() < self.ttl {
                    return Ok(xml.clone());
                }
            }
        }

        let xml = device.dump_ui().await?;
        *self.entry.lock().await = Some((Instant::now(), xml.clone()));
        Ok(xml)
    }

    /// Parsed, document-ordered element list for the current screen.
    pub async fn elements(&self, device: &dyn DeviceControl) -> Result<Vec<UiElement>, EngineError> {
        let xml = self.xml(device).await?;
        uiautomator::parse_hierarchy(&xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDevice;
    use std::sync::atomic::Ordering;

    const DUMP: &str =
        r#"<hierarchy><node class="Button" text="ok" bounds="[0,0][10,10]"/></hierarchy>"#;

    #[tokio::test]
    async fn test_cache_reuses_dump_within_ttl() {
        let device = FakeDevice::with_dump(DUMP);
        let cache = SnapshotCache::new(Duration::from_millis(500));

        let first = cache.elements(&device).await.unwrap();
        let second = cache.elements(&device).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(device.dump_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fresh_dump() {
        let device = FakeDevice::with_dump(DUMP);
        let cache = SnapshotCache::new(Duration::from_millis(500));

        cache.elements(&device).await.unwrap();
        cache.invalidate().await;
        cache.elements(&device).await.unwrap();

        assert_eq!(device.dump_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refreshed() {
        let device = FakeDevice::with_dump(DUMP);
        let cache = SnapshotCache::new(Duration::from_millis(20));

        cache.elements(&device).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.elements(&device).await.unwrap();

        assert_eq!(device.dump_count.load(Ordering::SeqCst), 2);
    }
}

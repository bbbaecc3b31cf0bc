//! Time-bounded cache for sandbox tool availability.
//!
//! A probe result is trusted for a fixed interval and then re-checked, so a
//! tool that breaks or gets fixed while the daemon runs is noticed without a
//! restart. A launch failure invalidates an "available" reading immediately.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
struct Reading {
    available: bool,
    checked_at: Instant,
}

/// Cached availability of one external tool.
#[derive(Debug)]
pub struct AvailabilityCache {
    refresh: Duration,
    reading: RwLock<Option<Reading>>,
}

impl AvailabilityCache {
    pub fn new(refresh: Duration) -> Self {
        Self {
            refresh,
            reading: RwLock::new(None),
        }
    }

    /// Return the cached reading if fresh, otherwise run `probe` and cache it.
    ///
    /// Concurrent callers that find the reading stale wait for one probe
    /// instead of each spawning their own.
    pub async fn get_or_probe<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if let Some(available) = self.fresh().await {
            return available;
        }

        let mut reading = self.reading.write().await;
        if let Some(r) = *reading {
            if r.checked_at.elapsed() < self.refresh {
                return r.available;
            }
        }

        let available = probe().await;
        if (*reading).map(|r| r.available) != Some(available) {
            info!(available, "Sandbox availability changed");
        }
        *reading = Some(Reading {
            available,
            checked_at: Instant::now(),
        });
        available
    }

    /// Record that the tool just failed to launch.
    pub async fn mark_unavailable(&self) {
        debug!("Marking sandbox unavailable");
        *self.reading.write().await = Some(Reading {
            available: false,
            checked_at: Instant::now(),
        });
    }

    async fn fresh(&self) -> Option<bool> {
        let reading = (*self.reading.read().await)?;
        (reading.checked_at.elapsed() < self.refresh).then_some(reading.available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn probe_with(cache: &AvailabilityCache, calls: &AtomicUsize, result: bool) -> bool {
        cache
            .get_or_probe(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                result
            })
            .await
    }

    #[tokio::test]
    async fn caches_within_refresh_interval() {
        let cache = AvailabilityCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        assert!(probe_with(&cache, &calls, true).await);
        // A different probe answer is ignored while the reading is fresh
        assert!(probe_with(&cache, &calls, false).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reprobes_after_interval() {
        let cache = AvailabilityCache::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);

        assert!(!probe_with(&cache, &calls, false).await);
        // A stale "unavailable" does not stick once the tool is fixed
        assert!(probe_with(&cache, &calls, true).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mark_unavailable_overrides_fresh_reading() {
        let cache = AvailabilityCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        assert!(probe_with(&cache, &calls, true).await);
        cache.mark_unavailable().await;
        assert!(!probe_with(&cache, &calls, true).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! ResourceMonitor — samples memory and classifies it into a level.

use chrono::Utc;
use cinder_config::ResourceConfig;
use cinder_core::{ResourceLevel, ResourceSnapshot};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::probe::MemoryProbe;

struct Cached {
    snapshot: ResourceSnapshot,
    taken_at: Instant,
}

/// Polls a `MemoryProbe` and caches the last good snapshot.
///
/// The cache is the only shared state and sits behind a single mutex that
/// is never held across an await.
pub struct ResourceMonitor {
    config: Arc<ResourceConfig>,
    probe: Arc<dyn MemoryProbe>,
    cache: Mutex<Option<Cached>>,
}

impl ResourceMonitor {
    pub fn new(config: Arc<ResourceConfig>, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            config,
            probe,
            cache: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Classify an available-memory figure with the configured thresholds.
    pub fn classify(&self, available_gb: f64) -> ResourceLevel {
        self.config.level_for(available_gb)
    }

    /// Take a snapshot, reusing a cached one younger than the TTL.
    ///
    /// Never waits longer than `probe_timeout_ms`. If the probe fails or
    /// times out, the last snapshot is reused (flagged stale); with nothing
    /// cached the level is assumed LOW.
    pub async fn sample(&self) -> ResourceSnapshot {
        let ttl = Duration::from_millis(self.config.snapshot_ttl_ms);
        if let Some(snapshot) = self.fresh_cached(ttl) {
            return snapshot;
        }

        let timeout_ms = self.config.probe_timeout_ms;
        let probe = Arc::clone(&self.probe);
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            tokio::task::spawn_blocking(move || probe.read()),
        )
        .await;

        match outcome {
            Ok(Ok(Ok(reading))) => {
                let snapshot = ResourceSnapshot {
                    available_memory_gb: reading.available_gb,
                    total_memory_gb: reading.total_gb,
                    resource_level: self.classify(reading.available_gb),
                    stale: false,
                    sampled_at: Utc::now(),
                };
                debug!(
                    probe = self.probe.name(),
                    available_gb = reading.available_gb,
                    level = %snapshot.resource_level,
                    "Resource sample"
                );
                self.store(snapshot);
                snapshot
            }
            Ok(Ok(Err(e))) => {
                warn!(probe = self.probe.name(), error = %e, "Memory probe failed");
                self.fallback()
            }
            Ok(Err(e)) => {
                warn!(probe = self.probe.name(), error = %e, "Memory probe task panicked");
                self.fallback()
            }
            Err(_) => {
                warn!(probe = self.probe.name(), timeout_ms, "Memory probe timed out");
                self.fallback()
            }
        }
    }

    /// Last snapshot taken, fresh or not.
    pub fn last_snapshot(&self) -> Option<ResourceSnapshot> {
        self.lock_cache().as_ref().map(|c| c.snapshot)
    }

    /// Drop the cached snapshot so the next `sample` probes again.
    pub fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    fn fresh_cached(&self, ttl: Duration) -> Option<ResourceSnapshot> {
        let cache = self.lock_cache();
        cache
            .as_ref()
            .filter(|c| c.taken_at.elapsed() < ttl)
            .map(|c| c.snapshot)
    }

    fn store(&self, snapshot: ResourceSnapshot) {
        *self.lock_cache() = Some(Cached {
            snapshot,
            taken_at: Instant::now(),
        });
    }

    fn fallback(&self) -> ResourceSnapshot {
        if let Some(previous) = self.last_snapshot() {
            return ResourceSnapshot {
                stale: true,
                ..previous
            };
        }
        ResourceSnapshot {
            available_memory_gb: self.config.low_gb + self.config.safety_margin_gb,
            total_memory_gb: 0.0,
            resource_level: ResourceLevel::Low,
            stale: true,
            sampled_at: Utc::now(),
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<Cached>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{FixedProbe, MemoryReading};
    use cinder_core::error::ResourceError;

    fn config(ttl_ms: u64) -> Arc<ResourceConfig> {
        Arc::new(ResourceConfig {
            safety_margin_gb: 0.0,
            snapshot_ttl_ms: ttl_ms,
            probe_timeout_ms: 50,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        })
    }

    struct FailingProbe;

    impl MemoryProbe for FailingProbe {
        fn name(&self) -> &str {
            "failing"
        }
        fn read(&self) -> Result<MemoryReading, ResourceError> {
            Err(ResourceError::ProbeFailed("boom".into()))
        }
    }

    struct SlowProbe;

    impl MemoryProbe for SlowProbe {
        fn name(&self) -> &str {
            "slow"
        }
        fn read(&self) -> Result<MemoryReading, ResourceError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(MemoryReading {
                available_gb: 4.0,
                total_gb: 8.0,
            })
        }
    }

    #[tokio::test]
    async fn classifies_probe_reading() {
        let monitor = ResourceMonitor::new(config(0), Arc::new(FixedProbe::new(0.15)));
        let snapshot = monitor.sample().await;
        assert_eq!(snapshot.resource_level, ResourceLevel::Critical);
        assert!(!snapshot.stale);
    }

    #[tokio::test]
    async fn zero_ttl_always_probes() {
        let probe = Arc::new(FixedProbe::new(2.0));
        let monitor = ResourceMonitor::new(config(0), probe.clone());
        assert_eq!(monitor.sample().await.resource_level, ResourceLevel::Good);
        probe.set_available(0.3);
        assert_eq!(monitor.sample().await.resource_level, ResourceLevel::Low);
    }

    #[tokio::test]
    async fn cached_snapshot_reused_within_ttl() {
        let probe = Arc::new(FixedProbe::new(2.0));
        let monitor = ResourceMonitor::new(config(60_000), probe.clone());
        monitor.sample().await;
        probe.set_available(0.1);
        assert_eq!(monitor.sample().await.resource_level, ResourceLevel::Good);
        monitor.invalidate();
        assert_eq!(monitor.sample().await.resource_level, ResourceLevel::Critical);
    }

    #[tokio::test]
    async fn failure_without_cache_assumes_low() {
        let monitor = ResourceMonitor::new(config(0), Arc::new(FailingProbe));
        let snapshot = monitor.sample().await;
        assert_eq!(snapshot.resource_level, ResourceLevel::Low);
        assert!(snapshot.stale);
    }

    #[tokio::test]
    async fn slow_probe_times_out_quickly() {
        let monitor = ResourceMonitor::new(config(0), Arc::new(SlowProbe));
        let started = Instant::now();
        let snapshot = monitor.sample().await;
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(snapshot.stale);
    }
}

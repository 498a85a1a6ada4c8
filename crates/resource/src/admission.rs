//! AdmissionController — gates heavy operations.
//!
//! A request is refused outright at CRITICAL, and otherwise needs one of
//! `max_concurrent_heavy_ops` permits. The permit is an RAII guard: it is
//! released exactly once, when dropped, on every exit path.

use cinder_config::{AdmissionPolicy, ResourceConfig};
use cinder_core::{ModelTier, ResourceLevel};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::monitor::ResourceMonitor;

/// What the permit will be spent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Retrieval that computes embeddings
    Retrieval,
    /// Local model inference
    Generation,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Retrieval => f.write_str("retrieval"),
            OperationKind::Generation => f.write_str("generation"),
        }
    }
}

/// Terms attached to an admitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionGrant {
    pub level: ResourceLevel,
    pub tier: ModelTier,
    /// Context window the caller may assemble
    pub context_tokens: usize,
    /// Generation cap the caller must request
    pub generation_tokens: usize,
    /// LOW or MODERATE: the caller runs with reduced budgets
    pub degraded: bool,
}

/// Why admission was refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectionReason {
    CriticalMemory { available_gb: f64 },
    AtCapacity { capacity: usize },
    QueueFull { waiting: usize },
    QueueTimeout { waited_ms: u64 },
    Cooldown { remaining_ms: u64 },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::CriticalMemory { available_gb } => {
                write!(f, "memory critical ({available_gb:.2} GB available)")
            }
            RejectionReason::AtCapacity { capacity } => {
                write!(f, "all {capacity} heavy-operation slots busy")
            }
            RejectionReason::QueueFull { waiting } => write!(f, "admission queue full ({waiting} waiting)"),
            RejectionReason::QueueTimeout { waited_ms } => write!(f, "gave up after waiting {waited_ms}ms"),
            RejectionReason::Cooldown { remaining_ms } => write!(f, "cooling down for another {remaining_ms}ms"),
        }
    }
}

/// A refused admission (the `ResourceExhausted` outcome).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub operation: OperationKind,
    pub level: ResourceLevel,
    pub reason: RejectionReason,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} rejected at {} level: {}", self.operation, self.level, self.reason)
    }
}

/// Counters shared between the controller and its outstanding permits.
#[derive(Default)]
struct Shared {
    active: AtomicUsize,
    waiting: AtomicUsize,
    admitted: AtomicU64,
    rejected_critical: AtomicU64,
    rejected_capacity: AtomicU64,
    rejected_queue: AtomicU64,
    rejected_cooldown: AtomicU64,
    last_release: Mutex<Option<Instant>>,
}

impl Shared {
    fn record_rejection(&self, reason: &RejectionReason) {
        let counter = match reason {
            RejectionReason::CriticalMemory { .. } => &self.rejected_critical,
            RejectionReason::AtCapacity { .. } => &self.rejected_capacity,
            RejectionReason::QueueFull { .. } | RejectionReason::QueueTimeout { .. } => &self.rejected_queue,
            RejectionReason::Cooldown { .. } => &self.rejected_cooldown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn last_release(&self) -> Option<Instant> {
        *self.last_release.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn mark_released(&self) {
        *self.last_release.lock().unwrap_or_else(|p| p.into_inner()) = Some(Instant::now());
    }
}

/// One caller counted in `waiting`. Leaves the queue on drop, including when
/// the admitting future is dropped mid-wait.
struct WaitingGuard<'a> {
    shared: &'a Shared,
}

impl<'a> WaitingGuard<'a> {
    /// Join the queue, returning the queue length including this caller.
    fn enter(shared: &'a Shared) -> (Self, usize) {
        let waiting = shared.waiting.fetch_add(1, Ordering::SeqCst) + 1;
        (Self { shared }, waiting)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.shared.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Permission to run one heavy operation. Released on drop.
pub struct HeavyOperationPermit {
    grant: AdmissionGrant,
    operation: OperationKind,
    acquired_at: Instant,
    shared: Arc<Shared>,
    // Dropped after `Drop::drop` runs, so counters settle before the slot frees.
    _slot: OwnedSemaphorePermit,
}

impl HeavyOperationPermit {
    pub fn grant(&self) -> &AdmissionGrant {
        &self.grant
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Release now. Equivalent to dropping the permit.
    pub fn release(self) {}
}

impl std::fmt::Debug for HeavyOperationPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeavyOperationPermit")
            .field("operation", &self.operation)
            .field("grant", &self.grant)
            .finish()
    }
}

impl Drop for HeavyOperationPermit {
    fn drop(&mut self) {
        self.shared.active.fetch_sub(1, Ordering::SeqCst);
        self.shared.mark_released();
        debug!(
            operation = %self.operation,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Heavy-operation permit released"
        );
    }
}

/// Point-in-time admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStats {
    pub capacity: usize,
    pub active: usize,
    pub waiting: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub rejected_critical: u64,
    pub rejected_capacity: u64,
    pub rejected_queue: u64,
    pub rejected_cooldown: u64,
}

/// Bounded-capacity gate in front of heavy operations.
pub struct AdmissionController {
    config: Arc<ResourceConfig>,
    monitor: Arc<ResourceMonitor>,
    slots: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl AdmissionController {
    pub fn new(config: Arc<ResourceConfig>, monitor: Arc<ResourceMonitor>) -> Self {
        let capacity = config.max_concurrent_heavy_ops.max(1);
        Self {
            config,
            monitor,
            slots: Arc::new(Semaphore::new(capacity)),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.max_concurrent_heavy_ops.max(1)
    }

    /// Ask for a permit.
    ///
    /// CRITICAL rejects immediately and never queues. Otherwise a free slot
    /// is taken at once; when none is free the configured policy decides
    /// between rejecting and a bounded wait.
    pub async fn try_admit(&self, operation: OperationKind) -> Result<HeavyOperationPermit, Rejection> {
        let snapshot = self.monitor.sample().await;
        let level = snapshot.resource_level;

        if level == ResourceLevel::Critical {
            return Err(self.reject(
                operation,
                level,
                RejectionReason::CriticalMemory {
                    available_gb: snapshot.available_memory_gb,
                },
            ));
        }

        if let Some(remaining) = self.cooldown_remaining() {
            return Err(self.reject(
                operation,
                level,
                RejectionReason::Cooldown {
                    remaining_ms: remaining.as_millis() as u64,
                },
            ));
        }

        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(slot) => Ok(self.issue(operation, level, slot)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => match self.config.admission_policy {
                AdmissionPolicy::Reject => Err(self.reject(
                    operation,
                    level,
                    RejectionReason::AtCapacity {
                        capacity: self.capacity(),
                    },
                )),
                AdmissionPolicy::Queue => self.wait_for_slot(operation, level).await,
            },
        }
    }

    async fn wait_for_slot(
        &self,
        operation: OperationKind,
        level: ResourceLevel,
    ) -> Result<HeavyOperationPermit, Rejection> {
        let (guard, waiting) = WaitingGuard::enter(&self.shared);
        if waiting > self.config.max_queue_size {
            drop(guard);
            return Err(self.reject(operation, level, RejectionReason::QueueFull { waiting: waiting - 1 }));
        }

        debug!(operation = %operation, waiting, "Queued for heavy-operation slot");
        let started = Instant::now();
        let max_wait = Duration::from_secs(self.config.queue_timeout_secs);
        let acquired = tokio::time::timeout(max_wait, Arc::clone(&self.slots).acquire_owned()).await;
        drop(guard);

        let slot = match acquired {
            Ok(Ok(slot)) => slot,
            Ok(Err(_)) | Err(_) => {
                return Err(self.reject(
                    operation,
                    level,
                    RejectionReason::QueueTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                    },
                ));
            }
        };

        // Memory may have dropped while we waited.
        let snapshot = self.monitor.sample().await;
        if snapshot.resource_level == ResourceLevel::Critical {
            drop(slot);
            return Err(self.reject(
                operation,
                snapshot.resource_level,
                RejectionReason::CriticalMemory {
                    available_gb: snapshot.available_memory_gb,
                },
            ));
        }
        Ok(self.issue(operation, snapshot.resource_level, slot))
    }

    fn issue(&self, operation: OperationKind, level: ResourceLevel, slot: OwnedSemaphorePermit) -> HeavyOperationPermit {
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        self.shared.admitted.fetch_add(1, Ordering::Relaxed);
        let budget = self.config.budget_for(level);
        let grant = AdmissionGrant {
            level,
            tier: level.model_tier(),
            context_tokens: budget.context_tokens,
            generation_tokens: budget.generation_tokens,
            degraded: level.is_degraded(),
        };
        info!(
            operation = %operation,
            level = %level,
            tier = %grant.tier,
            context_tokens = grant.context_tokens,
            "Admission granted"
        );
        HeavyOperationPermit {
            grant,
            operation,
            acquired_at: Instant::now(),
            shared: Arc::clone(&self.shared),
            _slot: slot,
        }
    }

    fn reject(&self, operation: OperationKind, level: ResourceLevel, reason: RejectionReason) -> Rejection {
        self.shared.record_rejection(&reason);
        warn!(operation = %operation, level = %level, reason = %reason, "Admission rejected");
        Rejection {
            operation,
            level,
            reason,
        }
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        if self.config.cooldown_ms == 0 {
            return None;
        }
        let cooldown = Duration::from_millis(self.config.cooldown_ms);
        let elapsed = self.shared.last_release()?.elapsed();
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }

    pub fn stats(&self) -> AdmissionStats {
        let s = &self.shared;
        let rejected_critical = s.rejected_critical.load(Ordering::Relaxed);
        let rejected_capacity = s.rejected_capacity.load(Ordering::Relaxed);
        let rejected_queue = s.rejected_queue.load(Ordering::Relaxed);
        let rejected_cooldown = s.rejected_cooldown.load(Ordering::Relaxed);
        AdmissionStats {
            capacity: self.capacity(),
            active: s.active.load(Ordering::SeqCst),
            waiting: s.waiting.load(Ordering::SeqCst),
            admitted: s.admitted.load(Ordering::Relaxed),
            rejected: rejected_critical + rejected_capacity + rejected_queue + rejected_cooldown,
            rejected_critical,
            rejected_capacity,
            rejected_queue,
            rejected_cooldown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FixedProbe;

    fn controller_with(config: ResourceConfig, available_gb: f64) -> (AdmissionController, Arc<FixedProbe>) {
        let config = Arc::new(ResourceConfig {
            safety_margin_gb: 0.0,
            snapshot_ttl_ms: 0,
            ..config
        });
        let probe = Arc::new(FixedProbe::new(available_gb));
        let monitor = Arc::new(ResourceMonitor::new(Arc::clone(&config), probe.clone()));
        (AdmissionController::new(config, monitor), probe)
    }

    fn controller(available_gb: f64) -> AdmissionController {
        controller_with(ResourceConfig::with_thresholds(0.2, 0.4, 0.7), available_gb).0
    }

    #[tokio::test]
    async fn critical_rejects_immediately() {
        let c = controller(0.15);
        let err = c.try_admit(OperationKind::Generation).await.unwrap_err();
        assert_eq!(err.level, ResourceLevel::Critical);
        assert!(matches!(err.reason, RejectionReason::CriticalMemory { .. }));
        assert_eq!(c.stats().rejected_critical, 1);
        assert_eq!(c.stats().active, 0);
    }

    #[tokio::test]
    async fn good_level_grants_large_tier() {
        let c = controller(4.0);
        let permit = c.try_admit(OperationKind::Generation).await.unwrap();
        assert_eq!(permit.grant().tier, ModelTier::Large);
        assert!(!permit.grant().degraded);
        assert_eq!(permit.grant().context_tokens, 2000);
    }

    #[tokio::test]
    async fn low_level_grants_reduced_budget() {
        let c = controller(0.3);
        let permit = c.try_admit(OperationKind::Generation).await.unwrap();
        assert_eq!(permit.grant().level, ResourceLevel::Low);
        assert_eq!(permit.grant().tier, ModelTier::Small);
        assert!(permit.grant().degraded);
        assert!(permit.grant().context_tokens < 2000);
    }

    #[tokio::test]
    async fn second_admission_rejected_at_capacity() {
        let c = controller(4.0);
        let first = c.try_admit(OperationKind::Generation).await.unwrap();
        let second = c.try_admit(OperationKind::Retrieval).await.unwrap_err();
        assert!(matches!(second.reason, RejectionReason::AtCapacity { capacity: 1 }));
        drop(first);
        assert!(c.try_admit(OperationKind::Retrieval).await.is_ok());
    }

    #[tokio::test]
    async fn permit_released_exactly_once() {
        let c = controller(4.0);
        {
            let permit = c.try_admit(OperationKind::Generation).await.unwrap();
            assert_eq!(c.stats().active, 1);
            permit.release();
        }
        assert_eq!(c.stats().active, 0);
        assert_eq!(c.stats().admitted, 1);
    }

    #[tokio::test]
    async fn permit_released_on_error_path() {
        let c = controller(4.0);
        async fn failing_work(c: &AdmissionController) -> Result<(), String> {
            let _permit = c.try_admit(OperationKind::Generation).await.map_err(|r| r.to_string())?;
            Err("engine exploded".into())
        }
        assert!(failing_work(&c).await.is_err());
        assert_eq!(c.stats().active, 0);
        assert!(c.try_admit(OperationKind::Generation).await.is_ok());
    }

    #[tokio::test]
    async fn queue_policy_waits_for_release() {
        let config = ResourceConfig {
            admission_policy: AdmissionPolicy::Queue,
            queue_timeout_secs: 5,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        };
        let (c, _) = controller_with(config, 4.0);
        let c = Arc::new(c);
        let first = c.try_admit(OperationKind::Generation).await.unwrap();

        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.try_admit(OperationKind::Generation).await.map(|p| p.grant().level) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.stats().waiting, 1);
        drop(first);
        assert_eq!(waiter.await.unwrap().unwrap(), ResourceLevel::Good);
    }

    #[tokio::test]
    async fn abandoned_waiter_leaves_the_queue() {
        let config = ResourceConfig {
            admission_policy: AdmissionPolicy::Queue,
            max_queue_size: 1,
            queue_timeout_secs: 5,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        };
        let (c, _) = controller_with(config, 4.0);
        let c = Arc::new(c);
        let first = c.try_admit(OperationKind::Generation).await.unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(50), c.try_admit(OperationKind::Generation)).await;
        assert!(abandoned.is_err());
        assert_eq!(c.stats().waiting, 0);

        // The single queue place is free again.
        let waiter = {
            let c = Arc::clone(&c);
            tokio::spawn(async move { c.try_admit(OperationKind::Generation).await.map(|p| p.grant().level) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.stats().waiting, 1);
        drop(first);
        assert_eq!(waiter.await.unwrap().unwrap(), ResourceLevel::Good);
        assert_eq!(c.stats().waiting, 0);
        assert_eq!(c.stats().rejected_queue, 0);
    }

    #[tokio::test]
    async fn queue_full_rejects() {
        let config = ResourceConfig {
            admission_policy: AdmissionPolicy::Queue,
            max_queue_size: 0,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        };
        let (c, _) = controller_with(config, 4.0);
        let _first = c.try_admit(OperationKind::Generation).await.unwrap();
        let err = c.try_admit(OperationKind::Generation).await.unwrap_err();
        assert!(matches!(err.reason, RejectionReason::QueueFull { .. }));
        assert_eq!(c.stats().rejected_queue, 1);
    }

    #[tokio::test]
    async fn critical_never_queues() {
        let config = ResourceConfig {
            admission_policy: AdmissionPolicy::Queue,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        };
        let (c, _) = controller_with(config, 0.1);
        let err = c.try_admit(OperationKind::Generation).await.unwrap_err();
        assert!(matches!(err.reason, RejectionReason::CriticalMemory { .. }));
        assert_eq!(c.stats().waiting, 0);
    }

    #[tokio::test]
    async fn cooldown_blocks_back_to_back_operations() {
        let config = ResourceConfig {
            cooldown_ms: 60_000,
            ..ResourceConfig::with_thresholds(0.2, 0.4, 0.7)
        };
        let (c, _) = controller_with(config, 4.0);
        c.try_admit(OperationKind::Generation).await.unwrap().release();
        let err = c.try_admit(OperationKind::Generation).await.unwrap_err();
        assert!(matches!(err.reason, RejectionReason::Cooldown { .. }));
    }

    #[tokio::test]
    async fn memory_drop_changes_outcome() {
        let (c, probe) = controller_with(ResourceConfig::with_thresholds(0.2, 0.4, 0.7), 4.0);
        c.try_admit(OperationKind::Generation).await.unwrap().release();
        probe.set_available(0.05);
        assert!(c.try_admit(OperationKind::Generation).await.is_err());
        let stats = c.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.rejected, 1);
    }
}

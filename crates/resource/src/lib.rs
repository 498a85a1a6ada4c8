//! Resource monitoring and admission control.
//!
//! Everything here is built once at startup and shared through a
//! [`ResourceContext`]; there is no ambient global state.

pub mod admission;
pub mod monitor;
pub mod probe;

pub use admission::{
    AdmissionController, AdmissionGrant, AdmissionStats, HeavyOperationPermit, OperationKind, Rejection,
    RejectionReason,
};
pub use monitor::ResourceMonitor;
pub use probe::{FixedProbe, MemoryProbe, MemoryReading, ProcMeminfoProbe, parse_meminfo, system_probe};

use cinder_config::ResourceConfig;
use std::sync::Arc;

/// Process-lifetime resource state, passed explicitly to whoever needs it.
#[derive(Clone)]
pub struct ResourceContext {
    pub config: Arc<ResourceConfig>,
    pub monitor: Arc<ResourceMonitor>,
    pub admission: Arc<AdmissionController>,
}

impl ResourceContext {
    pub fn new(config: ResourceConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let config = Arc::new(config);
        let monitor = Arc::new(ResourceMonitor::new(Arc::clone(&config), probe));
        let admission = Arc::new(AdmissionController::new(Arc::clone(&config), Arc::clone(&monitor)));
        Self {
            config,
            monitor,
            admission,
        }
    }

    /// Context backed by the platform memory probe.
    pub fn from_system(config: ResourceConfig) -> Self {
        Self::new(config, system_probe())
    }
}

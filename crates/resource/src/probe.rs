//! Memory probes — where available-memory readings come from.
//!
//! Probes are synchronous; the monitor runs them on a blocking thread
//! under a timeout so a slow OS query never stalls request handling.

use cinder_core::error::ResourceError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const KB_PER_GB: f64 = 1024.0 * 1024.0;

/// A raw memory reading in GB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub available_gb: f64,
    pub total_gb: f64,
}

/// Something that can report available memory.
pub trait MemoryProbe: Send + Sync {
    fn name(&self) -> &str;

    fn read(&self) -> Result<MemoryReading, ResourceError>;
}

/// Reads `MemAvailable` / `MemTotal` from `/proc/meminfo`.
pub struct ProcMeminfoProbe {
    path: PathBuf,
}

impl ProcMeminfoProbe {
    pub fn new() -> Self {
        Self::with_path("/proc/meminfo")
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMeminfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcMeminfoProbe {
    fn name(&self) -> &str {
        "proc_meminfo"
    }

    fn read(&self) -> Result<MemoryReading, ResourceError> {
        read_meminfo(&self.path)
    }
}

fn read_meminfo(path: &Path) -> Result<MemoryReading, ResourceError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ResourceError::Unsupported(format!("{} not found", path.display()))
        } else {
            ResourceError::ProbeFailed(format!("{}: {e}", path.display()))
        }
    })?;
    parse_meminfo(&contents)
}

/// Parse `/proc/meminfo` contents.
///
/// Older kernels lack `MemAvailable`; `MemFree + Cached` stands in.
pub fn parse_meminfo(contents: &str) -> Result<MemoryReading, ResourceError> {
    let mut total = None;
    let mut available = None;
    let mut free = None;
    let mut cached = None;

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        let slot = match key {
            "MemTotal:" => &mut total,
            "MemAvailable:" => &mut available,
            "MemFree:" => &mut free,
            "Cached:" => &mut cached,
            _ => continue,
        };
        let kb = value
            .parse::<u64>()
            .map_err(|e| ResourceError::ProbeFailed(format!("invalid {key} value '{value}': {e}")))?;
        *slot = Some(kb);
    }

    let available_kb = match (available, free, cached) {
        (Some(a), _, _) => a,
        (None, Some(f), c) => f + c.unwrap_or(0),
        _ => {
            return Err(ResourceError::ProbeFailed(
                "MemAvailable and MemFree missing from meminfo".into(),
            ));
        }
    };

    Ok(MemoryReading {
        available_gb: available_kb as f64 / KB_PER_GB,
        total_gb: total.unwrap_or(0) as f64 / KB_PER_GB,
    })
}

/// A probe that reports whatever it is told. Used for simulation and tests.
pub struct FixedProbe {
    available_bits: AtomicU64,
    total_bits: AtomicU64,
}

impl FixedProbe {
    pub fn new(available_gb: f64) -> Self {
        Self {
            available_bits: AtomicU64::new(available_gb.to_bits()),
            total_bits: AtomicU64::new(8.0_f64.to_bits()),
        }
    }

    pub fn set_available(&self, available_gb: f64) {
        self.available_bits
            .store(available_gb.to_bits(), Ordering::SeqCst);
    }

    pub fn set_total(&self, total_gb: f64) {
        self.total_bits.store(total_gb.to_bits(), Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedProbe {
    fn name(&self) -> &str {
        "fixed"
    }

    fn read(&self) -> Result<MemoryReading, ResourceError> {
        Ok(MemoryReading {
            available_gb: f64::from_bits(self.available_bits.load(Ordering::SeqCst)),
            total_gb: f64::from_bits(self.total_bits.load(Ordering::SeqCst)),
        })
    }
}

/// The best probe for the current platform.
pub fn system_probe() -> Arc<dyn MemoryProbe> {
    Arc::new(ProcMeminfoProbe::new())
}

//! Error and anomaly types shared between the controller and the worker threads.
//!
//! Three severities:
//! - [`ConfigError`]: recoverable, reported from the controller surface before
//!   the workers exist. The solver stays un-initialized.
//! - [`FatalError`]: both workers stop; surfaced by the next `step`/`sync`.
//! - [`Anomaly`]: logged and counted, simulation continues.

use std::sync::Mutex;

use thiserror::Error;

/// Configuration-stage errors. All of these leave the solver un-initialized
/// and can be fixed by the caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("world dimensions must be positive, got ({0}, {1}, {2})")]
    InvalidWorldDims(f32, f32, f32),

    #[error("voxel exponents ({0}, {1}, {2}) must sum to {sum} bits", sum = crate::world::VOXEL_ID_BITS)]
    BadVoxelExponents(u32, u32, u32),

    #[error("bin grid of {nx} x {ny} x {nz} bins overflows the bin id type")]
    BinCountOverflow { nx: u64, ny: u64, nz: u64 },

    #[error("bin size must be positive, got {0}")]
    BadBinSize(f32),

    #[error("no material loaded; clumps and boundaries need at least one")]
    NoMaterial,

    #[error("no clump template loaded")]
    NoTemplate,

    #[error("unknown material handle {0}")]
    UnknownMaterial(u32),

    #[error("unknown clump template handle {0}")]
    UnknownTemplate(u32),

    #[error("family {0} was never mentioned before initialize()")]
    UnknownFamily(u32),

    #[error("step size must be positive, got {0}")]
    BadStepSize(f32),

    #[error("solver is already initialized")]
    AlreadyInitialized,

    #[error("solver is not initialized yet")]
    NotInitialized,

    #[error("operation requires a synced solver (call sync() first)")]
    NotSynced,

    #[error("clump template has no sphere components")]
    EmptyTemplate,

    #[error("mesh has no triangles")]
    EmptyMesh,

    #[error("{0} is not a known inspection query")]
    UnknownQuery(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop both worker threads. Cloneable so the scheduler can hand
/// the same error to every caller that observes it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FatalError {
    #[error("non-finite force or velocity on owner {owner} at t = {t}")]
    NarrowPhaseNan { owner: u32, t: f64 },

    #[error("bin {bin} still holds {count} geometries after {retries} bin-size halvings")]
    TooCrowdedEscalated { bin: u64, count: usize, retries: u32 },

    #[error("contact history table is inconsistent: {0}")]
    HistoryCorruption(String),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// Non-fatal events worth surfacing to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// An owner moved faster than the configured velocity ceiling.
    SpeedExceeded { owner: u32, speed: f32, limit: f32 },
    /// Two geometries overlap deeper than the smaller radius.
    DeepPenetration { gid_a: u32, gid_b: u32, depth: f32 },
    /// A geometry left the world box and was clamped to the boundary.
    OutOfWorld { owner: u32 },
    /// A contact-detection cycle overflowed a bin and the bin size was halved.
    TooCrowdedRetry { bin_size: f32 },
    /// The configured safety margin cannot cover the drift budget.
    ExpandFactorTooSmall { expand: f32, needed: f32 },
}

impl Anomaly {
    fn describe(&self) -> String {
        match self {
            Anomaly::SpeedExceeded { owner, speed, limit } => {
                format!("owner {owner} at {speed} m/s exceeds the {limit} m/s ceiling")
            }
            Anomaly::DeepPenetration { gid_a, gid_b, depth } => {
                format!("geometries {gid_a} and {gid_b} overlap by {depth}, deeper than a radius")
            }
            Anomaly::OutOfWorld { owner } => {
                format!("owner {owner} left the world box and was clamped")
            }
            Anomaly::TooCrowdedRetry { bin_size } => {
                format!("bin overflow; bin size halved to {bin_size}")
            }
            Anomaly::ExpandFactorTooSmall { expand, needed } => {
                format!("expand factor {expand} below the drift-budget bound {needed}")
            }
        }
    }
}

/// Bounded, thread-shared anomaly sink. Entries past the cap are dropped but
/// still counted, so a runaway simulation cannot eat memory through warnings.
pub struct AnomalyLog {
    entries: Mutex<(Vec<Anomaly>, u64)>,
    cap: usize,
}

impl AnomalyLog {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: Mutex::new((Vec::new(), 0)),
            cap,
        }
    }

    /// Record an anomaly, emitting a `log::warn!` as it happens.
    pub fn record(&self, anomaly: Anomaly) {
        log::warn!("{}", anomaly.describe());
        let mut guard = self.entries.lock().unwrap();
        guard.1 += 1;
        if guard.0.len() < self.cap {
            guard.0.push(anomaly);
        }
    }

    /// Total anomalies recorded since the last drain (including dropped ones).
    pub fn count(&self) -> u64 {
        self.entries.lock().unwrap().1
    }

    /// Remove and return the retained anomalies, resetting the counter.
    pub fn drain(&self) -> Vec<Anomaly> {
        let mut guard = self.entries.lock().unwrap();
        guard.1 = 0;
        std::mem::take(&mut guard.0)
    }
}

impl Default for AnomalyLog {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_caps_but_keeps_counting() {
        let log = AnomalyLog::new(2);
        for owner in 0..5 {
            log.record(Anomaly::OutOfWorld { owner });
        }
        assert_eq!(log.count(), 5);
        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(log.count(), 0);
    }
}

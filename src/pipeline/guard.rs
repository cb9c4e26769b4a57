//! Hysteresis-based lifecycle policy for the memory-heavy optional stage.
//!
//! The Gaussian map optimizer can exhaust device memory long before the
//! rest of the pipeline is done. Rather than crashing the run, the guard
//! destroys the optimizer instance when observed occupancy crosses the
//! high watermark and rebuilds it cold once occupancy falls back to the
//! low watermark. The rest of the pipeline never notices: an absent
//! instance means "skip this cycle", never an error.
//!
//! The rebuild closure captures the configuration supplied at initial
//! construction, so a rebuilt instance can never reference a stale
//! configuration handle.

use thiserror::Error;

/// One memory sample: occupancy fraction and free capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    /// Occupied fraction of device memory, in [0, 1].
    pub occupancy: f32,
    /// Free capacity in bytes.
    pub free_bytes: u64,
}

/// Source of memory-pressure samples. Implemented over `sysinfo` for the
/// daemon and over synthetic traces in tests.
pub trait MemorySampler: Send {
    /// Take one fresh sample.
    fn sample(&mut self) -> MemoryReading;
}

/// Samples host memory via `sysinfo`.
///
/// The mapper's device allocations are mirrored in host-visible pools, so
/// host occupancy tracks device pressure closely enough for the guard.
pub struct SystemMemorySampler {
    system: sysinfo::System,
}

impl SystemMemorySampler {
    /// Create a sampler with a fresh `sysinfo` handle.
    pub fn new() -> Self {
        Self {
            system: sysinfo::System::new(),
        }
    }
}

impl Default for SystemMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SystemMemorySampler {
    fn sample(&mut self) -> MemoryReading {
        self.system.refresh_memory();
        let total = self.system.total_memory().max(1);
        let used = self.system.used_memory();
        MemoryReading {
            occupancy: used as f32 / total as f32,
            free_bytes: self.system.available_memory(),
        }
    }
}

/// Guard construction errors.
#[derive(Error, Debug, PartialEq)]
pub enum GuardError {
    #[error("watermarks must satisfy low < high, got low={low} high={high}")]
    InvalidWatermarks { low: f32, high: f32 },
}

/// Transition taken by one `check_and_adapt` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTransition {
    /// No watermark crossed; instance state unchanged.
    None,
    /// Occupancy exceeded the high watermark; instance destroyed.
    Destroyed,
    /// Occupancy fell to the low watermark; fresh instance built cold.
    Rebuilt,
}

/// Owns the optional stage instance and applies the destroy/rebuild
/// policy once per stage-loop iteration.
pub struct ResourceGuard<T> {
    instance: Option<T>,
    build: Box<dyn FnMut() -> T + Send>,
    sampler: Box<dyn MemorySampler>,
    high_watermark: f32,
    low_watermark: f32,
    destroy_count: u32,
    rebuild_count: u32,
}

impl<T> std::fmt::Debug for ResourceGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("instance_present", &self.instance.is_some())
            .field("high_watermark", &self.high_watermark)
            .field("low_watermark", &self.low_watermark)
            .field("destroy_count", &self.destroy_count)
            .field("rebuild_count", &self.rebuild_count)
            .finish_non_exhaustive()
    }
}

impl<T> ResourceGuard<T> {
    /// Create a guard with an initially-present instance.
    ///
    /// `build` must capture the construction-time configuration; it is
    /// invoked for the initial instance and for every rebuild.
    pub fn new(
        mut build: Box<dyn FnMut() -> T + Send>,
        sampler: Box<dyn MemorySampler>,
        low_watermark: f32,
        high_watermark: f32,
    ) -> Result<Self, GuardError> {
        if !(low_watermark < high_watermark) {
            return Err(GuardError::InvalidWatermarks {
                low: low_watermark,
                high: high_watermark,
            });
        }
        let instance = Some(build());
        Ok(Self {
            instance,
            build,
            sampler,
            high_watermark,
            low_watermark,
            destroy_count: 0,
            rebuild_count: 0,
        })
    }

    /// Sample memory pressure and apply at most one transition.
    pub fn check_and_adapt(&mut self) -> GuardTransition {
        let reading = self.sampler.sample();
        if self.instance.is_some() && reading.occupancy > self.high_watermark {
            self.instance = None;
            self.destroy_count += 1;
            log::warn!(
                "memory pressure {:.1}% (free {} bytes) above high watermark {:.1}%, \
                 tearing down map optimizer",
                reading.occupancy * 100.0,
                reading.free_bytes,
                self.high_watermark * 100.0
            );
            GuardTransition::Destroyed
        } else if self.instance.is_none() && reading.occupancy <= self.low_watermark {
            self.instance = Some((self.build)());
            self.rebuild_count += 1;
            log::info!(
                "memory pressure {:.1}% back below low watermark {:.1}%, \
                 rebuilding map optimizer (cold)",
                reading.occupancy * 100.0,
                self.low_watermark * 100.0
            );
            GuardTransition::Rebuilt
        } else {
            GuardTransition::None
        }
    }

    /// The guarded instance, if currently present.
    pub fn instance_mut(&mut self) -> Option<&mut T> {
        self.instance.as_mut()
    }

    /// Whether an instance is currently present.
    pub fn is_present(&self) -> bool {
        self.instance.is_some()
    }

    /// Number of destroy transitions so far.
    pub fn destroy_count(&self) -> u32 {
        self.destroy_count
    }

    /// Number of rebuild transitions so far (initial construction not
    /// counted).
    pub fn rebuild_count(&self) -> u32 {
        self.rebuild_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays a fixed occupancy trace.
    pub(crate) struct TraceSampler {
        trace: Vec<f32>,
        cursor: usize,
    }

    impl TraceSampler {
        pub(crate) fn new(trace: Vec<f32>) -> Self {
            Self { trace, cursor: 0 }
        }
    }

    impl MemorySampler for TraceSampler {
        fn sample(&mut self) -> MemoryReading {
            let occupancy = self.trace[self.cursor.min(self.trace.len() - 1)];
            self.cursor += 1;
            MemoryReading {
                occupancy,
                free_bytes: ((1.0 - occupancy) * 8e9) as u64,
            }
        }
    }

    fn guard_with_trace(trace: Vec<f32>) -> ResourceGuard<u32> {
        let mut builds = 0u32;
        ResourceGuard::new(
            Box::new(move || {
                builds += 1;
                builds
            }),
            Box::new(TraceSampler::new(trace)),
            0.5,
            0.9,
        )
        .unwrap()
    }

    #[test]
    fn watermarks_must_be_strictly_ordered() {
        let err = ResourceGuard::<u32>::new(
            Box::new(|| 0),
            Box::new(TraceSampler::new(vec![0.0])),
            0.9,
            0.9,
        )
        .unwrap_err();
        assert_eq!(err, GuardError::InvalidWatermarks { low: 0.9, high: 0.9 });
    }

    #[test]
    fn hysteresis_prevents_thrashing() {
        // Destroy at 0.95, hold absent through 0.6 (> low),
        // rebuild at 0.4, destroy again at the final 0.95.
        let mut guard = guard_with_trace(vec![0.95, 0.95, 0.6, 0.4, 0.95]);
        assert!(guard.is_present());

        assert_eq!(guard.check_and_adapt(), GuardTransition::Destroyed);
        assert_eq!(guard.check_and_adapt(), GuardTransition::None);
        assert_eq!(guard.check_and_adapt(), GuardTransition::None);
        assert_eq!(guard.check_and_adapt(), GuardTransition::Rebuilt);
        assert_eq!(guard.check_and_adapt(), GuardTransition::Destroyed);

        assert_eq!(guard.destroy_count(), 2);
        assert_eq!(guard.rebuild_count(), 1);
        assert!(!guard.is_present());
    }

    #[test]
    fn rebuilt_instance_starts_cold() {
        let mut guard = guard_with_trace(vec![0.95, 0.1]);
        // First build produced instance 1.
        assert_eq!(guard.check_and_adapt(), GuardTransition::Destroyed);
        assert_eq!(guard.check_and_adapt(), GuardTransition::Rebuilt);
        // Rebuild ran the factory again rather than reviving old state.
        assert_eq!(*guard.instance_mut().unwrap(), 2);
    }

    #[test]
    fn absence_is_skip_not_error() {
        let mut guard = guard_with_trace(vec![0.95, 0.8]);
        guard.check_and_adapt();
        assert!(guard.instance_mut().is_none());
        // Between the watermarks nothing changes in either direction.
        assert_eq!(guard.check_and_adapt(), GuardTransition::None);
        assert!(guard.instance_mut().is_none());
    }
}

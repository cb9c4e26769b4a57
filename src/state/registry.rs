//! Lock-free rendezvous and completion signaling between stage threads.
//!
//! Stages run in separate OS threads that may each hold a private device
//! context, so coordination is built from idempotent reads of shared
//! atomics rather than condition variables. Every wait in the pipeline is
//! a caller-side polling loop over these counters; nothing here blocks.
//!
//! Invariants:
//! - counters only increase during a run;
//! - a stage's finished latch is set at most once and never cleared;
//! - `AllFinished` always equals the number of set finished latches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// The five stage roles the supervisor can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    /// Consumes the input stream and appends to shared state.
    Ingest,
    /// Global bundle adjustment over the growing trajectory.
    Refine,
    /// Multiview consistency filtering.
    Filter,
    /// Gaussian map optimization (the memory-heavy optional stage).
    MapOptimize,
    /// Visualization and raw-stream display (advisory only).
    Observe,
}

impl StageRole {
    /// All roles, in launch order.
    pub const ALL: [StageRole; 5] = [
        StageRole::Ingest,
        StageRole::Refine,
        StageRole::Filter,
        StageRole::MapOptimize,
        StageRole::Observe,
    ];

    /// Thread / log name for this role.
    pub fn name(&self) -> &'static str {
        match self {
            StageRole::Ingest => "ingest",
            StageRole::Refine => "refine",
            StageRole::Filter => "filter",
            StageRole::MapOptimize => "map-optimize",
            StageRole::Observe => "observe",
        }
    }

    fn index(&self) -> usize {
        match self {
            StageRole::Ingest => 0,
            StageRole::Refine => 1,
            StageRole::Filter => 2,
            StageRole::MapOptimize => 3,
            StageRole::Observe => 4,
        }
    }
}

/// Named monotonic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Units that have entered the startup barrier.
    Triggered,
    /// Units that have reached their terminal state.
    AllFinished,
}

/// Shared atomic counters and one-shot latches for stage coordination.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    triggered: AtomicU32,
    all_finished: AtomicU32,
    finished: [AtomicBool; StageRole::ALL.len()],
    pause: AtomicBool,
}

impl SyncRegistry {
    /// Create a registry with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add 1 to a counter, returning the new value.
    pub fn increment(&self, counter: Counter) -> u32 {
        self.slot(counter).fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current value of a counter. Never blocks.
    pub fn read(&self, counter: Counter) -> u32 {
        self.slot(counter).load(Ordering::Acquire)
    }

    /// Announce this unit at the startup barrier.
    pub fn register_trigger(&self) -> u32 {
        self.increment(Counter::Triggered)
    }

    /// Spin until every expected unit has triggered.
    ///
    /// The barrier resolves in microseconds to milliseconds, so a tight
    /// spin is cheaper than parking the thread.
    pub fn wait_for_barrier(&self, expected: u32) {
        while self.read(Counter::Triggered) < expected {
            std::hint::spin_loop();
        }
    }

    /// Latch a stage as finished. Idempotent: the `AllFinished` aggregate
    /// is incremented only on the first call for a given role.
    pub fn mark_finished(&self, role: StageRole) {
        let was_set = self.finished[role.index()].swap(true, Ordering::AcqRel);
        if !was_set {
            self.increment(Counter::AllFinished);
        }
    }

    /// Whether a stage's finished latch is set.
    pub fn is_finished(&self, role: StageRole) -> bool {
        self.finished[role.index()].load(Ordering::Acquire)
    }

    /// True once every role in `roles` has finished. An empty slice is
    /// trivially satisfied.
    pub fn upstreams_finished(&self, roles: &[StageRole]) -> bool {
        roles.iter().all(|r| self.is_finished(*r))
    }

    /// Raise the cooperative backpressure latch.
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    /// Clear the backpressure latch, releasing a stalled ingest.
    pub fn clear_pause(&self) {
        self.pause.store(false, Ordering::Release);
    }

    /// Whether ingest is currently asked to hold.
    pub fn is_paused(&self) -> bool {
        self.pause.load(Ordering::Acquire)
    }

    fn slot(&self, counter: Counter) -> &AtomicU32 {
        match counter {
            Counter::Triggered => &self.triggered,
            Counter::AllFinished => &self.all_finished,
        }
    }
}

/// Handle type for the registry.
pub type SyncRegistryHandle = Arc<SyncRegistry>;

/// Create a fresh registry handle.
pub fn create_registry() -> SyncRegistryHandle {
    Arc::new(SyncRegistry::new())
}

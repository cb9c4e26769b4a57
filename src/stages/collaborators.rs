//! Interfaces to the numerical subsystems the supervisor drives.
//!
//! The coordinator never inspects what these collaborators do with shared
//! state numerically; it only schedules them and observes the counters.
//! Each trait is the narrowest contract the corresponding loop needs, so
//! tests can substitute instrumented fakes and the daemon can substitute
//! the simulated implementations in [`crate::io::sim`].

use serde::{Deserialize, Serialize};

use crate::core::types::{FrameInput, Pose, Timestamp};
use crate::state::SharedState;

/// A finite, ordered, single-pass source of input frames.
pub trait FrameStream: Send {
    /// Total number of frames, known in advance.
    fn len(&self) -> usize;

    /// True for an empty stream.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next frame, or `None` on exhaustion.
    fn next_frame(&mut self) -> Option<FrameInput>;
}

/// What the tracking frontend did with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Frame appended to shared state at the given record index.
    Appended(usize),
    /// Not enough motion; frame dropped (an internal frontend decision).
    Skipped,
}

/// Tracking frontend: motion filtering plus local bundle adjustment.
/// Sole appender to shared state during a run.
pub trait Frontend: Send {
    /// Process one input frame.
    fn track(&mut self, frame: &FrameInput) -> TrackOutcome;
}

/// Global bundle-adjustment backend.
pub trait Backend: Send {
    /// One incremental optimization step over the current trajectory.
    fn act(&mut self);

    /// One thorough pass over records `start..end` with the given step
    /// count, run once after ingest completes.
    fn finalize(&mut self, start: usize, end: usize, steps: usize);

    /// Whether this backend wants the neighbor graph ingest maintains.
    fn wants_neighbor_graph(&self) -> bool {
        false
    }
}

/// Multiview consistency filter.
pub trait MultiviewFilter: Send {
    /// One filtering pass over the current shared state.
    fn act(&mut self);
}

/// Detached terminal state of the map optimizer.
///
/// This is the handoff payload: a structurally independent copy with no
/// back-references into the producer's live buffers, so the producer can
/// release its device resources once delivery is acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapSnapshot {
    /// Number of records the optimizer had consumed.
    pub frame_count: usize,
    /// Final per-record poses.
    pub poses: Vec<Pose>,
    /// Timestamps matching `poses`.
    pub timestamps: Vec<Timestamp>,
    /// Opaque serialized map state (e.g. splat parameters).
    pub payload: Vec<u8>,
}

/// Gaussian map optimizer: the memory-heavy optional stage.
pub trait Mapper: Send {
    /// One incremental mapping step.
    fn act(&mut self);

    /// One step of the final convergence pass over the complete input.
    /// Returns true once the optimizer reports completion.
    fn finalize(&mut self) -> bool;

    /// Detached copy of the terminal internal state.
    fn snapshot(&self) -> MapSnapshot;
}

/// Map/trajectory visualization. Purely advisory: errors are logged by
/// the observe loop and never propagated.
pub trait Viewer: Send {
    /// Render the current shared state for inspection.
    fn render(&mut self, state: &SharedState) -> Result<(), String>;
}

/// Raw frame display for the preview path. Advisory, like [`Viewer`].
pub trait FrameSink: Send {
    /// Display one raw input frame.
    fn show(&mut self, frame: &FrameInput) -> Result<(), String>;
}

/// Post-shutdown evaluation: computes and persists accuracy/quality
/// metrics from the final trajectory and the handed-off snapshot.
pub trait Evaluator: Send {
    /// Run the evaluation. `snapshot` is `None` when the map optimizer
    /// was disabled or torn down before producing a terminal state.
    fn evaluate(&mut self, state: &SharedState, snapshot: Option<&MapSnapshot>)
    -> Result<(), String>;
}

/// Access to the trained tracking network for checkpointing.
pub trait TrackingNet: Send + Sync {
    /// Serialized network weights.
    fn state_dict(&self) -> Vec<u8>;
}

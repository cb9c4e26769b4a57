//! Stage roles, collaborator interfaces, and per-stage loop bodies.
//!
//! Every stage runs the same lifecycle:
//!
//! ```text
//! NotStarted → Triggered → Running → DrainingFinal → Finished
//! ```
//!
//! A unit announces itself at the startup barrier (`Triggered`), spins
//! until all expected units have announced, runs its work loop against
//! [`SharedState`](crate::state::SharedState) until its upstream set
//! finishes, performs one final drain pass, and latches its finished
//! flag. A disabled-but-launched unit triggers and finishes immediately
//! so it can never wedge the barriers.
//!
//! The numerical collaborators driven by these loops (tracking frontend,
//! bundle-adjustment backend, multiview filter, Gaussian mapper, viewer)
//! are opaque: the supervisor only sees their side effects on shared
//! counters and shared state.

mod collaborators;
mod ingest;
mod map_optimize;
mod observe;
mod refine;

pub use collaborators::{
    Backend, Evaluator, FrameSink, FrameStream, Frontend, MapSnapshot, Mapper, MultiviewFilter,
    TrackOutcome, TrackingNet, Viewer,
};
pub use ingest::{IngestConfig, run_ingest_loop};
pub use map_optimize::{MapOptimizeConfig, run_map_optimize_loop};
pub use observe::{ObserveConfig, run_observe_loop};
pub use refine::{RefineConfig, run_refine_loop, run_filter_loop};

pub use crate::state::StageRole;

use std::thread::{self, JoinHandle};

use crate::core::types::FrameInput;

/// Frame preview path from Ingest to Observe: single-slot, best-effort.
/// A full slot means Observe is behind; Ingest just drops the preview.
pub type PreviewSender = crossbeam_channel::Sender<FrameInput>;
/// Receiving half of the preview path.
pub type PreviewReceiver = crossbeam_channel::Receiver<FrameInput>;

/// Create the single-slot preview channel.
pub fn create_preview_channel() -> (PreviewSender, PreviewReceiver) {
    crossbeam_channel::bounded(1)
}

/// Handle to one launched stage unit.
pub struct StageHandle {
    role: StageRole,
    handle: JoinHandle<()>,
}

impl StageHandle {
    /// Spawn a named thread for a stage role.
    pub fn spawn<F>(role: StageRole, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(role.name().into())
            .spawn(body)
            .expect("failed to spawn stage thread");
        Self { role, handle }
    }

    /// Role this handle was launched for.
    pub fn role(&self) -> StageRole {
        self.role
    }

    /// Block until the unit exits. A panic in the unit is logged, not
    /// propagated.
    pub fn join(self) {
        if let Err(e) = self.handle.join() {
            log::error!("{} stage panicked: {:?}", self.role.name(), e);
        }
    }
}

//! The stage supervisor: launches units, waits out the run, takes the
//! handoff, and drives the termination sequence.
//!
//! One OS thread is launched per enabled stage role (ingest is always
//! enabled). The supervisor records how many units it actually launched,
//! polls the `AllFinished` counter against that count, consumes the
//! terminal snapshot if the map optimizer ran, joins every unit, persists
//! the checkpoint, and finally invokes the evaluation collaborator.
//!
//! Waits are unbounded: a stage that ignores its stop condition stalls
//! shutdown. That is a documented liveness requirement on collaborators,
//! not something the supervisor tries to repair, since GPU-bound work
//! cannot be safely force-killed mid-kernel.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::io::checkpoint::{Checkpoint, CheckpointError, write_checkpoint};
use crate::pipeline::guard::{GuardError, MemorySampler, ResourceGuard};
use crate::pipeline::handoff::{HandoffError, handoff_channel};
use crate::stages::{
    Backend, Evaluator, FrameSink, FrameStream, Frontend, IngestConfig, MapOptimizeConfig,
    MapSnapshot, Mapper, MultiviewFilter, ObserveConfig, RefineConfig, StageHandle, TrackingNet,
    Viewer, create_preview_channel, run_filter_loop, run_ingest_loop, run_map_optimize_loop,
    run_observe_loop, run_refine_loop,
};
use crate::state::{
    Counter, SharedStateHandle, StageRole, SyncRegistryHandle, create_registry,
};

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Launch the global bundle-adjustment stage.
    pub run_backend: bool,
    /// Launch the multiview filter stage.
    pub run_multiview_filter: bool,
    /// Launch the Gaussian map-optimize stage.
    pub run_mapping: bool,
    /// Render shared state in the observe stage.
    pub run_visualization: bool,
    /// Display raw input frames in the observe stage.
    pub show_stream: bool,
    /// Run the evaluation collaborator after shutdown.
    pub evaluate: bool,
    /// Output directory for checkpoints and metrics.
    pub output_dir: PathBuf,
    /// ResourceGuard low watermark (rebuild at or below).
    pub low_watermark: f32,
    /// ResourceGuard high watermark (destroy above).
    pub high_watermark: f32,
    /// Ingest loop settings (backpressure).
    pub ingest: IngestConfig,
    /// Refine loop settings.
    pub refine: RefineConfig,
    /// Delay between multiview filter passes.
    pub filter_iteration_delay: Duration,
    /// Map-optimize loop settings.
    pub map_optimize: MapOptimizeConfig,
    /// Observe loop settings.
    pub observe: ObserveConfig,
    /// Supervisor poll interval while waiting for completion.
    pub completion_poll: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_backend: true,
            run_multiview_filter: true,
            run_mapping: true,
            run_visualization: false,
            show_stream: false,
            evaluate: true,
            output_dir: PathBuf::from("output"),
            low_watermark: 0.5,
            high_watermark: 0.9,
            ingest: IngestConfig::default(),
            refine: RefineConfig::default(),
            filter_iteration_delay: Duration::from_millis(100),
            map_optimize: MapOptimizeConfig::default(),
            observe: ObserveConfig::default(),
            completion_poll: Duration::from_millis(10),
        }
    }
}

/// The external numerical subsystems, handed to the supervisor at launch.
///
/// A collaborator may be `None` only when its stage is disabled in the
/// [`PipelineConfig`]; an enabled stage with a missing collaborator is a
/// configuration error, reported before any unit is launched.
pub struct Collaborators {
    /// Tracking frontend (always required).
    pub frontend: Box<dyn Frontend>,
    /// Bundle-adjustment backend.
    pub backend: Option<Box<dyn Backend>>,
    /// Multiview consistency filter.
    pub filter: Option<Box<dyn MultiviewFilter>>,
    /// Builds the Gaussian mapper; re-invoked by the guard on rebuild,
    /// always from the configuration captured here.
    pub mapper_factory: Option<Box<dyn FnMut() -> Box<dyn Mapper> + Send>>,
    /// Memory pressure source for the guard.
    pub memory_sampler: Box<dyn MemorySampler>,
    /// Shared-state viewer (advisory).
    pub viewer: Option<Box<dyn Viewer>>,
    /// Raw-frame display (advisory).
    pub frame_sink: Option<Box<dyn FrameSink>>,
    /// Post-shutdown evaluation.
    pub evaluator: Option<Box<dyn Evaluator>>,
    /// Tracking network, for the shutdown checkpoint.
    pub net: Arc<dyn TrackingNet>,
}

/// Fatal pipeline errors. Advisory-stage failures never appear here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("handoff contract violated: {0}")]
    Handoff(#[from] HandoffError),

    #[error("checkpoint persistence failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("resource guard misconfigured: {0}")]
    Guard(#[from] GuardError),

    #[error("{role} stage is enabled but its collaborator is missing")]
    MissingCollaborator { role: &'static str },

    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

/// Summary of a completed run.
#[derive(Debug)]
pub struct RunReport {
    /// Records appended to shared state over the run.
    pub frames: usize,
    /// Terminal snapshot from the map optimizer, if it produced one.
    pub snapshot: Option<MapSnapshot>,
    /// Where the checkpoint was written.
    pub checkpoint_path: PathBuf,
}

/// Orchestrates stage lifecycles for one run over one input stream.
pub struct Supervisor {
    config: PipelineConfig,
    shared_state: SharedStateHandle,
    registry: SyncRegistryHandle,
    running: Arc<AtomicBool>,
}

impl Supervisor {
    /// Create a supervisor over an existing shared state handle.
    ///
    /// The state handle is taken rather than created internally so the
    /// caller can construct collaborators against the same handle.
    pub fn new(config: PipelineConfig, shared_state: SharedStateHandle) -> Self {
        Self {
            config,
            shared_state,
            registry: create_registry(),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Attach an externally-owned run flag (e.g. a Ctrl-C handler's).
    pub fn with_run_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// The registry handle, for external backpressure controllers and
    /// instrumentation.
    pub fn registry(&self) -> SyncRegistryHandle {
        self.registry.clone()
    }

    /// The shared state handle.
    pub fn shared_state(&self) -> SharedStateHandle {
        self.shared_state.clone()
    }

    /// Run the pipeline over `stream` to completion.
    pub fn run(
        self,
        stream: Box<dyn FrameStream>,
        collaborators: Collaborators,
    ) -> Result<RunReport, PipelineError> {
        let Collaborators {
            frontend,
            backend,
            filter,
            mapper_factory,
            memory_sampler,
            viewer,
            frame_sink,
            evaluator,
            net,
        } = collaborators;

        let refine_on = self.config.run_backend;
        let filter_on = self.config.run_multiview_filter;
        let mapping_on = self.config.run_mapping;
        let observe_on = self.config.run_visualization || self.config.show_stream;

        let backend = required_if(refine_on, backend, "refine")?;
        let filter = required_if(filter_on, filter, "multiview filter")?;
        let mapper_factory = required_if(mapping_on, mapper_factory, "map optimizer")?;

        // The guard is constructed up front so a bad watermark pair is
        // reported before any thread exists.
        let guard = match mapper_factory {
            Some(factory) => Some(ResourceGuard::new(
                factory,
                memory_sampler,
                self.config.low_watermark,
                self.config.high_watermark,
            )?),
            None => None,
        };

        // Upstream wait sets are derived from what actually launches, so
        // a disabled upstream can never deadlock a downstream stage.
        let refine_ups = vec![StageRole::Ingest];
        let mut two_stage_ups = vec![StageRole::Ingest];
        if refine_on {
            two_stage_ups.push(StageRole::Refine);
        }
        let map_ups = vec![StageRole::Ingest];

        let (preview_tx, preview_rx) = create_preview_channel();
        let (handoff_tx, handoff_rx) = if mapping_on {
            let (tx, rx) = handoff_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut expected: u32 = 1; // ingest always runs
        for on in [refine_on, filter_on, mapping_on, observe_on] {
            if on {
                expected += 1;
            }
        }

        log::info!("launching {} stage units", expected);
        let mut handles = Vec::with_capacity(expected as usize);

        {
            let registry = self.registry.clone();
            let running = self.running.clone();
            let config = self.config.ingest.clone();
            let preview = if self.config.show_stream {
                Some(preview_tx)
            } else {
                None
            };
            handles.push(StageHandle::spawn(StageRole::Ingest, move || {
                run_ingest_loop(stream, frontend, preview, config, registry, expected, running)
            }));
        }

        if let Some(backend) = backend {
            if backend.wants_neighbor_graph() {
                log::debug!("refine backend consumes the covisibility neighbor graph");
            }
            let registry = self.registry.clone();
            let running = self.running.clone();
            let state = self.shared_state.clone();
            let config = self.config.refine.clone();
            let ups = refine_ups;
            handles.push(StageHandle::spawn(StageRole::Refine, move || {
                run_refine_loop(backend, config, registry, expected, state, ups, running, true)
            }));
        }

        if let Some(filter) = filter {
            let registry = self.registry.clone();
            let running = self.running.clone();
            let delay = self.config.filter_iteration_delay;
            let ups = two_stage_ups.clone();
            handles.push(StageHandle::spawn(StageRole::Filter, move || {
                run_filter_loop(filter, delay, registry, expected, ups, running, true)
            }));
        }

        if let (Some(guard), Some(handoff)) = (guard, handoff_tx) {
            let registry = self.registry.clone();
            let running = self.running.clone();
            let config = self.config.map_optimize.clone();
            let ups = map_ups;
            handles.push(StageHandle::spawn(StageRole::MapOptimize, move || {
                run_map_optimize_loop(guard, handoff, config, registry, expected, ups, running, true)
            }));
        }

        if observe_on {
            let viewer = if self.config.run_visualization {
                viewer
            } else {
                None
            };
            let sink = if self.config.show_stream {
                frame_sink
            } else {
                None
            };
            let registry = self.registry.clone();
            let running = self.running.clone();
            let state = self.shared_state.clone();
            let config = self.config.observe.clone();
            let ups = two_stage_ups;
            handles.push(StageHandle::spawn(StageRole::Observe, move || {
                run_observe_loop(
                    viewer, sink, preview_rx, config, registry, expected, state, ups, running, true,
                )
            }));
        }

        // Wait for every unit to latch finished. Ingest-only runs
        // short-circuit on the ingest latch alone.
        loop {
            if self.registry.read(Counter::AllFinished) >= expected {
                break;
            }
            if expected == 1 && self.registry.is_finished(StageRole::Ingest) {
                break;
            }
            thread::sleep(self.config.completion_poll);
        }
        log::info!("all {} stage units reported finished", expected);

        // Publish happens-before the producer's finished latch, so after
        // the wait above the slot state is settled.
        let snapshot = match handoff_rx {
            Some(rx) if rx.is_ready() => Some(rx.consume()?),
            Some(_) => {
                log::warn!("map optimizer ended without a terminal snapshot");
                None
            }
            None => None,
        };

        self.terminate(handles, snapshot, net, evaluator)
    }

    /// Join every unit, persist the checkpoint, and run evaluation.
    fn terminate(
        &self,
        handles: Vec<StageHandle>,
        snapshot: Option<MapSnapshot>,
        net: Arc<dyn TrackingNet>,
        evaluator: Option<Box<dyn Evaluator>>,
    ) -> Result<RunReport, PipelineError> {
        log::info!("initiating termination sequence");
        for handle in handles {
            handle.join();
        }

        let checkpoint = Checkpoint {
            network_weights: net.state_dict(),
            keyframe_timestamps: self.shared_state.timestamps(),
        };
        let frames = checkpoint.keyframe_timestamps.len();
        let checkpoint_path =
            write_checkpoint(&self.config.output_dir.join("checkpoints"), &checkpoint)?;

        if self.config.evaluate {
            if let Some(mut evaluator) = evaluator {
                log::info!("running post-shutdown evaluation");
                evaluator
                    .evaluate(&self.shared_state, snapshot.as_ref())
                    .map_err(PipelineError::Evaluation)?;
            } else {
                log::warn!("evaluation enabled but no evaluator supplied, skipping");
            }
        }

        log::info!("termination complete ({} records)", frames);
        Ok(RunReport {
            frames,
            snapshot,
            checkpoint_path,
        })
    }
}

/// Enforce the enabled-stage/collaborator pairing up front.
fn required_if<T>(
    enabled: bool,
    value: Option<T>,
    role: &'static str,
) -> Result<Option<T>, PipelineError> {
    match (enabled, value) {
        (true, None) => Err(PipelineError::MissingCollaborator { role }),
        (true, some) => Ok(some),
        (false, _) => Ok(None),
    }
}

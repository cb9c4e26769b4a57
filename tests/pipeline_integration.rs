//! Pipeline Integration Tests
//!
//! Drives the supervisor end to end with simulated collaborators:
//! - Full five-stage run: completion, snapshot delivery, checkpoint contents
//! - Frontend-only degenerate run
//! - Startup barrier ordering (no stage touches shared state early)
//! - Backpressure stall and release via the pause latch
//! - Configuration validation (missing collaborators, bad watermarks)
//!
//! Run with: `cargo test --test pipeline_integration`

use drishti_slam::{
    Collaborators, Counter, CsvEvaluator, FrameInput, Frontend, IngestConfig, MapOptimizeConfig,
    Mapper, MemoryReading, MemorySampler, ObserveConfig, PipelineConfig, PipelineError,
    RefineConfig, SharedStateHandle, SimBackend, SimFrontend, SimMapper, SimMultiviewFilter,
    SimStream, SimStreamConfig, StaticNet, Supervisor, SyncRegistryHandle, TrackOutcome,
    create_shared_state, read_checkpoint,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

// ============================================================================
// Test helpers
// ============================================================================

/// Sampler reporting constant low memory pressure.
struct CalmSampler;

impl MemorySampler for CalmSampler {
    fn sample(&mut self) -> MemoryReading {
        MemoryReading {
            occupancy: 0.1,
            free_bytes: 8u64 << 30,
        }
    }
}

/// Fast timings so drain phases finish in milliseconds.
fn fast_config(output_dir: std::path::PathBuf) -> PipelineConfig {
    PipelineConfig {
        output_dir,
        refine: RefineConfig {
            iteration_delay: Duration::from_millis(1),
            final_steps: 2,
        },
        filter_iteration_delay: Duration::from_millis(1),
        map_optimize: MapOptimizeConfig {
            iteration_delay: Duration::from_millis(1),
        },
        observe: ObserveConfig {
            idle_delay: Duration::from_millis(1),
        },
        completion_poll: Duration::from_millis(1),
        ..Default::default()
    }
}

fn sim_stream(frames: usize) -> Box<SimStream> {
    Box::new(SimStream::new(SimStreamConfig {
        frames,
        motion_step: 0.1,
        ..Default::default()
    }))
}

/// Every collaborator wired to the simulated implementations.
fn full_collaborators(
    state: &SharedStateHandle,
    output_dir: std::path::PathBuf,
) -> Collaborators {
    let mapper_state = state.clone();
    Collaborators {
        frontend: Box::new(SimFrontend::new(state.clone(), 0.0)),
        backend: Some(Box::new(SimBackend::new(state.clone()))),
        filter: Some(Box::new(SimMultiviewFilter::new(state.clone()))),
        mapper_factory: Some(Box::new(move || {
            Box::new(SimMapper::new(mapper_state.clone(), 2)) as Box<dyn Mapper>
        })),
        memory_sampler: Box::new(CalmSampler),
        viewer: None,
        frame_sink: None,
        evaluator: Some(Box::new(CsvEvaluator::new(output_dir))),
        net: Arc::new(StaticNet::new(vec![7u8; 16])),
    }
}

// ============================================================================
// Full pipeline
// ============================================================================

#[test]
fn full_pipeline_run_completes_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let supervisor = Supervisor::new(fast_config(dir.path().into()), state.clone());

    let report = supervisor
        .run(sim_stream(30), full_collaborators(&state, dir.path().into()))
        .unwrap();

    assert_eq!(report.frames, 30);
    let snapshot = report.snapshot.expect("mapping was enabled");
    assert_eq!(snapshot.frame_count, 30);
    assert_eq!(snapshot.poses.len(), 30);

    // Checkpoint round-trips and carries every keyframe timestamp.
    let checkpoint = read_checkpoint(&report.checkpoint_path).unwrap();
    assert_eq!(checkpoint.network_weights, vec![7u8; 16]);
    assert_eq!(checkpoint.keyframe_timestamps.len(), 30);
    assert!(
        checkpoint
            .keyframe_timestamps
            .windows(2)
            .all(|w| w[0] < w[1])
    );

    // Evaluation wrote its metrics file.
    assert!(dir.path().join("metrics.csv").exists());
}

#[test]
fn frontend_only_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let config = PipelineConfig {
        run_backend: false,
        run_multiview_filter: false,
        run_mapping: false,
        evaluate: false,
        ..fast_config(dir.path().into())
    };
    let supervisor = Supervisor::new(config, state.clone());

    let collaborators = Collaborators {
        backend: None,
        filter: None,
        mapper_factory: None,
        evaluator: None,
        ..full_collaborators(&state, dir.path().into())
    };
    let report = supervisor.run(sim_stream(10), collaborators).unwrap();

    assert_eq!(report.frames, 10);
    assert!(report.snapshot.is_none());
    let checkpoint = read_checkpoint(&report.checkpoint_path).unwrap();
    assert_eq!(checkpoint.keyframe_timestamps.len(), 10);
}

// ============================================================================
// Startup barrier
// ============================================================================

/// Frontend that records whether the full trigger quorum was visible
/// before its first mutation of shared state.
struct BarrierProbeFrontend {
    inner: SimFrontend,
    registry: SyncRegistryHandle,
    expected: u32,
    quorum_seen: Arc<AtomicBool>,
    checked: bool,
}

impl Frontend for BarrierProbeFrontend {
    fn track(&mut self, frame: &FrameInput) -> TrackOutcome {
        if !self.checked {
            self.checked = true;
            let ok = self.registry.read(Counter::Triggered) >= self.expected;
            self.quorum_seen.store(ok, Ordering::Relaxed);
        }
        self.inner.track(frame)
    }
}

#[test]
fn no_mutation_before_full_trigger_quorum() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let config = PipelineConfig {
        evaluate: false,
        ..fast_config(dir.path().into())
    };
    let supervisor = Supervisor::new(config, state.clone());
    let quorum_seen = Arc::new(AtomicBool::new(false));

    let probe = BarrierProbeFrontend {
        inner: SimFrontend::new(state.clone(), 0.0),
        registry: supervisor.registry(),
        expected: 4, // ingest + refine + filter + mapping
        quorum_seen: quorum_seen.clone(),
        checked: false,
    };
    let collaborators = Collaborators {
        frontend: Box::new(probe),
        evaluator: None,
        ..full_collaborators(&state, dir.path().into())
    };

    supervisor.run(sim_stream(5), collaborators).unwrap();
    assert!(quorum_seen.load(Ordering::Relaxed));
}

// ============================================================================
// Backpressure
// ============================================================================

#[test]
fn pause_latch_stalls_ingest_until_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let config = PipelineConfig {
        run_backend: false,
        run_multiview_filter: false,
        run_mapping: false,
        evaluate: false,
        ingest: IngestConfig {
            pause_interval: Some(50),
            pause_poll: Duration::from_millis(1),
        },
        ..fast_config(dir.path().into())
    };
    let supervisor = Supervisor::new(config, state.clone());
    let registry = supervisor.registry();

    let collaborators = Collaborators {
        backend: None,
        filter: None,
        mapper_factory: None,
        evaluator: None,
        ..full_collaborators(&state, dir.path().into())
    };
    let probe_state = state.clone();
    let runner = thread::spawn(move || supervisor.run(sim_stream(120), collaborators));

    // Act as the external consumer: release each stall after a beat.
    let mut stall_indices = Vec::new();
    while !runner.is_finished() {
        if registry.is_paused() {
            // Ingest holds position while the latch is up.
            let at = probe_state.len();
            thread::sleep(Duration::from_millis(5));
            assert_eq!(probe_state.len(), at, "ingest advanced while paused");
            stall_indices.push(at);
            registry.clear_pause();
        }
        thread::sleep(Duration::from_millis(1));
    }

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.frames, 120);
    // 120 frames with an interval of 50 stalls at records 50 and 100.
    assert_eq!(stall_indices, vec![50, 100]);
}

// ============================================================================
// Configuration validation
// ============================================================================

#[test]
fn enabled_stage_without_collaborator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let supervisor = Supervisor::new(fast_config(dir.path().into()), state.clone());

    let collaborators = Collaborators {
        mapper_factory: None,
        ..full_collaborators(&state, dir.path().into())
    };
    let err = supervisor.run(sim_stream(1), collaborators).unwrap_err();
    assert!(matches!(err, PipelineError::MissingCollaborator { .. }));
}

#[test]
fn inverted_watermarks_are_rejected_before_launch() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let config = PipelineConfig {
        low_watermark: 0.9,
        high_watermark: 0.5,
        ..fast_config(dir.path().into())
    };
    let supervisor = Supervisor::new(config, state.clone());

    let err = supervisor
        .run(sim_stream(1), full_collaborators(&state, dir.path().into()))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Guard(_)));

    // Nothing ran: shared state was never touched.
    assert_eq!(state.len(), 0);
}

// ============================================================================
// External shutdown
// ============================================================================

#[test]
fn external_stop_flag_ends_the_run_early() {
    let dir = tempfile::tempdir().unwrap();
    let state = create_shared_state();
    let running = Arc::new(AtomicBool::new(true));
    let config = PipelineConfig {
        run_backend: false,
        run_multiview_filter: false,
        run_mapping: false,
        evaluate: false,
        ingest: IngestConfig {
            pause_interval: Some(3),
            pause_poll: Duration::from_millis(1),
        },
        ..fast_config(dir.path().into())
    };
    let supervisor =
        Supervisor::new(config, state.clone()).with_run_flag(running.clone());

    let collaborators = Collaborators {
        backend: None,
        filter: None,
        mapper_factory: None,
        evaluator: None,
        ..full_collaborators(&state, dir.path().into())
    };
    // Nothing clears the pause latch; the stop flag must break the stall.
    let runner = thread::spawn(move || supervisor.run(sim_stream(100), collaborators));
    thread::sleep(Duration::from_millis(20));
    running.store(false, Ordering::Relaxed);

    let report = runner.join().unwrap().unwrap();
    assert!(report.frames < 100);
}

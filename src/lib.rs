//! DrishtiSLAM - Stage coordinator for a dense visual SLAM pipeline
//!
//! # Architecture
//!
//! The crate is organized into 5 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      bin/                           │  ← Executable
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                      io/                            │  ← Infrastructure
//! │              (checkpoint, sim)                      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   pipeline/                         │  ← Orchestration
//! │         (supervisor, handoff, guard)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    stages/                          │  ← Stage loops
//! │   (ingest, refine, map_optimize, observe)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     state/                          │  ← Shared state
//! │             (shared store, registry)                │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                    (types)                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The pipeline runs five stage threads over one shared frame store:
//! Ingest (motion filtering + local tracking, sole appender), Refine
//! (global bundle adjustment), Filter (multiview consistency),
//! MapOptimize (Gaussian map optimization under a memory guard), and
//! Observe (visualization + pause clearing). A startup barrier keeps
//! every launched stage from touching shared state until all have
//! registered; lock-free finished latches drive drain-phase handover;
//! a single-use handoff channel carries the map optimizer's terminal
//! snapshot back to the supervisor for checkpointing and evaluation.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Shared state (depends on core)
// ============================================================================
pub mod state;

// ============================================================================
// Layer 3: Stage loops (depends on core, state)
// ============================================================================
pub mod stages;

// ============================================================================
// Layer 4: Pipeline orchestration (depends on all lower layers)
// ============================================================================
pub mod pipeline;

// ============================================================================
// Layer 5: I/O infrastructure (depends on all layers)
// ============================================================================
pub mod io;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::types::{BufferRef, FrameInput, Intrinsics, Pose, Timestamp};

// Shared state
pub use crate::state::{
    Counter, FrameRecord, SharedState, SharedStateHandle, StageRole, SyncRegistry,
    SyncRegistryHandle, VideoSlice, create_registry, create_shared_state,
};

// Stage collaborator traits and configs
pub use crate::stages::{
    Backend, Evaluator, FrameSink, FrameStream, Frontend, IngestConfig, MapOptimizeConfig,
    MapSnapshot, Mapper, MultiviewFilter, ObserveConfig, RefineConfig, TrackOutcome, TrackingNet,
    Viewer,
};

// Pipeline orchestration
pub use crate::pipeline::{
    Collaborators, GuardError, GuardTransition, HandoffError, HandoffReceiver, HandoffSender,
    MemoryReading, MemorySampler, PipelineConfig, PipelineError, ResourceGuard, RunReport,
    Supervisor, SystemMemorySampler, handoff_channel,
};

// I/O
pub use crate::io::checkpoint::{Checkpoint, CheckpointError, read_checkpoint, write_checkpoint};
pub use crate::io::sim::{
    CsvEvaluator, LogFrameSink, LogViewer, SimBackend, SimFrontend, SimMapper, SimMultiviewFilter,
    SimStream, SimStreamConfig, StaticNet,
};

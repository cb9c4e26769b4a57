//! Simulated stream and collaborators for offline runs and tests.
//!
//! These stand in for the numerical subsystems (tracking network, bundle
//! adjustment, Gaussian mapper, visualizer) so the coordinator can be
//! exercised end to end without a GPU or dataset. They make no numerical
//! claims; they only produce the side effects the supervisor observes.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::types::{BufferRef, FrameInput, Intrinsics, Pose, Timestamp};
use crate::stages::{
    Backend, Evaluator, FrameSink, FrameStream, Frontend, MapSnapshot, Mapper, MultiviewFilter,
    TrackOutcome, TrackingNet, Viewer,
};
use crate::state::{FrameRecord, SharedState, SharedStateHandle};

/// Configuration for the synthetic frame stream.
#[derive(Debug, Clone)]
pub struct SimStreamConfig {
    /// Number of frames to produce.
    pub frames: usize,
    /// Seconds between frames.
    pub frame_dt: f64,
    /// Camera translation per frame along +x (meters).
    pub motion_step: f64,
    /// Provide a depth buffer with each frame.
    pub with_depth: bool,
}

impl Default for SimStreamConfig {
    fn default() -> Self {
        Self {
            frames: 100,
            frame_dt: 1.0 / 30.0,
            motion_step: 0.05,
            with_depth: true,
        }
    }
}

/// Finite synthetic stream: constant-velocity trajectory along +x.
pub struct SimStream {
    config: SimStreamConfig,
    cursor: usize,
}

impl SimStream {
    /// Create a stream producing `config.frames` frames.
    pub fn new(config: SimStreamConfig) -> Self {
        Self { config, cursor: 0 }
    }
}

impl FrameStream for SimStream {
    fn len(&self) -> usize {
        self.config.frames
    }

    fn next_frame(&mut self) -> Option<FrameInput> {
        if self.cursor >= self.config.frames {
            return None;
        }
        let i = self.cursor;
        self.cursor += 1;
        Some(FrameInput {
            timestamp: i as Timestamp * self.config.frame_dt,
            image: BufferRef(i as u64),
            depth: self.config.with_depth.then_some(BufferRef(0x8000_0000 | i as u64)),
            intrinsics: Intrinsics::default(),
            gt_pose: Some(Pose::from_translation(i as f64 * self.config.motion_step, 0.0, 0.0)),
        })
    }
}

/// Motion-filtering frontend: appends a record when the camera has moved
/// far enough since the last appended frame. The first frame is always
/// appended.
pub struct SimFrontend {
    state: SharedStateHandle,
    min_motion: f64,
    last_appended: Option<Pose>,
}

impl SimFrontend {
    /// `min_motion` is the translation threshold in meters.
    pub fn new(state: SharedStateHandle, min_motion: f64) -> Self {
        Self {
            state,
            min_motion,
            last_appended: None,
        }
    }
}

impl Frontend for SimFrontend {
    fn track(&mut self, frame: &FrameInput) -> TrackOutcome {
        let pose = frame.gt_pose.unwrap_or_else(Pose::identity);
        if let Some(last) = &self.last_appended
            && pose.translation_distance(last) < self.min_motion
        {
            return TrackOutcome::Skipped;
        }
        let index = self.state.append(FrameRecord::from_input(frame, pose));
        self.last_appended = Some(pose);
        TrackOutcome::Appended(index)
    }
}

/// Bundle-adjustment stand-in: shrinks every record's uncertainty a bit
/// per pass, exercising the in-place update path under the lock.
pub struct SimBackend {
    state: SharedStateHandle,
    passes: u32,
}

impl SimBackend {
    pub fn new(state: SharedStateHandle) -> Self {
        Self { state, passes: 0 }
    }

    /// Number of incremental passes performed.
    pub fn passes(&self) -> u32 {
        self.passes
    }
}

impl Backend for SimBackend {
    fn act(&mut self) {
        self.passes += 1;
        let len = self.state.len();
        for index in 0..len {
            let (pose, uncertainty) = {
                let slice = self.state.read();
                let rec = &slice.frames[index];
                (rec.pose, rec.uncertainty)
            };
            self.state.update_pose(index, pose, uncertainty * 0.9);
        }
    }

    fn finalize(&mut self, start: usize, end: usize, steps: usize) {
        log::info!("sim backend final pass over [{start}, {end}) with {steps} steps");
        for _ in 0..steps {
            self.act();
        }
    }
}

/// Multiview filter stand-in: read-only consistency scan.
pub struct SimMultiviewFilter {
    state: SharedStateHandle,
    passes: u32,
}

impl SimMultiviewFilter {
    pub fn new(state: SharedStateHandle) -> Self {
        Self { state, passes: 0 }
    }
}

impl MultiviewFilter for SimMultiviewFilter {
    fn act(&mut self) {
        self.passes += 1;
        let confident = {
            let slice = self.state.read();
            slice.frames.iter().filter(|f| f.uncertainty < 0.5).count()
        };
        log::debug!("sim filter pass {}: {} confident records", self.passes, confident);
    }
}

/// Gaussian-mapper stand-in: counts steps and snapshots the trajectory.
pub struct SimMapper {
    state: SharedStateHandle,
    steps: u32,
    final_steps_left: u32,
}

impl SimMapper {
    /// `final_steps` is how many `finalize` calls it takes to converge.
    pub fn new(state: SharedStateHandle, final_steps: u32) -> Self {
        Self {
            state,
            steps: 0,
            final_steps_left: final_steps.max(1),
        }
    }
}

impl Mapper for SimMapper {
    fn act(&mut self) {
        self.steps += 1;
    }

    fn finalize(&mut self) -> bool {
        self.steps += 1;
        self.final_steps_left -= 1;
        self.final_steps_left == 0
    }

    fn snapshot(&self) -> MapSnapshot {
        // Deep copy: the snapshot owns its vectors outright.
        let slice = self.state.read();
        MapSnapshot {
            frame_count: slice.frames.len(),
            poses: slice.frames.iter().map(|f| f.pose).collect(),
            timestamps: slice.frames.iter().map(|f| f.timestamp).collect(),
            payload: self.steps.to_le_bytes().to_vec(),
        }
    }
}

/// Viewer that only logs; counts renders for tests.
#[derive(Default)]
pub struct LogViewer {
    renders: Arc<AtomicU32>,
}

impl LogViewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared render counter, for instrumentation.
    pub fn render_counter(&self) -> Arc<AtomicU32> {
        self.renders.clone()
    }
}

impl Viewer for LogViewer {
    fn render(&mut self, state: &SharedState) -> Result<(), String> {
        self.renders.fetch_add(1, Ordering::Relaxed);
        log::debug!("viewer: {} records in shared state", state.len());
        Ok(())
    }
}

/// Frame sink that only logs; counts shown frames for tests.
#[derive(Default)]
pub struct LogFrameSink {
    shown: Arc<AtomicU32>,
}

impl LogFrameSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared display counter, for instrumentation.
    pub fn shown_counter(&self) -> Arc<AtomicU32> {
        self.shown.clone()
    }
}

impl FrameSink for LogFrameSink {
    fn show(&mut self, frame: &FrameInput) -> Result<(), String> {
        self.shown.fetch_add(1, Ordering::Relaxed);
        log::debug!("preview frame t={:.3}", frame.timestamp);
        Ok(())
    }
}

/// Writes trajectory-quality metrics to `metrics.csv` in the output
/// directory, in the shape the downstream tooling expects.
pub struct CsvEvaluator {
    output_dir: PathBuf,
}

impl CsvEvaluator {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

impl Evaluator for CsvEvaluator {
    fn evaluate(
        &mut self,
        state: &SharedState,
        snapshot: Option<&MapSnapshot>,
    ) -> Result<(), String> {
        let (frames, ate_mean) = {
            let slice = state.read();
            let comp = slice.pose_compensation;
            let mut sum = 0.0;
            let mut counted = 0usize;
            for rec in &slice.frames {
                if let Some(gt) = &rec.gt_pose {
                    // World-frame compensation is applied to the estimate
                    // before comparing against ground truth.
                    let mut est = rec.pose;
                    for k in 0..3 {
                        est.translation[k] += comp.translation[k];
                    }
                    sum += est.translation_distance(gt);
                    counted += 1;
                }
            }
            let mean = if counted > 0 { sum / counted as f64 } else { 0.0 };
            (slice.frames.len(), mean)
        };
        let map_frames = snapshot.map(|s| s.frame_count).unwrap_or(0);

        std::fs::create_dir_all(&self.output_dir).map_err(|e| e.to_string())?;
        let path = self.output_dir.join("metrics.csv");
        let csv = format!(
            "tag,ate_mean,frames,map_frames\nfinal,{ate_mean:.6},{frames},{map_frames}\n"
        );
        std::fs::write(&path, csv).map_err(|e| e.to_string())?;
        log::info!("evaluation written: {} (ate_mean={:.4})", path.display(), ate_mean);
        Ok(())
    }
}

/// Fixed-weights tracking net for checkpointing in simulated runs.
pub struct StaticNet {
    weights: Vec<u8>,
}

impl StaticNet {
    pub fn new(weights: Vec<u8>) -> Self {
        Self { weights }
    }
}

impl TrackingNet for StaticNet {
    fn state_dict(&self) -> Vec<u8> {
        self.weights.clone()
    }
}

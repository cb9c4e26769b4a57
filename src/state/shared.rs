//! Thread-safe shared frame store for the multi-threaded SLAM pipeline.
//!
//! `SharedState` is shared between:
//! - Ingest: sole appender (new frame records)
//! - Refine / MapOptimize: in-place pose and uncertainty updates
//! - Observe / Evaluator: read-only consumers
//!
//! The store is append-only: records are never reordered or deleted.
//! The record counter is published with `Release` ordering only after the
//! record is fully written under the write lock, so a reader that observes
//! `len() == n` can read records `0..n` without ever seeing a torn entry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::core::types::{BufferRef, FrameInput, Intrinsics, Pose, Timestamp};

/// One keyframe record in the shared store.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Frame timestamp (seconds).
    pub timestamp: Timestamp,
    /// Color image buffer reference.
    pub image: BufferRef,
    /// Depth buffer reference, if available.
    pub depth: Option<BufferRef>,
    /// Camera intrinsics.
    pub intrinsics: Intrinsics,
    /// Current pose estimate (updated in place by Refine/MapOptimize).
    pub pose: Pose,
    /// Pose uncertainty (updated in place alongside the pose).
    pub uncertainty: f64,
    /// Ground-truth pose, when the dataset carries one.
    pub gt_pose: Option<Pose>,
}

impl FrameRecord {
    /// Build a fresh record from an input frame with an initial pose guess.
    pub fn from_input(frame: &FrameInput, pose: Pose) -> Self {
        Self {
            timestamp: frame.timestamp,
            image: frame.image,
            depth: frame.depth,
            intrinsics: frame.intrinsics,
            pose,
            uncertainty: 1.0,
            gt_pose: frame.gt_pose,
        }
    }
}

/// Lock-protected interior of [`SharedState`].
#[derive(Debug, Default)]
pub struct VideoSlice {
    /// Ordered keyframe records.
    pub frames: Vec<FrameRecord>,
    /// World-frame compensation transform applied at evaluation time.
    pub pose_compensation: Pose,
}

/// The shared map/trajectory estimate, visible to every stage.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: RwLock<VideoSlice>,
    /// Number of fully-written records. Only increases.
    counter: AtomicUsize,
}

impl SharedState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(VideoSlice::default()),
            counter: AtomicUsize::new(0),
        }
    }

    /// Number of fully-written records. Non-blocking; safe to poll from
    /// any stage without taking the lock.
    pub fn len(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }

    /// True if no record has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a record. Ingest is the only caller during a run.
    ///
    /// The counter is published after the push so concurrent readers never
    /// observe a half-written record.
    pub fn append(&self, record: FrameRecord) -> usize {
        let mut slice = self.write_inner();
        slice.frames.push(record);
        let len = slice.frames.len();
        self.counter.store(len, Ordering::Release);
        len - 1
    }

    /// Update pose and uncertainty of an existing record in place.
    ///
    /// Returns false if the index has not been appended yet. Records are
    /// never resized or reordered here.
    pub fn update_pose(&self, index: usize, pose: Pose, uncertainty: f64) -> bool {
        let mut slice = self.write_inner();
        match slice.frames.get_mut(index) {
            Some(rec) => {
                rec.pose = pose;
                rec.uncertainty = uncertainty;
                true
            }
            None => false,
        }
    }

    /// Set the world-frame compensation transform.
    pub fn set_pose_compensation(&self, pose: Pose) {
        self.write_inner().pose_compensation = pose;
    }

    /// Read access to the full slice (frames + compensation transform).
    pub fn read(&self) -> RwLockReadGuard<'_, VideoSlice> {
        match self.inner.read() {
            Ok(g) => g,
            // A poisoned lock means a stage panicked mid-update; the store
            // is append-only, so the data is still usable.
            Err(p) => p.into_inner(),
        }
    }

    /// Timestamps of every appended record, for checkpointing.
    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.read().frames.iter().map(|f| f.timestamp).collect()
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, VideoSlice> {
        match self.inner.write() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }
}

/// Handle type for shared state.
pub type SharedStateHandle = Arc<SharedState>;

/// Create a new shared state handle.
pub fn create_shared_state() -> SharedStateHandle {
    Arc::new(SharedState::new())
}

//! Foundation types shared by every pipeline layer.
//!
//! The coordinator never inspects image or depth contents; frames carry
//! opaque buffer references into whatever store the numerical stages use.

use serde::{Deserialize, Serialize};

/// Timestamp in seconds since stream start.
pub type Timestamp = f64;

/// Opaque reference to an image or depth buffer owned by an external store.
///
/// The supervisor only moves these around; decoding them is the numerical
/// collaborators' business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRef(pub u64);

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// Focal length X (pixels).
    pub fx: f64,
    /// Focal length Y (pixels).
    pub fy: f64,
    /// Principal point X (pixels).
    pub cx: f64,
    /// Principal point Y (pixels).
    pub cy: f64,
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self {
            fx: 525.0,
            fy: 525.0,
            cx: 319.5,
            cy: 239.5,
        }
    }
}

/// Camera-to-world pose as translation + unit quaternion (w, x, y, z).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation (meters).
    pub translation: [f64; 3],
    /// Rotation quaternion, w first.
    pub rotation: [f64; 4],
}

impl Pose {
    /// Identity pose at the origin.
    pub fn identity() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Pose at a translation with identity rotation.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self {
            translation: [x, y, z],
            rotation: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Euclidean distance between the translation parts.
    pub fn translation_distance(&self, other: &Pose) -> f64 {
        let dx = self.translation[0] - other.translation[0];
        let dy = self.translation[1] - other.translation[1];
        let dz = self.translation[2] - other.translation[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// One frame from the input stream.
///
/// Produced by a [`FrameStream`](crate::stages::FrameStream); consumed
/// single-pass by the ingest stage.
#[derive(Debug, Clone)]
pub struct FrameInput {
    /// Frame timestamp (seconds).
    pub timestamp: Timestamp,
    /// Reference to the color image buffer.
    pub image: BufferRef,
    /// Reference to the depth buffer, if the mode provides one.
    pub depth: Option<BufferRef>,
    /// Camera intrinsics for this frame.
    pub intrinsics: Intrinsics,
    /// Ground-truth pose, when the dataset carries one.
    pub gt_pose: Option<Pose>,
}

//! Shared mutable state and cross-thread signaling.
//!
//! Two pieces live here:
//! - [`SharedState`]: the append-mostly frame store every stage reads,
//!   guarded by one coarse lock plus a lock-free record counter.
//! - [`SyncRegistry`]: atomic counters and one-shot latches used for the
//!   startup rendezvous, completion signaling, and backpressure.

mod registry;
mod shared;

pub use registry::{Counter, StageRole, SyncRegistry, SyncRegistryHandle, create_registry};
pub use shared::{FrameRecord, SharedState, SharedStateHandle, VideoSlice, create_shared_state};

//! I/O infrastructure: checkpoint persistence and simulated collaborators
//! for offline runs.

pub mod checkpoint;
pub mod sim;

pub use checkpoint::{Checkpoint, CheckpointError, read_checkpoint, write_checkpoint};

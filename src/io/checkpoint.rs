//! Durable run checkpoint: trained-network weights plus the per-record
//! timestamp list, written once at shutdown.
//!
//! # File Format
//!
//! ```text
//! ┌──────────────────┬───────────────────┬──────────────────┬─────────────────┐
//! │ Magic (4 bytes)  │ Version (2 bytes) │ Length (8 bytes) │ Payload         │
//! │ "DCKP"           │ Little-endian u16 │ Little-endian u64│ Postcard binary │
//! └──────────────────┴───────────────────┴──────────────────┴─────────────────┘
//! ```
//!
//! The file is written to a temp sibling and renamed into place, so a
//! crash mid-write never leaves a truncated checkpoint behind. Write
//! failures propagate: silently losing the final state would be worse
//! than aborting shutdown.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::Timestamp;

/// Magic bytes at the start of a checkpoint file.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"DCKP";

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u16 = 1;

/// Checkpoint file name inside the checkpoints directory.
pub const CHECKPOINT_FILE: &str = "final.ckpt";

/// Upper bound on the serialized payload. A length field beyond this is
/// a corrupt or truncated file, rejected before any allocation.
pub const MAX_PAYLOAD_BYTES: u64 = 256 * 1024 * 1024;

/// Checkpoint persistence errors.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("invalid checkpoint magic bytes")]
    BadMagic,

    #[error("unsupported checkpoint version {0}")]
    BadVersion(u16),

    #[error("implausible checkpoint payload length {0} bytes")]
    PayloadTooLarge(u64),
}

impl From<postcard::Error> for CheckpointError {
    fn from(e: postcard::Error) -> Self {
        CheckpointError::Serialize(e.to_string())
    }
}

/// The durable record persisted at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Serialized tracking-network weights.
    pub network_weights: Vec<u8>,
    /// Timestamp of every appended record, in append order.
    pub keyframe_timestamps: Vec<Timestamp>,
}

/// Write a checkpoint into `dir`, creating the directory as needed.
/// Returns the final path.
pub fn write_checkpoint(dir: &Path, checkpoint: &Checkpoint) -> Result<PathBuf, CheckpointError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(CHECKPOINT_FILE);
    let tmp = dir.join(format!("{CHECKPOINT_FILE}.tmp"));

    let payload = postcard::to_stdvec(checkpoint)?;
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(&CHECKPOINT_MAGIC)?;
        writer.write_all(&CHECKPOINT_VERSION.to_le_bytes())?;
        writer.write_all(&(payload.len() as u64).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
    }
    fs::rename(&tmp, &path)?;

    log::info!(
        "checkpoint written: {} ({} weight bytes, {} timestamps)",
        path.display(),
        checkpoint.network_weights.len(),
        checkpoint.keyframe_timestamps.len()
    );
    Ok(path)
}

/// Read a checkpoint back, verifying magic and version.
pub fn read_checkpoint(path: &Path) -> Result<Checkpoint, CheckpointError> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)?;
    if magic != CHECKPOINT_MAGIC {
        return Err(CheckpointError::BadMagic);
    }

    let mut version = [0u8; 2];
    file.read_exact(&mut version)?;
    let version = u16::from_le_bytes(version);
    if version != CHECKPOINT_VERSION {
        return Err(CheckpointError::BadVersion(version));
    }

    let mut len = [0u8; 8];
    file.read_exact(&mut len)?;
    let len = u64::from_le_bytes(len);
    if len > MAX_PAYLOAD_BYTES {
        return Err(CheckpointError::PayloadTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload)?;
    Ok(postcard::from_bytes(&payload)?)
}

//! Ingest stage: consumes the input stream and feeds the pipeline.
//!
//! Ingest is the primary liveness signal: every other stage keys off its
//! finished latch. Per frame it forwards a best-effort preview to the
//! observe stage, hands the frame to the tracking frontend (which decides
//! whether to append), and honors the cooperative backpressure contract:
//! every `pause_interval` frames it raises the pause latch and holds
//! until an external party clears it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::stages::{FrameStream, Frontend, PreviewSender, TrackOutcome};
use crate::state::{StageRole, SyncRegistryHandle};

/// Configuration for the ingest loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Raise the pause latch every this many ingested frames.
    /// `None` disables backpressure checkpoints.
    pub pause_interval: Option<usize>,
    /// Fixed delay between polls of the pause latch while stalled.
    pub pause_poll: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pause_interval: None,
            pause_poll: Duration::from_millis(10),
        }
    }
}

/// Run the ingest stage to stream exhaustion.
#[allow(clippy::too_many_arguments)]
pub fn run_ingest_loop(
    mut stream: Box<dyn FrameStream>,
    mut frontend: Box<dyn Frontend>,
    preview: Option<PreviewSender>,
    config: IngestConfig,
    registry: SyncRegistryHandle,
    expected_units: u32,
    running: Arc<AtomicBool>,
) {
    registry.register_trigger();
    registry.wait_for_barrier(expected_units);
    log::info!("ingest triggered, {} frames queued", stream.len());

    let mut ingested = 0usize;
    let mut appended = 0usize;

    while let Some(frame) = stream.next_frame() {
        if !running.load(Ordering::Relaxed) {
            log::info!("ingest stopping early, run flag cleared");
            break;
        }

        // Best-effort preview: observe is a convenience, never a
        // correctness dependency. A full slot just drops the frame.
        if let Some(tx) = &preview {
            let _ = tx.try_send(frame.clone());
        }

        match frontend.track(&frame) {
            TrackOutcome::Appended(index) => {
                appended += 1;
                log::debug!("frame t={:.3} appended at record {}", frame.timestamp, index);
            }
            TrackOutcome::Skipped => {
                log::debug!("frame t={:.3} skipped, not enough motion", frame.timestamp);
            }
        }
        ingested += 1;

        if let Some(interval) = config.pause_interval
            && ingested.is_multiple_of(interval)
        {
            registry.request_pause();
            log::debug!("ingest pausing at frame {} for slow consumers", ingested);
            while registry.is_paused() && running.load(Ordering::Relaxed) {
                thread::sleep(config.pause_poll);
            }
        }
    }

    registry.mark_finished(StageRole::Ingest);
    log::info!(
        "ingest finished: {} frames consumed, {} records appended",
        ingested,
        appended
    );
}

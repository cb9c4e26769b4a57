//! Observe stage: visualization and raw-stream display.
//!
//! Everything here is advisory. Render and display failures are logged
//! and swallowed; the loop continues. The stage also services the
//! backpressure contract: when ingest raises the pause latch, observe
//! clears it after completing one service cycle, letting ingest resume
//! once the preview path has caught up.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::stages::{FrameSink, PreviewReceiver, Viewer};
use crate::state::{SharedStateHandle, StageRole, SyncRegistryHandle};

/// Configuration for the observe loop.
#[derive(Debug, Clone)]
pub struct ObserveConfig {
    /// Delay between service cycles when idle.
    pub idle_delay: Duration,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_millis(50),
        }
    }
}

/// Run the observe stage until its upstream set completes.
#[allow(clippy::too_many_arguments)]
pub fn run_observe_loop(
    mut viewer: Option<Box<dyn Viewer>>,
    mut sink: Option<Box<dyn FrameSink>>,
    preview: PreviewReceiver,
    config: ObserveConfig,
    registry: SyncRegistryHandle,
    expected_units: u32,
    shared_state: SharedStateHandle,
    upstreams: Vec<StageRole>,
    running: Arc<AtomicBool>,
    enabled: bool,
) {
    registry.register_trigger();
    if !enabled {
        registry.mark_finished(StageRole::Observe);
        return;
    }
    registry.wait_for_barrier(expected_units);
    log::info!("observe triggered");

    while running.load(Ordering::Relaxed) && !registry.upstreams_finished(&upstreams) {
        while let Ok(frame) = preview.try_recv() {
            if let Some(s) = sink.as_mut()
                && let Err(e) = s.show(&frame)
            {
                log::warn!("stream display error, continuing: {}", e);
            }
        }

        if let Some(v) = viewer.as_mut()
            && let Err(e) = v.render(&shared_state)
        {
            log::warn!("visualization error, continuing: {}", e);
        }

        // Ingest throttles itself for us; release it once this cycle has
        // drained the preview path.
        if registry.is_paused() {
            registry.clear_pause();
        }

        thread::sleep(config.idle_delay);
    }

    registry.mark_finished(StageRole::Observe);
    log::info!("observe finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::create_preview_channel;
    use crate::state::{Counter, create_registry, create_shared_state};

    #[test]
    fn disabled_unit_triggers_and_finishes_immediately() {
        let registry = create_registry();
        let (_tx, rx) = create_preview_channel();
        run_observe_loop(
            None,
            None,
            rx,
            ObserveConfig::default(),
            registry.clone(),
            1,
            create_shared_state(),
            vec![StageRole::Ingest],
            Arc::new(AtomicBool::new(true)),
            false,
        );
        assert_eq!(registry.read(Counter::Triggered), 1);
        assert!(registry.is_finished(StageRole::Observe));
    }
}

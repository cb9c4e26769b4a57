//! Refine stage (global bundle adjustment) and the multiview filter.
//!
//! Both share the generic stage shape; they differ only in upstream set
//! and in whether a final drain pass exists. Refine waits on Ingest and
//! performs one thorough full-trajectory pass after the stream ends. The
//! multiview filter waits on both Ingest and Refine (when launched) and
//! has no drain pass of its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::stages::{Backend, MultiviewFilter};
use crate::state::{SharedStateHandle, StageRole, SyncRegistryHandle};

/// Configuration for the refine loop.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Delay between incremental optimization steps, letting the other
    /// stages' device work breathe.
    pub iteration_delay: Duration,
    /// Step count for the final full-trajectory pass.
    pub final_steps: usize,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            iteration_delay: Duration::from_millis(2000),
            final_steps: 6,
        }
    }
}

/// Run the refine stage until its upstream set completes, then drain.
#[allow(clippy::too_many_arguments)]
pub fn run_refine_loop(
    mut backend: Box<dyn Backend>,
    config: RefineConfig,
    registry: SyncRegistryHandle,
    expected_units: u32,
    shared_state: SharedStateHandle,
    upstreams: Vec<StageRole>,
    running: Arc<AtomicBool>,
    enabled: bool,
) {
    registry.register_trigger();
    if !enabled {
        registry.mark_finished(StageRole::Refine);
        return;
    }
    registry.wait_for_barrier(expected_units);
    log::info!("refine triggered");

    while running.load(Ordering::Relaxed) && !registry.upstreams_finished(&upstreams) {
        backend.act();
        thread::sleep(config.iteration_delay);
    }

    if running.load(Ordering::Relaxed) {
        // One thorough pass now that the full input has arrived.
        let end = shared_state.len();
        log::info!("refine final pass over records [0, {})", end);
        backend.finalize(0, end, config.final_steps);
    }

    registry.mark_finished(StageRole::Refine);
    log::info!("refine finished");
}

/// Run the multiview filter stage until its upstream set completes.
pub fn run_filter_loop(
    mut filter: Box<dyn MultiviewFilter>,
    iteration_delay: Duration,
    registry: SyncRegistryHandle,
    expected_units: u32,
    upstreams: Vec<StageRole>,
    running: Arc<AtomicBool>,
    enabled: bool,
) {
    registry.register_trigger();
    if !enabled {
        registry.mark_finished(StageRole::Filter);
        return;
    }
    registry.wait_for_barrier(expected_units);
    log::info!("multiview filter triggered");

    while running.load(Ordering::Relaxed) && !registry.upstreams_finished(&upstreams) {
        filter.act();
        thread::sleep(iteration_delay);
    }

    registry.mark_finished(StageRole::Filter);
    log::info!("multiview filter finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Counter, create_registry, create_shared_state};

    struct NoopBackend;

    impl Backend for NoopBackend {
        fn act(&mut self) {}
        fn finalize(&mut self, _start: usize, _end: usize, _steps: usize) {}
    }

    struct NoopFilter;

    impl MultiviewFilter for NoopFilter {
        fn act(&mut self) {}
    }

    #[test]
    fn disabled_refine_triggers_and_finishes_immediately() {
        let registry = create_registry();
        run_refine_loop(
            Box::new(NoopBackend),
            RefineConfig::default(),
            registry.clone(),
            1,
            create_shared_state(),
            vec![StageRole::Ingest],
            Arc::new(AtomicBool::new(true)),
            false,
        );
        assert_eq!(registry.read(Counter::Triggered), 1);
        assert!(registry.is_finished(StageRole::Refine));
    }

    #[test]
    fn disabled_filter_triggers_and_finishes_immediately() {
        let registry = create_registry();
        run_filter_loop(
            Box::new(NoopFilter),
            Duration::from_millis(1),
            registry.clone(),
            1,
            vec![StageRole::Ingest],
            Arc::new(AtomicBool::new(true)),
            false,
        );
        assert_eq!(registry.read(Counter::Triggered), 1);
        assert!(registry.is_finished(StageRole::Filter));
    }
}

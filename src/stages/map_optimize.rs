//! Map-optimize stage: drives the Gaussian mapper under resource guard.
//!
//! Every iteration first lets the [`ResourceGuard`] adapt to memory
//! pressure; an absent mapper means the cycle is skipped, never an
//! error. After ingest completes, the stage runs the mapper's final
//! convergence pass to completion, publishes a detached terminal
//! snapshot through the handoff channel, latches finished, and only
//! then waits for the supervisor's acknowledgment so device resources
//! stay alive until delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::pipeline::{HandoffSender, ResourceGuard};
use crate::stages::{MapSnapshot, Mapper};
use crate::state::{StageRole, SyncRegistryHandle};

/// Configuration for the map-optimize loop.
#[derive(Debug, Clone)]
pub struct MapOptimizeConfig {
    /// Delay between incremental mapping steps.
    pub iteration_delay: Duration,
}

impl Default for MapOptimizeConfig {
    fn default() -> Self {
        Self {
            iteration_delay: Duration::from_millis(100),
        }
    }
}

/// Run the map-optimize stage until ingest completes, then drain and
/// hand the terminal snapshot to the supervisor.
#[allow(clippy::too_many_arguments)]
pub fn run_map_optimize_loop(
    mut guard: ResourceGuard<Box<dyn Mapper>>,
    handoff: HandoffSender<MapSnapshot>,
    config: MapOptimizeConfig,
    registry: SyncRegistryHandle,
    expected_units: u32,
    upstreams: Vec<StageRole>,
    running: Arc<AtomicBool>,
    enabled: bool,
) {
    registry.register_trigger();
    if !enabled {
        registry.mark_finished(StageRole::MapOptimize);
        return;
    }
    registry.wait_for_barrier(expected_units);
    log::info!("map optimizer triggered");

    while running.load(Ordering::Relaxed) && !registry.upstreams_finished(&upstreams) {
        guard.check_and_adapt();
        if let Some(mapper) = guard.instance_mut() {
            mapper.act();
        }
        thread::sleep(config.iteration_delay);
    }

    let mut published = false;
    if running.load(Ordering::Relaxed) {
        // Give the guard one last chance to bring the mapper back before
        // the drain pass.
        guard.check_and_adapt();
        if let Some(mapper) = guard.instance_mut() {
            log::info!("map optimizer final convergence pass");
            while !mapper.finalize() {}
            let snapshot = mapper.snapshot();
            match handoff.publish(snapshot) {
                Ok(()) => published = true,
                Err(e) => log::error!("terminal snapshot handoff failed: {}", e),
            }
        } else {
            log::warn!("map optimizer absent at drain time, no terminal snapshot");
        }
    }

    registry.mark_finished(StageRole::MapOptimize);
    log::info!("map optimizer finished");

    if published {
        // Hold device resources until the supervisor has taken delivery.
        handoff.wait_for_ack(|| running.load(Ordering::Relaxed));
    }
}

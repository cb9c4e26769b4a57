//! drishti-slam-node daemon
//!
//! Runs the full stage pipeline over a frame stream, writes the shutdown
//! checkpoint, and evaluates the final trajectory.
//!
//! # Usage
//!
//! ```bash
//! # With default config
//! cargo run --bin drishti-slam-node
//!
//! # With custom config file
//! cargo run --bin drishti-slam-node -- --config drishti-slam.toml
//!
//! # With command line overrides
//! cargo run --bin drishti-slam-node -- --frames 500 --output /tmp/run1
//! ```

use drishti_slam::{
    Collaborators, CsvEvaluator, IngestConfig, LogFrameSink, LogViewer, MapOptimizeConfig,
    Mapper, ObserveConfig, PipelineConfig, RefineConfig, SimBackend, SimFrontend, SimMapper,
    SimMultiviewFilter, SimStream, SimStreamConfig, StaticNet, Supervisor, SystemMemorySampler,
    create_shared_state,
};
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct Config {
    #[serde(default)]
    stages: StagesConfig,
    #[serde(default)]
    stream: StreamConfig,
    #[serde(default)]
    memory: MemoryConfig,
    #[serde(default)]
    timing: TimingConfig,
    #[serde(default)]
    output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StagesConfig {
    run_backend: bool,
    run_multiview_filter: bool,
    run_mapping: bool,
    run_visualization: bool,
    show_stream: bool,
    evaluate: bool,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            run_backend: true,
            run_multiview_filter: true,
            run_mapping: true,
            run_visualization: false,
            show_stream: false,
            evaluate: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct StreamConfig {
    frames: usize,
    frame_dt: f64,
    motion_step: f64,
    with_depth: bool,
    /// Frontend motion-filter threshold (meters).
    min_motion: f64,
    /// Pause ingest every N frames until observe catches up (0 disables).
    pause_interval: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frames: 300,
            frame_dt: 1.0 / 30.0,
            motion_step: 0.05,
            with_depth: true,
            min_motion: 0.02,
            pause_interval: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct MemoryConfig {
    low_watermark: f32,
    high_watermark: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            low_watermark: 0.5,
            high_watermark: 0.9,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TimingConfig {
    refine_delay_ms: u64,
    refine_final_steps: usize,
    filter_delay_ms: u64,
    mapping_delay_ms: u64,
    mapping_final_steps: u32,
    observe_idle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            refine_delay_ms: 2000,
            refine_final_steps: 6,
            filter_delay_ms: 100,
            mapping_delay_ms: 100,
            mapping_final_steps: 3,
            observe_idle_ms: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OutputConfig {
    dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
        }
    }
}

/// Command line arguments
struct Args {
    config_path: Option<String>,
    frames: Option<usize>,
    output_dir: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut result = Args {
        config_path: None,
        frames: None,
        output_dir: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    result.config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--frames" | "-n" => {
                if i + 1 < args.len() {
                    result.frames = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    result.output_dir = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    result
}

fn print_help() {
    println!("drishti-slam-node - dense visual SLAM stage supervisor");
    println!();
    println!("USAGE:");
    println!("    drishti-slam-node [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>     Configuration file (drishti-slam.toml)");
    println!("    -n, --frames <COUNT>    Number of input frames (300)");
    println!("    -o, --output <DIR>      Output directory (output)");
    println!("    -h, --help              Print help information");
}

fn load_config(args: &Args) -> Config {
    let config = match &args.config_path {
        Some(path) => match fs::read_to_string(path) {
            Ok(contents) => match basic_toml::from_str(&contents) {
                Ok(cfg) => {
                    eprintln!("Loaded config from {}", path);
                    cfg
                }
                Err(e) => {
                    eprintln!("Failed to parse config {}: {}", path, e);
                    Config::default()
                }
            },
            Err(e) => {
                eprintln!("Failed to read config {}: {}", path, e);
                Config::default()
            }
        },
        None => {
            // Try default paths
            for path in &["drishti-slam.toml", "/etc/drishti-slam.toml"] {
                if let Ok(contents) = fs::read_to_string(path)
                    && let Ok(cfg) = basic_toml::from_str(&contents)
                {
                    eprintln!("Loaded config from {}", path);
                    return apply_overrides(cfg, args);
                }
            }
            Config::default()
        }
    };

    apply_overrides(config, args)
}

fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(frames) = args.frames {
        config.stream.frames = frames;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    config
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = parse_args();
    let config = load_config(&args);

    log::info!(
        "drishti-slam-node starting: {} frames, stages backend={} filter={} mapping={} viz={}",
        config.stream.frames,
        config.stages.run_backend,
        config.stages.run_multiview_filter,
        config.stages.run_mapping,
        config.stages.run_visualization,
    );

    // Shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    }) {
        log::warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let output_dir = PathBuf::from(&config.output.dir);
    let pipeline_config = PipelineConfig {
        run_backend: config.stages.run_backend,
        run_multiview_filter: config.stages.run_multiview_filter,
        run_mapping: config.stages.run_mapping,
        run_visualization: config.stages.run_visualization,
        show_stream: config.stages.show_stream,
        evaluate: config.stages.evaluate,
        output_dir: output_dir.clone(),
        low_watermark: config.memory.low_watermark,
        high_watermark: config.memory.high_watermark,
        ingest: IngestConfig {
            pause_interval: (config.stream.pause_interval > 0)
                .then_some(config.stream.pause_interval),
            ..Default::default()
        },
        refine: RefineConfig {
            iteration_delay: Duration::from_millis(config.timing.refine_delay_ms),
            final_steps: config.timing.refine_final_steps,
        },
        filter_iteration_delay: Duration::from_millis(config.timing.filter_delay_ms),
        map_optimize: MapOptimizeConfig {
            iteration_delay: Duration::from_millis(config.timing.mapping_delay_ms),
        },
        observe: ObserveConfig {
            idle_delay: Duration::from_millis(config.timing.observe_idle_ms),
        },
        ..Default::default()
    };

    let shared_state = create_shared_state();
    let supervisor =
        Supervisor::new(pipeline_config, shared_state.clone()).with_run_flag(running);

    let stream = Box::new(SimStream::new(SimStreamConfig {
        frames: config.stream.frames,
        frame_dt: config.stream.frame_dt,
        motion_step: config.stream.motion_step,
        with_depth: config.stream.with_depth,
    }));

    let mapper_state = shared_state.clone();
    let mapping_final_steps = config.timing.mapping_final_steps;
    let collaborators = Collaborators {
        frontend: Box::new(SimFrontend::new(shared_state.clone(), config.stream.min_motion)),
        backend: Some(Box::new(SimBackend::new(shared_state.clone()))),
        filter: Some(Box::new(SimMultiviewFilter::new(shared_state.clone()))),
        mapper_factory: Some(Box::new(move || {
            Box::new(SimMapper::new(mapper_state.clone(), mapping_final_steps))
                as Box<dyn Mapper>
        })),
        memory_sampler: Box::new(SystemMemorySampler::new()),
        viewer: Some(Box::new(LogViewer::new())),
        frame_sink: Some(Box::new(LogFrameSink::new())),
        evaluator: Some(Box::new(CsvEvaluator::new(output_dir))),
        net: Arc::new(StaticNet::new(vec![0u8; 64])),
    };

    match supervisor.run(stream, collaborators) {
        Ok(report) => {
            log::info!(
                "run complete: {} records, checkpoint at {}",
                report.frames,
                report.checkpoint_path.display()
            );
            if let Some(snapshot) = report.snapshot {
                log::info!("map snapshot: {} frames", snapshot.frame_count);
            }
        }
        Err(e) => {
            log::error!("pipeline failed: {}", e);
            std::process::exit(1);
        }
    }
}

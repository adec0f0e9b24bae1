//! `fieldbot` – field painting robot controller.
//!
//! This binary is the composition root.  It:
//!
//! 1. Loads `~/.fieldbot/config.toml`, writing the defaults on first run.
//! 2. Starts the obstacle monitor thread and the actuation worker thread.
//! 3. Serves the operator command channel on the configured address.
//! 4. Intercepts **Ctrl-C** to abort the running pattern, emergency-stop
//!    the drive and exit.
//!
//! The drive, heading sensor, LiDAR and battery are the simulated drivers
//! from `fieldbot_hal::sim`; real drivers plug in behind the same traits.

mod config;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use colored::Colorize;
use fieldbot_hal::BatterySource;
use fieldbot_hal::sim::{SimBattery, SimHeading, SimLidar, SimRig};
use fieldbot_kernel::{ObstacleMonitor, SafetyState};
use fieldbot_middleware::CommandChannel;
use fieldbot_runtime::{ActuationHandle, MotionExecutor, PatternRunner, init_tracing, spawn_worker};
use fieldbot_types::FieldError;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::FieldbotConfig;

const ACTUATION_QUEUE_DEPTH: usize = 32;

/// Forward distance the simulated LiDAR reports: open field.
const SIM_CLEAR_DISTANCE_MM: f64 = 5000.0;

/// Simulated actuator commands kept in memory; older ones are discarded.
const SIM_LOG_CAPACITY: usize = 1024;

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); FIELDBOT_LOG_FORMAT=json switches to
    // JSON lines; OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _otel = init_tracing("fieldbot");

    print_banner();

    let path = config::config_path();
    let cfg = match config::load_or_init(&path) {
        Ok((cfg, true)) => {
            println!(
                "  {} Default config written to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            cfg
        }
        Ok((cfg, false)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = FieldbotConfig::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if let Err(e) = cfg.validate() {
        error!(error = %e, "refusing to start with invalid configuration");
        println!("{}: {}", "Invalid configuration".red().bold(), e);
        return ExitCode::FAILURE;
    }

    match run(cfg) {
        Ok(()) => {
            println!("{}", "  ✓ Drive stopped. Exiting fieldbot.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fieldbot stopped with an error");
            println!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: FieldbotConfig) -> Result<(), FieldError> {
    let safety = Arc::new(SafetyState::new());

    // ── Obstacle monitor ──────────────────────────────────────────────────
    let lidar = SimLidar::new(SIM_CLEAR_DISTANCE_MM);
    let monitor_stop = Arc::new(AtomicBool::new(false));
    let monitor = ObstacleMonitor::new(lidar.connector(), Arc::clone(&safety), cfg.monitor.monitor_config())
        .spawn(Arc::clone(&monitor_stop))
        .map_err(|e| FieldError::hardware("obstacle_monitor", e.to_string()))?;

    // ── Actuation worker ──────────────────────────────────────────────────
    let (drive, _log) = SimRig::new().with_log_capacity(SIM_LOG_CAPACITY).build();
    let executor = MotionExecutor::new(drive, SimHeading::constant(0.0), cfg.calibration.clone(), Arc::clone(&safety));
    let runner = PatternRunner::new(executor, Arc::clone(&safety)).with_inter_step_pause(cfg.runner.inter_step_pause());
    let (actuation, worker) =
        spawn_worker(runner, ACTUATION_QUEUE_DEPTH).map_err(|e| FieldError::hardware("actuation_worker", e.to_string()))?;

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let stop_serving = Arc::new(Notify::new());
    let stop_slot = Arc::new(Mutex::new(Some(actuation.clone())));
    install_ctrlc_handler(shutdown.clone(), Arc::clone(&stop_slot), Arc::clone(&stop_serving));

    // ── Command channel ───────────────────────────────────────────────────
    let battery: Arc<dyn BatterySource> = Arc::new(SimBattery::new(100.0));
    let channel = CommandChannel::new(
        cfg.channel.channel_config(),
        cfg.parser.clone(),
        actuation,
        Arc::clone(&safety),
        battery,
    )
    .with_shutdown_token(shutdown);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| FieldError::Config(format!("cannot start async runtime: {e}")))?;

    println!(
        "  Listening for the operator on {}\n",
        cfg.channel.listen_addr.bold().cyan()
    );
    let served = runtime.block_on(channel.bind_and_serve(cfg.channel.listen_addr.as_str(), async move {
        stop_serving.notified().await;
    }));
    runtime.shutdown_timeout(Duration::from_secs(1));

    // Dropping the last handle closes the queue; the worker emergency-stops
    // the drive and exits.
    drop(take_handle(&stop_slot));
    if worker.join().is_err() {
        error!("actuation worker panicked");
    }
    monitor_stop.store(true, Ordering::SeqCst);
    if monitor.join().is_err() {
        error!("obstacle monitor panicked");
    }
    info!("shutdown complete");
    served
}

/// Ctrl-C: cancel whatever runs, queue an emergency stop, stop serving.
fn install_ctrlc_handler(shutdown: CancellationToken, slot: Arc<Mutex<Option<ActuationHandle>>>, stop_serving: Arc<Notify>) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());

        shutdown.cancel();
        if let Some(handle) = take_handle(&slot) {
            match handle.request_emergency_stop() {
                Ok(()) => println!("{}", "  ✓ Emergency stop queued.".green()),
                Err(e) => warn!(error = %e, "could not queue emergency stop"),
            }
        }
        stop_serving.notify_one();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the drive gracefully");
    }
}

fn take_handle(slot: &Mutex<Option<ActuationHandle>>) -> Option<ActuationHandle> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ____ _      __   __ __          __ "#.bold().green());
    println!("{}", r#"  / __/(_)__  / /__/ // /  ___  __/ /_"#.bold().green());
    println!("{}", r#" / _/ / / -_)/ / _  // _ \/ _ \/_  __/"#.bold().green());
    println!("{}", r#"/_/  /_/\__//_/\_,_//_.__/\___/ /_/   "#.bold().green());
    println!();
    println!("  {} {}", "fieldbot".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Field painting robot controller");
    println!();
}

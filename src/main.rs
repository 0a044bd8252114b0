//! vimana-io - Drone transport daemon
//!
//! Connects the command link, starts the video pipeline, and supervises
//! the vehicle: periodic pose logging, geofence monitoring, and an
//! automatic return-home when the vehicle strays too far.

use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use vimana_io::{AppConfig, DroneBridge, Result};

const MAIN_LOOP_TICK: Duration = Duration::from_millis(200);
const POSE_LOG_INTERVAL: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Parse config path from command line arguments.
///
/// Supports:
/// - `vimana-io <path>` (positional)
/// - `vimana-io --config <path>` (flag-based)
/// - `vimana-io -c <path>` (short flag)
///
/// Defaults to `/etc/vimana-io.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/vimana-io.toml".to_string()
}

/// Spawn a thread that flips the shutdown flag on SIGINT/SIGTERM
fn setup_signal_handler(shutdown: Arc<AtomicBool>) {
    std::thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            let mut signals =
                Signals::new([SIGINT, SIGTERM]).expect("Failed to register signal handlers");

            if let Some(sig) = signals.forever().next() {
                info!("Received signal {:?}, initiating shutdown...", sig);
                shutdown.store(true, Ordering::Relaxed);
            }
        })
        .expect("Failed to spawn signal handler thread");
}

/// Sleep in short slices so shutdown stays responsive
fn sleep_unless_shutdown(shutdown: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !shutdown.load(Ordering::Relaxed) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn main() -> Result<()> {
    let config_path = parse_config_path();

    // Logger level comes from the config file, so load before init and
    // replay any load failure as a warning afterwards
    let (config, load_error) = match AppConfig::load(&config_path) {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            (config, Some(e))
        }
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.clone()),
    )
    .init();

    info!("VimanaIO v{} starting...", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => info!("Using config: {}", config_path),
        Some(e) => warn!(
            "could not load config from {}: {} (using defaults)",
            config_path, e
        ),
    }
    info!(
        "Vehicle: {} (geofence {} cm, video port {})",
        config.drone.address, config.geofence.max_distance_cm, config.video.bind_port
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handler(Arc::clone(&shutdown));

    let bridge = DroneBridge::new(config)?;

    // Connect with retry until the vehicle answers or we are told to stop
    while !shutdown.load(Ordering::Relaxed) {
        if bridge.connect() {
            break;
        }
        warn!("connect failed, retrying in {:?}", RECONNECT_DELAY);
        sleep_unless_shutdown(&shutdown, RECONNECT_DELAY);
    }

    if bridge.is_connected() {
        info!("✓ Command link established");

        if bridge.send_command("streamon", None).is_none() {
            warn!("streamon not acknowledged, starting video pipeline anyway");
        }
        if bridge.start_video() {
            info!("✓ Video pipeline started");
        } else {
            warn!("video pipeline failed to start");
        }

        info!("VimanaIO running. Press Ctrl-C to stop.");

        let mut last_pose_log = Instant::now();
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(MAIN_LOOP_TICK);

            if let Some(pos) = bridge.position() {
                if last_pose_log.elapsed() >= POSE_LOG_INTERVAL {
                    info!(
                        "pose: x={:.0} y={:.0} z={:.0} yaw={:.0} dist={:.0}/{:.0} cm, video active: {}",
                        pos.x,
                        pos.y,
                        pos.z,
                        pos.yaw,
                        pos.distance_from_home,
                        pos.max_distance_cm,
                        bridge.has_ever_received_frame()
                    );
                    last_pose_log = Instant::now();
                }

                if pos.armed && bridge.should_return_home() {
                    warn!(
                        "geofence exceeded ({:.0} cm from home), returning",
                        pos.distance_from_home
                    );
                    let acknowledged = bridge.execute_return_home();
                    if acknowledged == 0 {
                        warn!("return-home made no progress, will retry");
                        sleep_unless_shutdown(&shutdown, RECONNECT_DELAY);
                    }
                }
            }
        }
    }

    info!("Shutting down...");
    debug!("stopping video pipeline");
    bridge.stop_video();
    bridge.disconnect();
    info!("VimanaIO stopped");
    Ok(())
}

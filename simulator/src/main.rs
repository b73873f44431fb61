mod hardware;

use anyhow::{bail, Context};
use clap::Parser;
use hardware::{SimBattery, SimModem, SimReceiver};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracker::config::{GpsConfig, SleepPolicy, UplinkConfig};
use tracker::store::{FileStore, MemoryStore, StateStore};
use tracker::{Clock, DeviceStatus, DutyCycleScheduler, ManualClock, SystemClock, TrackerConfig};

/// Runs the tracker duty cycle against simulated hardware.
#[derive(Parser, Debug)]
#[command(version, about = "Asset tracker simulator", long_about = None)]
struct Args {
    /// Endpoint telemetry is posted to
    #[arg(long, env = "UPLINK_URL", default_value = "http://localhost:8080/tracker-update")]
    uplink_url: String,

    #[arg(long, env = "DEVICE_ID", default_value = "GPS001")]
    device_id: String,

    /// Number of cycles to run; runs forever when omitted
    #[arg(long, env = "CYCLES")]
    cycles: Option<u64>,

    /// Use a virtual clock so sleeps and backoff return immediately
    #[arg(long, env = "ACCELERATED")]
    accelerated: bool,

    /// Simulate HTTP responses instead of posting to the uplink URL
    #[arg(long, env = "OFFLINE")]
    offline: bool,

    /// File holding the persisted status record; kept in memory when omitted
    #[arg(long, env = "STATE_FILE")]
    state_file: Option<PathBuf>,

    #[arg(long, env = "SEED")]
    seed: Option<u64>,

    #[arg(long, env = "MIN_SLEEP_SECS", default_value_t = 60)]
    min_sleep_secs: u64,

    #[arg(long, env = "MAX_SLEEP_SECS", default_value_t = 3_000)]
    max_sleep_secs: u64,

    #[arg(long, env = "SLEEP_IN_TRANSIT_SECS", default_value_t = 300)]
    sleep_in_transit_secs: u64,

    #[arg(long, env = "SLEEP_IN_STORAGE_SECS", default_value_t = 1_800)]
    sleep_in_storage_secs: u64,

    #[arg(long, env = "SLEEP_INSTALLED_OFF_SECS", default_value_t = 2_700)]
    sleep_installed_off_secs: u64,

    #[arg(long, env = "SLEEP_DETACHED_SECS", default_value_t = 600)]
    sleep_detached_secs: u64,

    #[arg(long, env = "FAILURE_EXTENSION_PERCENT", default_value_t = 50)]
    failure_extension_percent: u8,

    #[arg(long, env = "GPS_TIMEOUT_MS", default_value_t = 60_000)]
    gps_timeout_ms: u64,

    #[arg(long, env = "GPS_POLL_INTERVAL_MS", default_value_t = 1_000)]
    gps_poll_interval_ms: u64,

    #[arg(long, env = "LOW_BATTERY_THRESHOLD", default_value_t = 10)]
    low_battery_threshold: u8,

    #[arg(long, env = "BATTERY_READ_TIMEOUT_MS", default_value_t = 2_000)]
    battery_read_timeout_ms: u64,

    #[arg(long, env = "MAX_NETWORK_RETRIES", default_value_t = 3)]
    max_network_retries: u32,

    #[arg(long, env = "MAX_SESSION_RETRIES", default_value_t = 3)]
    max_session_retries: u32,

    #[arg(long, env = "MAX_SEND_RETRIES", default_value_t = 3)]
    max_send_retries: u32,

    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 1_000)]
    backoff_base_ms: u64,

    #[arg(long, env = "BACKOFF_MAX_MS", default_value_t = 8_000)]
    backoff_max_ms: u64,

    #[arg(long, env = "BACKOFF_MULTIPLIER", default_value_t = 2)]
    backoff_multiplier: u32,

    #[arg(long, env = "ATTACH_TIMEOUT_MS", default_value_t = 30_000)]
    attach_timeout_ms: u64,

    #[arg(long, env = "SESSION_TIMEOUT_MS", default_value_t = 15_000)]
    session_timeout_ms: u64,

    #[arg(long, env = "SEND_TIMEOUT_MS", default_value_t = 10_000)]
    send_timeout_ms: u64,

    #[arg(long, env = "POWER_DOWN_TIMEOUT_MS", default_value_t = 5_000)]
    power_down_timeout_ms: u64,

    /// Starting position of the simulated asset
    #[arg(long, default_value_t = 28.6139, allow_hyphen_values = true)]
    start_latitude: f64,

    #[arg(long, default_value_t = 77.2090, allow_hyphen_values = true)]
    start_longitude: f64,

    /// Chance that a single receiver poll yields a fix
    #[arg(long, env = "SIM_FIX_PROBABILITY", default_value_t = 0.1)]
    fix_probability: f64,

    #[arg(long, env = "SIM_ATTACH_SUCCESS", default_value_t = 0.8)]
    attach_success: f64,

    #[arg(long, env = "SIM_SESSION_SUCCESS", default_value_t = 0.9)]
    session_success: f64,

    #[arg(long, env = "SIM_BATTERY_START", default_value_t = 100.0)]
    battery_start: f64,

    #[arg(long, env = "SIM_BATTERY_DRAIN", default_value_t = 0.5)]
    battery_drain: f64,

    /// Chance per cycle that an external status change is signalled
    #[arg(long, env = "SIM_STATUS_CHANGE", default_value_t = 0.1)]
    status_change_probability: f64,
}

impl Args {
    fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            device_id: self.device_id.clone(),
            low_battery_threshold: self.low_battery_threshold,
            battery_read_timeout_ms: self.battery_read_timeout_ms,
            sleep: SleepPolicy {
                min_secs: self.min_sleep_secs,
                max_secs: self.max_sleep_secs,
                in_transit_secs: self.sleep_in_transit_secs,
                in_storage_secs: self.sleep_in_storage_secs,
                installed_off_secs: self.sleep_installed_off_secs,
                detached_secs: self.sleep_detached_secs,
                failure_extension_percent: self.failure_extension_percent,
            },
            gps: GpsConfig {
                acquisition_timeout_ms: self.gps_timeout_ms,
                poll_interval_ms: self.gps_poll_interval_ms,
            },
            uplink: UplinkConfig {
                url: self.uplink_url.clone(),
                max_network_retries: self.max_network_retries,
                max_session_retries: self.max_session_retries,
                max_send_retries: self.max_send_retries,
                backoff_base_ms: self.backoff_base_ms,
                backoff_max_ms: self.backoff_max_ms,
                backoff_multiplier: self.backoff_multiplier,
                attach_timeout_ms: self.attach_timeout_ms,
                session_timeout_ms: self.session_timeout_ms,
                send_timeout_ms: self.send_timeout_ms,
                power_down_timeout_ms: self.power_down_timeout_ms,
            },
        }
    }

    fn check_probabilities(&self) -> anyhow::Result<()> {
        let probabilities = [
            ("fix-probability", self.fix_probability),
            ("attach-success", self.attach_success),
            ("session-success", self.session_success),
            ("status-change-probability", self.status_change_probability),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                bail!("--{} must be within [0, 1], got {}", name, p);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting tracker simulator");
    info!(
        "Device: {}, Uplink: {}, Cycles: {}, Accelerated: {}, Offline: {}",
        args.device_id,
        args.uplink_url,
        args.cycles.map_or("unbounded".to_string(), |n| n.to_string()),
        args.accelerated,
        args.offline
    );

    args.check_probabilities()?;

    match (args.state_file.clone(), args.accelerated) {
        (Some(path), true) => simulate(&args, FileStore::new(path), ManualClock::default()).await,
        (Some(path), false) => simulate(&args, FileStore::new(path), SystemClock).await,
        (None, true) => simulate(&args, MemoryStore::default(), ManualClock::default()).await,
        (None, false) => simulate(&args, MemoryStore::default(), SystemClock).await,
    }
}

async fn simulate<S: StateStore, C: Clock>(args: &Args, store: S, clock: C) -> anyhow::Result<()> {
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let receiver = SimReceiver::new(
        StdRng::from_rng(&mut rng).unwrap_or_else(|_| StdRng::seed_from_u64(1)),
        args.start_latitude,
        args.start_longitude,
        args.fix_probability,
        0.01,
    );
    let battery = SimBattery::new(
        StdRng::from_rng(&mut rng).unwrap_or_else(|_| StdRng::seed_from_u64(2)),
        args.battery_start,
        args.battery_drain,
        0.02,
    );
    let modem = SimModem::new(
        StdRng::from_rng(&mut rng).unwrap_or_else(|_| StdRng::seed_from_u64(3)),
        args.attach_success,
        args.session_success,
        args.offline,
        Duration::from_millis(args.send_timeout_ms),
    );

    let mut scheduler = DutyCycleScheduler::new(
        args.tracker_config(),
        battery,
        receiver,
        modem,
        store,
        clock,
    )
    .context("Refusing to start")?;

    let mut completed = 0u64;
    let mut delivered = 0u64;

    while args.cycles.map_or(true, |limit| completed < limit) {
        if rng.gen_bool(args.status_change_probability) {
            let requested = random_status(&mut rng);
            if let Err(e) = scheduler.set_status(requested) {
                warn!("External status signal ignored: {}", e);
            }
        }

        let report = scheduler.run_cycle().await;
        completed += 1;
        if report.delivered() {
            delivered += 1;
        }

        if completed % 10 == 0 {
            info!("Completed {} cycles, {} delivered", completed, delivered);
        }
    }

    info!(
        "Simulation finished: {} cycles, {} delivered, last delivery {}",
        completed,
        delivered,
        scheduler
            .last_success()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}

/// Mostly valid status names, with the odd garbled signal.
fn random_status(rng: &mut impl Rng) -> &'static str {
    if rng.gen_bool(0.05) {
        return "unknown";
    }
    DeviceStatus::ALL[rng.gen_range(0..DeviceStatus::ALL.len())].as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["simulator"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_default_args_give_valid_config() {
        assert!(args(&[]).tracker_config().validate().is_ok());
    }

    #[test]
    fn test_bad_sleep_bounds_rejected() {
        let config = args(&["--min-sleep-secs", "5000"]).tracker_config();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_probability_out_of_range() {
        assert!(args(&["--fix-probability", "1.5"]).check_probabilities().is_err());
    }

    #[test]
    fn test_accelerated_offline_run_completes() {
        tokio_test::block_on(async {
            let args = args(&["--cycles", "5", "--seed", "42", "--offline", "--accelerated"]);
            simulate(&args, MemoryStore::default(), ManualClock::default())
                .await
                .unwrap();
        });
    }

    #[test]
    fn test_invalid_config_refuses_to_start() {
        tokio_test::block_on(async {
            let args = args(&["--device-id", "gps-1", "--cycles", "1", "--offline", "--accelerated"]);
            let err = simulate(&args, MemoryStore::default(), ManualClock::default())
                .await
                .unwrap_err();
            assert!(err.to_string().contains("Refusing to start"));
        });
    }

    #[test]
    fn test_timeouts_exposed_as_flags() {
        let config = args(&[
            "--attach-timeout-ms",
            "100",
            "--session-timeout-ms",
            "200",
            "--power-down-timeout-ms",
            "300",
            "--battery-read-timeout-ms",
            "400",
        ])
        .tracker_config();
        assert_eq!(config.uplink.attach_timeout_ms, 100);
        assert_eq!(config.uplink.session_timeout_ms, 200);
        assert_eq!(config.uplink.power_down_timeout_ms, 300);
        assert_eq!(config.battery_read_timeout_ms, 400);
    }
}

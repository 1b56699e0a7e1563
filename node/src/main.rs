//! Virtual RF Node Application
//!
//! Stand-alone driver for the IPC radio front end: opens a device in the
//! selected role, paces a per-TTI tone transmission against the subframe
//! clock, drains the receive side and reports the link counters. Run one
//! base-station node and one mobile node (or a single loopback node) to
//! soak the link without a protocol stack on top.

mod config;

use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use num_complex::Complex32;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::NodeRole;
use radio::{DeviceConfig, FatalPolicy, RadioDevice};

/// Subframes of lead time given to every transmission, mirroring the
/// scheduling advance a protocol stack runs with.
const TX_LEAD_TTIS: u32 = 4;

const STATS_LOG_EVERY: u64 = 1000;

/// IPC virtual RF node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Node role (base-station, mobile, loopback)
    #[arg(short, long)]
    role: Option<String>,

    /// Sample rate in Hz for both directions
    #[arg(long)]
    srate: Option<f64>,

    /// Transmit gain in dB
    #[arg(long)]
    tx_gain: Option<f64>,

    /// Receive gain in dB
    #[arg(long)]
    rx_gain: Option<f64>,

    /// Seconds to run, 0 runs until interrupted
    #[arg(long, default_value = "0")]
    duration: u64,

    /// SCHED_RR priority for the receive worker
    #[arg(long)]
    rt_priority: Option<u8>,
}

/// One subframe of a constant complex tone at 1/32 of the sample rate.
fn tone_subframe(len: usize) -> Vec<Complex32> {
    let phase_step = 2.0 * PI / 32.0;
    (0..len)
        .map(|n| {
            let phase = phase_step * n as f32;
            Complex32::new(0.5 * phase.cos(), 0.5 * phase.sin())
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let mut cfg = match &args.config {
        Some(path) => config::load(path)?,
        None => config::NodeConfig::default(),
    };

    // CLI flags override the file
    if let Some(role) = &args.role {
        cfg.device.role = role.parse::<NodeRole>()?;
    }
    if let Some(srate) = args.srate {
        cfg.device.srate = srate;
    }
    if let Some(gain) = args.tx_gain {
        cfg.device.tx_gain = gain;
    }
    if let Some(gain) = args.rx_gain {
        cfg.device.rx_gain = gain;
    }
    if let Some(priority) = args.rt_priority {
        cfg.device.realtime_priority = Some(priority);
    }

    info!("Starting IPC virtual RF node");
    info!("  Role: {}", cfg.device.role);
    info!("  Sample rate: {} MHz", cfg.device.srate / 1e6);
    info!("  Queue capacity: {} subframes", cfg.device.queue_capacity);
    info!("  Time scale: {}", cfg.device.time_scale);

    let device_cfg = DeviceConfig {
        role: cfg.device.role,
        queue_capacity: cfg.device.queue_capacity,
        time_scale: cfg.device.time_scale,
        realtime_priority: cfg.device.realtime_priority,
        server_path: cfg.device.server_sock.clone(),
        client_path: cfg.device.client_sock.clone(),
        // A stand-alone node cannot run usefully past a configuration
        // failure, terminate the way a deployment expects.
        fatal_policy: FatalPolicy::Exit,
        ..DeviceConfig::default()
    };

    let mut dev = RadioDevice::open(device_cfg)?;
    dev.set_rx_gain(cfg.device.rx_gain);
    dev.set_tx_gain(cfg.device.tx_gain);
    dev.set_rx_sample_rate(cfg.device.srate);
    dev.set_tx_sample_rate(cfg.device.srate);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })?;
    }

    dev.start_rx_stream();

    let sf_len = (cfg.device.srate / 1000.0) as usize;
    let tone = tone_subframe(sf_len);
    let mut rx_buf = vec![Complex32::new(0.0, 0.0); sf_len];
    let tx_lead = Duration::from_millis(u64::from(TX_LEAD_TTIS * cfg.device.time_scale));

    // Only the mobile side may park in recv, it follows the base
    // station's cadence. Loopback paces itself and must keep sending.
    let wait_for_rx = cfg.device.role.is_mobile();

    let started = Instant::now();
    let mut tti_count: u64 = 0;

    info!("link running, interrupt to stop");

    while running.load(Ordering::Acquire)
        && (args.duration == 0 || started.elapsed().as_secs() < args.duration)
    {
        let recv = dev.recv(&mut rx_buf, wait_for_rx)?;
        if recv.delivered > 0 {
            let avg_power: f32 = rx_buf.iter().map(|s| s.norm_sqr()).sum::<f32>()
                / recv.delivered as f32;
            debug!(
                delivered = recv.delivered,
                timestamp = %recv.timestamp,
                avg_power_db = 10.0 * avg_power.log10(),
                "rx subframe"
            );
        }

        let target = dev.get_time() + tx_lead;
        dev.send(&tone, Some(target), tti_count == 0, false)?;

        tti_count += 1;
        if tti_count % STATS_LOG_EVERY == 0 {
            info!(ttis = tti_count, stats = ?dev.stats(), "link status");
        }
    }

    info!(ttis = tti_count, stats = ?dev.stats(), "shutting down");
    dev.close();

    Ok(())
}

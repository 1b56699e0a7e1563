//! Radio Device Handle
//!
//! The owned handle returned by [`RadioDevice::open`]. Opening establishes
//! the IPC transport and spawns the receive worker; everything after that
//! goes through the handle: timed send/receive, gain/rate/frequency and
//! calibration accessors, the TTI clock and the link counters.
//!
//! Exactly two threads ever touch a device: the caller's thread and the
//! receive worker. Caller-only state (gains, rates, the clock, the send
//! staging buffer) lives directly on the handle behind `&mut self`; only
//! the ring, the running flag and the receive counters are shared.

use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::BytesMut;
use common::{NodeRole, RadioTime, RfCalibration};
use num_complex::Complex32;
use tracing::{debug, error, info, warn};

use crate::clock::TtiClock;
use crate::config::{DeviceConfig, FatalPolicy};
use crate::queue::SubframeQueue;
use crate::resample::resample;
use crate::transport::{IpcTransport, SendOutcome};
use crate::wire::{self, encode_samples, BurstFlags, FrameHeader};
use crate::worker::{self, RxCounters, RxShared};
use crate::RadioError;

const DEVICE_NAME: &str = "ipcrf";

/// Reported until real signal accounting exists.
const PLACEHOLDER_RSSI: f32 = -33.0;

/// Cell-search rate, the rate stacks probe at before configuring one.
const DEFAULT_SAMPLE_RATE: f64 = 1.92e6;

const TX_OK_LOG_EVERY: u64 = 100;
const TX_LATE_LOG_EVERY: u64 = 100;
const TX_ERROR_LOG_EVERY: u64 = 1000;

/// Snapshot of the per-direction counters, the primary observability
/// surface of the link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub tx_ok: u64,
    pub tx_late: u64,
    pub tx_discarded: u64,
    pub tx_errors: u64,
    pub rx_ok: u64,
    pub rx_late: u64,
    pub rx_errors: u64,
}

/// Outcome of one receive call.
#[derive(Debug, Clone, Copy)]
pub struct Recv {
    /// Samples actually taken off the queue. The output buffer is always
    /// filled to its full length, with silence standing in for the rest.
    pub delivered: usize,
    /// Target TTI of the last consumed subframe, or the current TTI when
    /// nothing was consumed.
    pub timestamp: RadioTime,
}

/// One virtual RF front end instance.
pub struct RadioDevice {
    config: DeviceConfig,
    transport: IpcTransport,
    clock: TtiClock,
    shared: Arc<RxShared>,
    worker: Option<JoinHandle<()>>,

    rx_gain: f64,
    tx_gain: f64,
    rx_srate: f64,
    tx_srate: f64,
    rx_freq: f64,
    tx_freq: f64,
    master_clock_rate: f64,
    rx_cal: RfCalibration,
    tx_cal: RfCalibration,

    tx_seqnum: u64,
    tx_ok: u64,
    tx_late: u64,
    tx_discarded: u64,
    tx_errors: u64,

    /// Reusable datagram assembly buffer for the send path
    staging: BytesMut,
}

impl RadioDevice {
    /// Validate the configuration, open the transport and spawn the
    /// receive worker.
    pub fn open(config: DeviceConfig) -> Result<Self, RadioError> {
        config.validate()?;

        let transport = IpcTransport::open(
            config.role,
            config.server_path.as_deref(),
            config.client_path.as_deref(),
        )?;

        let clock = TtiClock::new(config.time_scale);

        let shared = Arc::new(RxShared {
            queue: SubframeQueue::new(config.queue_capacity),
            running: AtomicBool::new(true),
            counters: RxCounters::default(),
            tti_step_micros: clock.step_micros(),
        });

        let max_payload_bytes = config.max_subframe_samples * wire::BYTES_PER_SAMPLE;
        let rx_socket = transport.try_clone_rx()?;
        let worker = worker::spawn(
            rx_socket,
            Arc::clone(&shared),
            max_payload_bytes,
            config.realtime_priority,
        )?;

        info!(role = %config.role, queue_capacity = config.queue_capacity,
              "radio device open");

        Ok(Self {
            staging: BytesMut::with_capacity(wire::HEADER_LEN + max_payload_bytes),
            config,
            transport,
            clock,
            shared,
            worker: Some(worker),
            rx_gain: 0.0,
            tx_gain: 0.0,
            rx_srate: DEFAULT_SAMPLE_RATE,
            tx_srate: DEFAULT_SAMPLE_RATE,
            rx_freq: 0.0,
            tx_freq: 0.0,
            master_clock_rate: 0.0,
            rx_cal: RfCalibration::default(),
            tx_cal: RfCalibration::default(),
            tx_seqnum: 0,
            tx_ok: 0,
            tx_late: 0,
            tx_discarded: 0,
            tx_errors: 0,
        })
    }

    /// Stop the worker and release the transport.
    pub fn close(mut self) {
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.shared.running.store(false, Ordering::Release);
            self.transport.shutdown_rx();
            if handle.join().is_err() {
                warn!("rx worker panicked during shutdown");
            }
            info!(stats = ?self.stats(), "radio device closed");
        }
    }

    /// Route a configuration-fatal condition per the configured policy.
    fn fatal<T>(&self, err: RadioError) -> Result<T, RadioError> {
        if self.config.fatal_policy == FatalPolicy::Exit {
            error!("fatal radio error: {err}");
            process::exit(1);
        }
        Err(err)
    }

    pub fn device_name(&self) -> &'static str {
        DEVICE_NAME
    }

    pub fn role(&self) -> NodeRole {
        self.config.role
    }

    /// Start the subframe clock, second-aligned. May sleep up to a second.
    pub fn start_rx_stream(&mut self) {
        self.clock.start();
    }

    pub fn stop_rx_stream(&mut self) {
        self.clock.stop();
    }

    /// The TTI currently being served.
    pub fn get_time(&self) -> RadioTime {
        self.clock.this_tti()
    }

    pub fn set_rx_gain(&mut self, gain: f64) -> f64 {
        info!(from = self.rx_gain, to = gain, "rx gain");
        self.rx_gain = gain;
        self.rx_gain
    }

    pub fn set_tx_gain(&mut self, gain: f64) -> f64 {
        info!(from = self.tx_gain, to = gain, "tx gain");
        self.tx_gain = gain;
        self.tx_gain
    }

    pub fn rx_gain(&self) -> f64 {
        self.rx_gain
    }

    pub fn tx_gain(&self) -> f64 {
        self.tx_gain
    }

    pub fn set_rx_sample_rate(&mut self, rate: f64) -> f64 {
        info!(from_mhz = self.rx_srate / 1e6, to_mhz = rate / 1e6, "rx sample rate");
        self.rx_srate = rate;
        self.rx_srate
    }

    pub fn set_tx_sample_rate(&mut self, rate: f64) -> f64 {
        info!(from_mhz = self.tx_srate / 1e6, to_mhz = rate / 1e6, "tx sample rate");
        self.tx_srate = rate;
        self.tx_srate
    }

    pub fn rx_sample_rate(&self) -> f64 {
        self.rx_srate
    }

    pub fn tx_sample_rate(&self) -> f64 {
        self.tx_srate
    }

    pub fn set_rx_freq(&mut self, freq: f64) -> f64 {
        info!(from_mhz = self.rx_freq / 1e6, to_mhz = freq / 1e6, "rx center frequency");
        self.rx_freq = freq;
        self.rx_freq
    }

    pub fn set_tx_freq(&mut self, freq: f64) -> f64 {
        info!(from_mhz = self.tx_freq / 1e6, to_mhz = freq / 1e6, "tx center frequency");
        self.tx_freq = freq;
        self.tx_freq
    }

    pub fn rx_freq(&self) -> f64 {
        self.rx_freq
    }

    pub fn tx_freq(&self) -> f64 {
        self.tx_freq
    }

    pub fn set_master_clock_rate(&mut self, rate: f64) {
        debug!(from_mhz = self.master_clock_rate / 1e6, to_mhz = rate / 1e6,
               "master clock rate");
        self.master_clock_rate = rate;
    }

    pub fn is_master_clock_dynamic(&self) -> bool {
        false
    }

    pub fn set_rx_calibration(&mut self, cal: RfCalibration) {
        info!(dc_gain = cal.dc_gain, dc_phase = cal.dc_phase, iq_i = cal.iq_i,
              iq_q = cal.iq_q, "rx calibration");
        self.rx_cal = cal;
    }

    pub fn set_tx_calibration(&mut self, cal: RfCalibration) {
        info!(dc_gain = cal.dc_gain, dc_phase = cal.dc_phase, iq_i = cal.iq_i,
              iq_q = cal.iq_q, "tx calibration");
        self.tx_cal = cal;
    }

    pub fn rx_calibration(&self) -> RfCalibration {
        self.rx_cal
    }

    pub fn tx_calibration(&self) -> RfCalibration {
        self.tx_cal
    }

    pub fn has_rssi(&self) -> bool {
        true
    }

    /// Fixed placeholder, there is no analog chain to measure.
    pub fn get_rssi(&self) -> f32 {
        PLACEHOLDER_RSSI
    }

    /// Current counter snapshot.
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            tx_ok: self.tx_ok,
            tx_late: self.tx_late,
            tx_discarded: self.tx_discarded,
            tx_errors: self.tx_errors,
            rx_ok: self.shared.counters.ok.load(Ordering::Relaxed),
            rx_late: self.shared.counters.late.load(Ordering::Relaxed),
            rx_errors: self.shared.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Transmit `samples` for `timestamp`, or for the upcoming TTI when
    /// no timestamp is given.
    ///
    /// A target already in the past is counted late and never hits the
    /// wire: the peer's receive pipeline would reject it on arrival, so
    /// transmitting it would only waste socket backlog. Always reports
    /// the full sample count, matching what a hardware driver tells the
    /// PHY.
    pub fn send(
        &mut self,
        samples: &[Complex32],
        timestamp: Option<RadioTime>,
        start_of_burst: bool,
        end_of_burst: bool,
    ) -> Result<usize, RadioError> {
        if samples.is_empty() {
            debug!(start_of_burst, end_of_burst, "empty send");
            return Ok(0);
        }
        if samples.len() > self.config.max_subframe_samples {
            return self.fatal(RadioError::Config(format!(
                "send of {} samples exceeds the {} sample subframe limit",
                samples.len(),
                self.config.max_subframe_samples
            )));
        }

        let target_tti = timestamp.unwrap_or_else(|| self.clock.next_tti());
        let now = RadioTime::now();

        let mut flags = BurstFlags::empty();
        if start_of_burst {
            flags |= BurstFlags::START_OF_BURST;
        }
        if end_of_burst {
            flags |= BurstFlags::END_OF_BURST;
        }

        self.tx_seqnum += 1;
        let header = FrameHeader {
            seqnum: self.tx_seqnum,
            nof_bytes: (samples.len() * wire::BYTES_PER_SAMPLE) as u32,
            nof_samples: samples.len() as u32,
            srate: self.tx_srate as f32,
            gain: self.tx_gain as f32,
            flags,
            target_tti,
            sent_at: now,
        };

        let tti_diff = target_tti.delta_micros(now);
        if tti_diff < 0 {
            self.tx_late += 1;
            if self.tx_late % TX_LATE_LOG_EVERY == 1 {
                warn!(
                    seqnum = header.seqnum,
                    target_tti = %target_tti,
                    tti_diff_us = tti_diff,
                    total_late = self.tx_late,
                    "tx deadline already passed, not transmitted"
                );
            }
            return Ok(samples.len());
        }

        self.staging.clear();
        header.encode(&mut self.staging);
        encode_samples(samples, &mut self.staging);

        match self.transport.send_frame(&self.staging) {
            Ok(SendOutcome::Sent(_)) => {
                self.tx_ok += 1;
                if self.tx_ok % TX_OK_LOG_EVERY == 0 {
                    info!(
                        seqnum = header.seqnum,
                        target_tti = %target_tti,
                        total_ok = self.tx_ok,
                        "tx subframes flowing"
                    );
                }
            }
            Ok(SendOutcome::Backlogged { pending_bytes }) => {
                self.tx_discarded += 1;
                warn!(
                    pending_bytes,
                    frame_bytes = self.staging.len(),
                    total_discarded = self.tx_discarded,
                    "outbound backlog, frame discarded"
                );
            }
            Ok(SendOutcome::NotReady(err)) => {
                self.tx_errors += 1;
                if self.tx_errors % TX_ERROR_LOG_EVERY == 1 {
                    let peer = if self.config.role.is_base_station() {
                        "mobile"
                    } else {
                        "base station"
                    };
                    warn!(error = %err, total_errors = self.tx_errors,
                          "send failed, waiting for the {peer} side to come up");
                }
            }
            Err(err) => return self.fatal(err),
        }

        Ok(samples.len())
    }

    /// Fill `out` with received samples for the current TTI.
    ///
    /// Advances the subframe clock, then drains whole ready subframes off
    /// the queue, resampling each from its declared rate to the configured
    /// receive rate. The buffer always comes back full: whatever the queue
    /// could not cover is silence, with the shortfall visible through
    /// [`Recv::delivered`].
    ///
    /// A base station never blocks here, a stalled peer must not stall the
    /// cell's subframe loop. Mobile and loopback roles wait for arrivals
    /// when `blocking` is set.
    pub fn recv(&mut self, out: &mut [Complex32], blocking: bool) -> Result<Recv, RadioError> {
        out.fill(Complex32::new(0.0, 0.0));

        if !self.clock.is_running() {
            return Ok(Recv {
                delivered: 0,
                timestamp: self.clock.this_tti(),
            });
        }
        if self.rx_srate <= 0.0 {
            return self.fatal(RadioError::Config(
                "receive sample rate is zero, check the link configuration".into(),
            ));
        }

        self.clock.advance();

        let samples_per_subframe = (self.rx_srate / 1000.0) as usize;
        let sf_pending = if samples_per_subframe == 0 {
            0
        } else {
            out.len() / samples_per_subframe
        };

        let mut delivered = 0usize;
        let mut timestamp = self.clock.this_tti();

        if sf_pending == 0 {
            return Ok(Recv { delivered, timestamp });
        }

        let queue = &self.shared.queue;
        let mut ring = queue.lock();
        let mut offset = 0usize;

        loop {
            let now = RadioTime::now();

            // Subframes whose target TTI has elapsed, capped at the demand.
            let mut ready = 0usize;
            for frame in ring.iter() {
                if ready == sf_pending {
                    break;
                }
                if now.delta_micros(frame.header.target_tti) >= 0 {
                    ready += 1;
                }
            }

            if ready >= sf_pending {
                for _ in 0..ready {
                    let Some(frame) = ring.pop_oldest() else { break };
                    let resampled = match resample(
                        f64::from(frame.header.srate),
                        self.rx_srate,
                        &frame.samples,
                    ) {
                        Ok(resampled) => resampled,
                        Err(err) => return self.fatal(err),
                    };

                    let take = resampled.len().min(out.len() - offset);
                    out[offset..offset + take].copy_from_slice(&resampled[..take]);
                    offset += take;
                    delivered += take;
                    timestamp = frame.header.target_tti;
                }
                break;
            }

            if self.config.role.is_base_station() || !blocking {
                // Trade completeness for determinism: the cell side returns
                // what it has rather than wait on a peer that may be slow
                // to start.
                break;
            }

            ring = queue.wait(ring);
        }

        drop(ring);
        Ok(Recv { delivered, timestamp })
    }
}

impl Drop for RadioDevice {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(role: NodeRole, tag: &str) -> DeviceConfig {
        let dir = std::env::temp_dir();
        let pid = std::process::id();
        DeviceConfig {
            role,
            server_path: Some(dir.join(format!("ipcrf-device-{pid}-{tag}-s.sock"))),
            client_path: Some(dir.join(format!("ipcrf-device-{pid}-{tag}-c.sock"))),
            ..DeviceConfig::default()
        }
    }

    #[test]
    fn test_open_rejects_multi_channel() {
        let cfg = DeviceConfig {
            channels: 2,
            ..test_config(NodeRole::Loopback, "chan")
        };
        assert!(matches!(
            RadioDevice::open(cfg),
            Err(RadioError::Unsupported(_))
        ));
    }

    #[test]
    fn test_setters_echo_applied_values() {
        let mut dev = RadioDevice::open(test_config(NodeRole::Loopback, "echo")).unwrap();

        assert_eq!(dev.set_rx_gain(30.0), 30.0);
        assert_eq!(dev.set_tx_gain(20.0), 20.0);
        assert_eq!(dev.set_rx_sample_rate(11.52e6), 11.52e6);
        assert_eq!(dev.set_tx_sample_rate(11.52e6), 11.52e6);
        assert_eq!(dev.set_rx_freq(2.68e9), 2.68e9);
        assert_eq!(dev.set_tx_freq(2.56e9), 2.56e9);

        let cal = RfCalibration {
            dc_gain: 1.0,
            dc_phase: 0.5,
            iq_i: 0.25,
            iq_q: 0.125,
        };
        dev.set_rx_calibration(cal);
        dev.set_tx_calibration(cal);
        assert_eq!(dev.rx_calibration(), cal);
        assert_eq!(dev.tx_calibration(), cal);

        dev.close();
    }

    #[test]
    fn test_rssi_placeholder() {
        let dev = RadioDevice::open(test_config(NodeRole::Loopback, "rssi")).unwrap();
        assert!(dev.has_rssi());
        assert_eq!(dev.get_rssi(), PLACEHOLDER_RSSI);
    }

    #[test]
    fn test_empty_send_is_a_no_op() {
        let mut dev = RadioDevice::open(test_config(NodeRole::Loopback, "empty")).unwrap();
        let sent = dev.send(&[], None, true, true).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(dev.stats(), LinkStats::default());
    }

    #[test]
    fn test_recv_before_stream_start_returns_silence() {
        let mut dev = RadioDevice::open(test_config(NodeRole::Loopback, "idle")).unwrap();
        let mut out = vec![Complex32::new(1.0, 1.0); 64];

        let recv = dev.recv(&mut out, false).unwrap();
        assert_eq!(recv.delivered, 0);
        assert!(out.iter().all(|s| s.re == 0.0 && s.im == 0.0));
    }

    #[test]
    fn test_stale_paths_cleaned_on_close() {
        let cfg = test_config(NodeRole::BaseStation, "clean");
        let server: PathBuf = cfg.server_path.clone().unwrap();

        let dev = RadioDevice::open(cfg.clone()).unwrap();
        assert!(server.exists());
        dev.close();
        assert!(!server.exists());

        // Same role reopens cleanly.
        let dev = RadioDevice::open(cfg).unwrap();
        dev.close();
    }
}

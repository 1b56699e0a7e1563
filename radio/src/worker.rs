//! Receive Pipeline Worker
//!
//! One dedicated thread per device, spawned at open and running for the
//! life of the handle: blocking-read framed messages off the transport,
//! classify each against the TTI clock and commit the on-time ones to the
//! ring. Late arrivals are counted and dropped here so the consumer only
//! ever sees subframes it can still use.

use std::io::ErrorKind;
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use common::RadioTime;
use tracing::{debug, info, warn};

use crate::queue::SubframeQueue;
use crate::wire::{decode_samples, FrameHeader, IqFrame, HEADER_LEN};
use crate::RadioError;

const RX_OK_LOG_EVERY: u64 = 1000;
const RX_LATE_LOG_EVERY: u64 = 100;

/// Receive-side counters, written by the worker, read by anyone.
#[derive(Debug, Default)]
pub(crate) struct RxCounters {
    pub ok: AtomicU64,
    pub late: AtomicU64,
    pub errors: AtomicU64,
}

/// State shared between the caller thread and the receive worker.
///
/// Everything else on the device is caller-thread-only and stays off the
/// shared path entirely.
#[derive(Debug)]
pub(crate) struct RxShared {
    pub queue: SubframeQueue,
    pub running: AtomicBool,
    pub counters: RxCounters,
    /// One TTI step in microseconds, the lateness threshold
    pub tti_step_micros: i64,
}

/// Spawn the worker on `socket`. Fails only if the OS refuses the thread.
pub(crate) fn spawn(
    socket: UnixDatagram,
    shared: Arc<RxShared>,
    max_payload_bytes: usize,
    realtime_priority: Option<u8>,
) -> Result<JoinHandle<()>, RadioError> {
    thread::Builder::new()
        .name("radio-rx".into())
        .spawn(move || run(socket, shared, max_payload_bytes, realtime_priority))
        .map_err(|err| RadioError::Transport(format!("cannot spawn rx worker: {err}")))
}

fn run(
    socket: UnixDatagram,
    shared: Arc<RxShared>,
    max_payload_bytes: usize,
    realtime_priority: Option<u8>,
) {
    if let Some(priority) = realtime_priority {
        apply_realtime_priority(priority);
    }

    let mut buf = vec![0u8; HEADER_LEN + max_payload_bytes];

    while shared.running.load(Ordering::Acquire) {
        let n = match socket.recv(&mut buf) {
            // Zero-length reads are the shutdown wakeup.
            Ok(0) => continue,
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                continue
            }
            Err(err) => {
                if shared.running.load(Ordering::Acquire) {
                    shared.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!("rx read failed: {err}");
                }
                continue;
            }
        };

        let now = RadioTime::now();

        let frame = match decode_frame(&buf[..n]) {
            Ok(frame) => frame,
            Err(err) => {
                shared.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("rx frame rejected: {err}");
                continue;
            }
        };

        // A subframe has to land at least one full step ahead of its
        // target TTI to be usable; anything closer is already late.
        let tti_diff = frame.header.target_tti.delta_micros(now);
        let tx_delay = now.delta_micros(frame.header.sent_at);

        if tti_diff < shared.tti_step_micros {
            let late = shared.counters.late.fetch_add(1, Ordering::Relaxed) + 1;
            if late % RX_LATE_LOG_EVERY == 1 {
                warn!(
                    seqnum = frame.header.seqnum,
                    target_tti = %frame.header.target_tti,
                    tti_diff_us = tti_diff,
                    tx_delay_us = tx_delay,
                    total_late = late,
                    "rx subframe late, dropped"
                );
            } else {
                debug!(seqnum = frame.header.seqnum, tti_diff_us = tti_diff, "rx late");
            }
        } else {
            shared.queue.push(frame);
            let ok = shared.counters.ok.fetch_add(1, Ordering::Relaxed) + 1;
            if ok % RX_OK_LOG_EVERY == 0 {
                info!(tx_delay_us = tx_delay, total_ok = ok, "rx subframes flowing");
            }
        }
    }
}

fn decode_frame(data: &[u8]) -> Result<IqFrame, RadioError> {
    let header = FrameHeader::decode(data)?;
    let payload_end = HEADER_LEN + header.nof_bytes as usize;
    if data.len() < payload_end {
        return Err(RadioError::Codec(format!(
            "datagram of {} bytes shorter than the {} byte frame it declares",
            data.len(),
            payload_end
        )));
    }
    let samples = decode_samples(&data[HEADER_LEN..payload_end])?;
    Ok(IqFrame { header, samples })
}

/// Best-effort SCHED_RR elevation to reduce receive jitter. A refusal
/// (typically missing privilege) leaves the worker in the default class.
fn apply_realtime_priority(priority: u8) {
    let param = libc::sched_param {
        sched_priority: i32::from(priority),
    };
    // SAFETY: plain scheduling syscall on the calling thread with a
    // stack-owned parameter block.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc == 0 {
        info!(priority, "rx worker scheduled SCHED_RR");
    } else {
        warn!(
            priority,
            "could not apply SCHED_RR priority: {}",
            std::io::Error::from_raw_os_error(rc)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{encode_samples, BurstFlags, BYTES_PER_SAMPLE};
    use bytes::BytesMut;
    use num_complex::Complex32;
    use std::time::Duration;

    fn shared() -> Arc<RxShared> {
        Arc::new(RxShared {
            queue: SubframeQueue::new(4),
            running: AtomicBool::new(true),
            counters: RxCounters::default(),
            tti_step_micros: 1000,
        })
    }

    fn frame_bytes(target_tti: RadioTime) -> BytesMut {
        let samples = vec![Complex32::new(0.5, -0.5); 4];
        let header = FrameHeader {
            seqnum: 1,
            nof_bytes: (samples.len() * BYTES_PER_SAMPLE) as u32,
            nof_samples: samples.len() as u32,
            srate: 1.92e6,
            gain: 0.0,
            flags: BurstFlags::empty(),
            target_tti,
            sent_at: RadioTime::now(),
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        encode_samples(&samples, &mut buf);
        buf
    }

    fn run_one(shared: &Arc<RxShared>, payload: &[u8]) {
        let (a, b) = UnixDatagram::pair().unwrap();
        let handle = spawn(b, Arc::clone(shared), 1024, None).unwrap();

        a.send(payload).unwrap();
        thread::sleep(Duration::from_millis(50));

        shared.running.store(false, Ordering::Release);
        // Closing our end makes the blocked read return so the worker can
        // observe the cleared flag.
        drop(a);
        handle.join().unwrap();
    }

    #[test]
    fn test_on_time_subframe_is_queued() {
        let shared = shared();
        let target = RadioTime::now() + Duration::from_millis(10);

        run_one(&shared, &frame_bytes(target));

        assert_eq!(shared.counters.ok.load(Ordering::Relaxed), 1);
        assert_eq!(shared.counters.late.load(Ordering::Relaxed), 0);
        assert_eq!(shared.queue.lock().len(), 1);
    }

    #[test]
    fn test_late_subframe_is_dropped() {
        let shared = shared();
        // Already inside the current step, unusable by the consumer.
        let target = RadioTime::now();

        run_one(&shared, &frame_bytes(target));

        assert_eq!(shared.counters.ok.load(Ordering::Relaxed), 0);
        assert_eq!(shared.counters.late.load(Ordering::Relaxed), 1);
        assert!(shared.queue.lock().is_empty());
    }

    #[test]
    fn test_malformed_frame_counts_an_error() {
        let shared = shared();

        run_one(&shared, &[0u8; 16]);

        assert_eq!(shared.counters.errors.load(Ordering::Relaxed), 1);
        assert!(shared.queue.lock().is_empty());
    }
}

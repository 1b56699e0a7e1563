//! TTI Clock
//!
//! A free-running subframe clock derived from wall time. The stream start
//! is rounded up to the next whole second and every timed operation paces
//! itself against `this_tti`/`next_tti`, advanced in fixed steps of one
//! scaled subframe duration.

use std::thread;
use std::time::Duration;

use common::RadioTime;
use tracing::{debug, info};

/// Unscaled subframe duration.
const SUBFRAME_MILLIS: u64 = 1;

/// The subframe clock pacing all timed radio operations.
#[derive(Debug)]
pub struct TtiClock {
    step: Duration,
    start_of_stream: RadioTime,
    this_tti: RadioTime,
    next_tti: RadioTime,
    running: bool,
}

impl TtiClock {
    /// Create a stopped clock stepping one subframe scaled by `time_scale`.
    ///
    /// A scale above 1 slows the whole deployment down proportionally,
    /// which trades throughput for headroom on constrained schedulers.
    pub fn new(time_scale: u32) -> Self {
        let step = Duration::from_millis(SUBFRAME_MILLIS * u64::from(time_scale.max(1)));
        Self {
            step,
            start_of_stream: RadioTime::default(),
            this_tti: RadioTime::default(),
            next_tti: RadioTime::default(),
            running: false,
        }
    }

    /// Duration of one TTI step.
    pub fn step(&self) -> Duration {
        self.step
    }

    /// TTI step in microseconds, the unit deadline comparisons use.
    pub fn step_micros(&self) -> i64 {
        self.step.as_micros() as i64
    }

    /// Start the stream, aligning the origin to the next whole second.
    ///
    /// Sleeps until the boundary so both peers started within the same
    /// second share a TTI grid.
    pub fn start(&mut self) {
        let now = RadioTime::now();
        let origin = now.ceil_to_second();
        let wait = now.saturating_duration_until(origin);
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.start_at(origin);
    }

    /// Start the stream at an explicit origin without sleeping.
    pub fn start_at(&mut self, origin: RadioTime) {
        self.start_of_stream = origin;
        self.this_tti = origin;
        self.next_tti = origin + self.step;
        self.running = true;
        info!(origin = %origin, next_tti = %self.next_tti, step_us = self.step_micros(),
              "rx stream started");
    }

    /// Stop the stream. The TTI values stay readable.
    pub fn stop(&mut self) {
        debug!("rx stream stopped");
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Timestamp of the stream origin.
    pub fn start_of_stream(&self) -> RadioTime {
        self.start_of_stream
    }

    /// The interval currently being served.
    pub fn this_tti(&self) -> RadioTime {
        self.this_tti
    }

    /// The upcoming interval boundary.
    pub fn next_tti(&self) -> RadioTime {
        self.next_tti
    }

    /// Move the clock to the interval containing "now".
    ///
    /// Sleeps when called early, and when called late catches up by
    /// skipping as many whole steps as the delay swallowed, so the clock
    /// tracks wall time instead of drifting permanently behind it.
    pub fn advance(&mut self) {
        let entry = RadioTime::now();

        let wait = entry.saturating_duration_until(self.next_tti);
        if !wait.is_zero() {
            thread::sleep(wait);
        }

        loop {
            self.this_tti = self.next_tti;
            self.next_tti = self.this_tti + self.step;
            if self.next_tti.delta_micros(entry) > 0 {
                break;
            }
        }
    }
}

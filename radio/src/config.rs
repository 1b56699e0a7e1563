//! Device Configuration
//!
//! Everything the embedding application decides before `open`: role,
//! queue sizing, time scaling, worker scheduling and how fatal
//! configuration errors are handled. Validated up front so a bad value
//! fails the open instead of a stream mid-flight.

use std::path::PathBuf;

use common::NodeRole;

use crate::{wire, RadioError};

/// Receive ring capacity in subframes.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// How configuration-fatal conditions are surfaced.
///
/// Whether a broken configuration kills the process is the embedding
/// application's call, not the library's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Return a typed error and let the caller decide.
    #[default]
    Propagate,
    /// Log and terminate the process, continuing would produce silently
    /// wrong behavior.
    Exit,
}

/// Parameters fixed at `open` time.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Which end of the link this process plays
    pub role: NodeRole,
    /// Requested channel count, anything but 1 is rejected
    pub channels: usize,
    /// Receive ring capacity in subframes
    pub queue_capacity: usize,
    /// Largest subframe accepted on the wire, in samples
    pub max_subframe_samples: usize,
    /// TTI step multiplier, 1 runs at real time
    pub time_scale: u32,
    /// SCHED_RR priority for the receive worker, unset leaves the
    /// default scheduling class
    pub realtime_priority: Option<u8>,
    /// Server rendezvous path, unset falls back to environment then the
    /// built-in default
    pub server_path: Option<PathBuf>,
    /// Client rendezvous path, same fallback chain
    pub client_path: Option<PathBuf>,
    /// Handling of configuration-fatal conditions
    pub fatal_policy: FatalPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::default(),
            channels: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_subframe_samples: wire::MAX_SUBFRAME_SAMPLES,
            time_scale: 1,
            realtime_priority: None,
            server_path: None,
            client_path: None,
            fatal_policy: FatalPolicy::default(),
        }
    }
}

impl DeviceConfig {
    /// Convenience constructor for the common case.
    pub fn for_role(role: NodeRole) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RadioError> {
        if self.channels != 1 {
            return Err(RadioError::Unsupported(format!(
                "only a single channel is supported, not {}",
                self.channels
            )));
        }
        if self.queue_capacity == 0 {
            return Err(RadioError::Config(
                "receive queue capacity must be at least 1".into(),
            ));
        }
        if self.max_subframe_samples == 0
            || self.max_subframe_samples > wire::MAX_SUBFRAME_SAMPLES
        {
            return Err(RadioError::Config(format!(
                "max subframe samples must be within 1..={}, got {}",
                wire::MAX_SUBFRAME_SAMPLES,
                self.max_subframe_samples
            )));
        }
        if self.time_scale == 0 {
            return Err(RadioError::Config("time scale must be at least 1".into()));
        }
        Ok(())
    }
}

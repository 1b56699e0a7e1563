//! IPC Virtual RF Front End Library
//!
//! This crate lets two LTE stack processes (a base station and a mobile, or
//! a single process in loopback) exchange baseband IQ subframes over Unix
//! datagram sockets while preserving the timing contract of real RF
//! hardware: a free-running TTI clock, timed send/receive with optional
//! future timestamps, burst framing and late/overflow accounting.
//!
//! The entry point is [`RadioDevice::open`], which establishes the IPC
//! transport and spawns the receive worker. Every subsequent interaction
//! goes through the returned handle.

pub mod clock;
pub mod config;
pub mod device;
pub mod queue;
pub mod resample;
pub mod transport;
pub mod wire;

mod worker;

use thiserror::Error;

/// Radio front end errors
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed frame: {0}")]
    Codec(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub use config::{DeviceConfig, FatalPolicy};
pub use device::{LinkStats, RadioDevice, Recv};

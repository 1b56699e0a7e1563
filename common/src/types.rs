//! Common Types for the Virtual Radio Front End
//!
//! Defines the node role selecting the IPC rendezvous direction and the
//! calibration record carried by the device state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which end of the radio link this process plays.
///
/// The role decides which rendezvous path the receive socket binds and
/// which one transmissions are addressed to. Loopback binds and sends to
/// the same path for single-process testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Cell side: binds the server path, sends to the client path.
    BaseStation,
    /// Terminal side: binds the client path, sends to the server path.
    Mobile,
    /// Self-contained: binds and sends to the client path.
    #[default]
    Loopback,
}

impl NodeRole {
    pub fn is_base_station(&self) -> bool {
        matches!(self, NodeRole::BaseStation)
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, NodeRole::Mobile)
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self, NodeRole::Loopback)
    }

    /// Short role tag used in log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeRole::BaseStation => "B",
            NodeRole::Mobile => "M",
            NodeRole::Loopback => "L",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::BaseStation => "base-station",
            NodeRole::Mobile => "mobile",
            NodeRole::Loopback => "loopback",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role string is not recognized.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown node role '{0}', expected base-station, mobile or loopback")]
pub struct RoleParseError(pub String);

impl FromStr for NodeRole {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base-station" | "basestation" | "bs" => Ok(NodeRole::BaseStation),
            "mobile" | "ms" => Ok(NodeRole::Mobile),
            "loopback" | "loop" => Ok(NodeRole::Loopback),
            other => Err(RoleParseError(other.to_string())),
        }
    }
}

/// DC offset and I/Q imbalance correction parameters.
///
/// Held independently for the transmit and receive paths. The virtual
/// front end stores and echoes them but applies no correction, there is
/// no analog chain to correct.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RfCalibration {
    /// DC offset gain correction
    pub dc_gain: f64,
    /// DC offset phase correction
    pub dc_phase: f64,
    /// In-phase imbalance correction
    pub iq_i: f64,
    /// Quadrature imbalance correction
    pub iq_q: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("bs".parse::<NodeRole>(), Ok(NodeRole::BaseStation));
        assert_eq!("Base-Station".parse::<NodeRole>(), Ok(NodeRole::BaseStation));
        assert_eq!("mobile".parse::<NodeRole>(), Ok(NodeRole::Mobile));
        assert_eq!("loop".parse::<NodeRole>(), Ok(NodeRole::Loopback));
        assert!("enb".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_default_role_is_loopback() {
        assert_eq!(NodeRole::default(), NodeRole::Loopback);
    }
}

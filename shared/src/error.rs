//! Error taxonomy for drone operations
//!
//! Every failure path of the session manager ends in one of these variants.
//! Safety gate and state machine errors never touch the device; link
//! failures (`Timeout`, `Connection`) degrade the session.

use std::time::Duration;
use thiserror::Error;

use crate::codec::CodecError;
use crate::state_machine::FlightStatus;

/// Errors returned to callers of the drone controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DroneError {
    /// Handshake failure or socket error
    #[error("connection error: {0}")]
    Connection(String),

    /// Requested transition is not valid from the current flight state
    #[error("cannot {command} while {state}")]
    IllegalState {
        command: &'static str,
        state: FlightStatus,
    },

    /// Distance or angle outside the accepted range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Pre-takeoff battery gate
    #[error("battery too low for takeoff ({percent}%, need {required}%)")]
    LowBattery { percent: u8, required: u8 },

    /// No response within the command's budget
    #[error("timeout")]
    Timeout { command: &'static str, after: Duration },

    /// Malformed or unrecognized device response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Another command is queued or in flight
    #[error("busy: another command is in flight")]
    Busy,

    /// The device answered with an error
    #[error("device error: {0}")]
    Device(String),

    /// No video stream or no frame received yet
    #[error("video unavailable: {0}")]
    VideoUnavailable(String),
}

/// Type alias for Results that use DroneError
pub type Result<T> = std::result::Result<T, DroneError>;

impl DroneError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    pub fn video_unavailable(msg: impl Into<String>) -> Self {
        Self::VideoUnavailable(msg.into())
    }

    /// Stable tag used in control responses
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::IllegalState { .. } => "illegal_state",
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::LowBattery { .. } => "low_battery",
            Self::Timeout { .. } => "timeout",
            Self::Protocol(_) => "protocol_error",
            Self::Busy => "busy",
            Self::Device(_) => "device_error",
            Self::VideoUnavailable(_) => "video_unavailable",
        }
    }

    /// Whether this error leaves the session degraded.
    ///
    /// A degraded session must go through `ensure_connected()` again before
    /// the next command is sent.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Connection(_))
    }
}

impl From<CodecError> for DroneError {
    fn from(err: CodecError) -> Self {
        Self::Protocol(err.to_string())
    }
}

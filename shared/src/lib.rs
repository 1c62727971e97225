//! tello-link shared protocol types
//!
//! This crate holds everything about the drone link that does not touch a
//! socket: the closed command type, the plaintext wire codec, the flight
//! state machine, the safety policy gate and the error taxonomy.

pub mod codec;
pub mod command;
pub mod error;
pub mod safety;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use codec::{CodecError, Response, StateTelemetry};
pub use command::{Command, CommandKind, CommandStatus, MoveDirection, RotateDirection};
pub use error::{DroneError, Result};
pub use safety::{BatteryCheck, SafetyPolicy, TimeoutBudget};
pub use state_machine::{BatteryReading, DroneState, FlightStateMachine, FlightStatus, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

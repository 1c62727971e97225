//! Flight State Machine
//!
//! Defines which commands are legal in each flight state and how a confirmed
//! device response moves the drone between states. `DroneState` is only
//! ever changed through this machine.

use serde::Serialize;
use std::fmt;

use crate::codec::Response;
use crate::command::CommandKind;
use crate::error::{DroneError, Result};

/// Flight status as last confirmed by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    /// No successful handshake yet
    Unknown,
    Grounded,
    Flying,
    /// Motors cut; terminal until a manual connect
    Emergency,
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlightStatus::Unknown => "unknown",
            FlightStatus::Grounded => "grounded",
            FlightStatus::Flying => "flying",
            FlightStatus::Emergency => "emergency",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryReading {
    pub percent: u8,
    pub read_at_ms: u64,
}

/// Everything the manager knows about the aircraft
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneState {
    pub flight_status: FlightStatus,
    pub battery: Option<BatteryReading>,
    pub last_updated_ms: u64,
}

/// Result of applying a device response
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Device confirmed the command; state is now the carried value
    Success(FlightStatus),
    /// Device refused or failed the command
    Rejected { state: FlightStatus, reason: String },
    /// Emergency stop applied locally
    EmergencyStop { from: FlightStatus },
}

#[derive(Debug)]
pub struct FlightStateMachine {
    state: DroneState,
}

impl Default for FlightStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightStateMachine {
    /// Create a new state machine in Unknown state
    pub fn new() -> Self {
        Self {
            state: DroneState {
                flight_status: FlightStatus::Unknown,
                battery: None,
                last_updated_ms: 0,
            },
        }
    }

    pub fn status(&self) -> FlightStatus {
        self.state.flight_status
    }

    pub fn battery(&self) -> Option<BatteryReading> {
        self.state.battery
    }

    pub fn snapshot(&self) -> DroneState {
        self.state.clone()
    }

    /// Fail fast if `kind` is not legal from the current state
    pub fn validate(&self, kind: &CommandKind) -> Result<()> {
        use FlightStatus::{Flying, Grounded};

        let legal = match (kind, self.state.flight_status) {
            // Emergency bypasses every gate
            (CommandKind::Emergency, _) => true,
            // Handshake is driven by the connection manager
            (CommandKind::EnterSdk, _) => true,

            (CommandKind::Takeoff, Grounded) => true,
            (CommandKind::Land, Flying) => true,
            (CommandKind::Move { .. } | CommandKind::Rotate { .. }, Flying) => true,
            (CommandKind::Query | CommandKind::StreamOn | CommandKind::StreamOff, Grounded | Flying) => {
                true
            }

            _ => false,
        };

        if legal {
            Ok(())
        } else {
            Err(DroneError::IllegalState {
                command: kind.name(),
                state: self.state.flight_status,
            })
        }
    }

    /// Apply a confirmed device response to `kind`
    pub fn apply(
        &mut self,
        kind: &CommandKind,
        response: &Response,
        current_time_ms: u64,
    ) -> Result<TransitionResult> {
        let from = self.state.flight_status;
        let result = match (kind, response) {
            // Applied whatever the device answered
            (CommandKind::Emergency, _) => return Ok(self.force_emergency(current_time_ms)),

            (CommandKind::Query, Response::Numeric(n)) => {
                let percent = u8::try_from(*n)
                    .ok()
                    .filter(|p| *p <= 100)
                    .ok_or_else(|| DroneError::protocol(format!("battery value {} out of range", n)))?;
                self.state.battery = Some(BatteryReading {
                    percent,
                    read_at_ms: current_time_ms,
                });
                TransitionResult::Success(from)
            }
            (CommandKind::Query, other) => {
                return Err(DroneError::protocol(format!(
                    "expected battery value, got {:?}",
                    other
                )));
            }
            (_, Response::Numeric(n)) => {
                return Err(DroneError::protocol(format!(
                    "unexpected value {} for {}",
                    n,
                    kind.name()
                )));
            }

            (CommandKind::EnterSdk, Response::Ok) => TransitionResult::Success(self.on_connected()),
            (CommandKind::Takeoff, Response::Ok) => self.transition(FlightStatus::Flying),
            (CommandKind::Land, Response::Ok) => self.transition(FlightStatus::Grounded),
            (CommandKind::Move { .. } | CommandKind::Rotate { .. }, Response::Ok) => {
                TransitionResult::Success(from)
            }
            (CommandKind::StreamOn | CommandKind::StreamOff, Response::Ok) => {
                TransitionResult::Success(from)
            }

            // The device lands itself (low battery, lost signal) and reports it
            // as the failure of the motion command in progress.
            (CommandKind::Move { .. } | CommandKind::Rotate { .. }, Response::Error(reason))
                if reason.to_ascii_lowercase().contains("auto land") =>
            {
                self.state.flight_status = FlightStatus::Grounded;
                TransitionResult::Rejected {
                    state: FlightStatus::Grounded,
                    reason: reason.clone(),
                }
            }
            (_, Response::Error(reason)) => TransitionResult::Rejected {
                state: from,
                reason: reason.clone(),
            },
        };

        self.state.last_updated_ms = current_time_ms;
        Ok(result)
    }

    /// Cut-motors transition; succeeds whether or not the device acked
    pub fn force_emergency(&mut self, current_time_ms: u64) -> TransitionResult {
        let from = self.state.flight_status;
        self.state.flight_status = FlightStatus::Emergency;
        self.state.last_updated_ms = current_time_ms;
        TransitionResult::EmergencyStop { from }
    }

    /// Handshake acknowledged.
    ///
    /// A confirmed `Flying` survives a reconnect; everything else restarts
    /// on the ground.
    pub fn on_connected(&mut self) -> FlightStatus {
        match self.state.flight_status {
            FlightStatus::Unknown | FlightStatus::Emergency => {
                self.state.flight_status = FlightStatus::Grounded;
            }
            FlightStatus::Grounded | FlightStatus::Flying => {}
        }
        self.state.flight_status
    }

    /// Session closed on purpose; nothing about the aircraft is known anymore
    pub fn on_disconnected(&mut self) {
        self.state.flight_status = FlightStatus::Unknown;
        self.state.battery = None;
    }

    fn transition(&mut self, to: FlightStatus) -> TransitionResult {
        self.state.flight_status = to;
        TransitionResult::Success(to)
    }
}

//! Logical drone commands
//!
//! `CommandKind` is a closed set: directions are enums, so a free-text
//! direction can only fail at the boundary where it is parsed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::DroneError;
use crate::now_ms;
use crate::safety::TimeoutBudget;

/// Translation directions accepted by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl MoveDirection {
    pub const ALL: [MoveDirection; 6] = [
        MoveDirection::Up,
        MoveDirection::Down,
        MoveDirection::Left,
        MoveDirection::Right,
        MoveDirection::Forward,
        MoveDirection::Back,
    ];

    /// Wire word for this direction
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveDirection::Up => "up",
            MoveDirection::Down => "down",
            MoveDirection::Left => "left",
            MoveDirection::Right => "right",
            MoveDirection::Forward => "forward",
            MoveDirection::Back => "back",
        }
    }
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MoveDirection {
    type Err = DroneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let word = s.trim().to_ascii_lowercase();
        MoveDirection::ALL
            .into_iter()
            .find(|d| d.as_str() == word)
            .ok_or_else(|| DroneError::invalid_parameter(format!("unknown move direction '{}'", s)))
    }
}

/// Yaw directions accepted by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotateDirection {
    #[serde(rename = "cw")]
    Clockwise,
    #[serde(rename = "ccw")]
    CounterClockwise,
}

impl RotateDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotateDirection::Clockwise => "cw",
            RotateDirection::CounterClockwise => "ccw",
        }
    }
}

impl fmt::Display for RotateDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RotateDirection {
    type Err = DroneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cw" => Ok(RotateDirection::Clockwise),
            "ccw" => Ok(RotateDirection::CounterClockwise),
            _ => Err(DroneError::invalid_parameter(format!(
                "unknown rotate direction '{}'",
                s
            ))),
        }
    }
}

/// Every command the session manager can put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Enter SDK command mode (handshake)
    EnterSdk,
    Takeoff,
    Land,
    Move {
        direction: MoveDirection,
        distance_cm: u32,
    },
    Rotate {
        direction: RotateDirection,
        degrees: u32,
    },
    /// Cut all motors immediately
    Emergency,
    /// Battery query
    Query,
    StreamOn,
    StreamOff,
}

impl CommandKind {
    /// Short stable name for logs and responses
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::EnterSdk => "command",
            CommandKind::Takeoff => "takeoff",
            CommandKind::Land => "land",
            CommandKind::Move { .. } => "move",
            CommandKind::Rotate { .. } => "rotate",
            CommandKind::Emergency => "emergency",
            CommandKind::Query => "query",
            CommandKind::StreamOn => "streamon",
            CommandKind::StreamOff => "streamoff",
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, CommandKind::Emergency)
    }

    /// How long to wait for the device's answer to this command.
    ///
    /// Motion commands scale with distance or angle and are clamped to the
    /// budget's maximum.
    pub fn response_timeout(&self, budget: &TimeoutBudget) -> Duration {
        match self {
            CommandKind::EnterSdk => budget.handshake,
            CommandKind::Takeoff | CommandKind::Land => budget.flight,
            CommandKind::Move { distance_cm, .. } => {
                budget.motion(budget.per_cm.saturating_mul(*distance_cm))
            }
            CommandKind::Rotate { degrees, .. } => {
                budget.motion(budget.per_degree.saturating_mul(*degrees))
            }
            CommandKind::Emergency
            | CommandKind::Query
            | CommandKind::StreamOn
            | CommandKind::StreamOff => budget.command,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Move {
                direction,
                distance_cm,
            } => write!(f, "move {} {}cm", direction, distance_cm),
            CommandKind::Rotate { direction, degrees } => {
                write!(f, "rotate {} {}deg", direction, degrees)
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Lifecycle of a submitted command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Enqueued,
    InFlight,
    Completed,
    Failed,
    TimedOut,
}

/// A command as submitted by one caller. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    issued_at_ms: u64,
    caller_id: String,
}

impl Command {
    pub fn new(kind: CommandKind, caller_id: impl Into<String>) -> Self {
        Self {
            kind,
            issued_at_ms: now_ms(),
            caller_id: caller_id.into(),
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn issued_at_ms(&self) -> u64 {
        self.issued_at_ms
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }
}

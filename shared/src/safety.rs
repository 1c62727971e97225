//! Safety parameters and the pre-dispatch policy gate
//!
//! The gate is pure: it looks at a command and the last battery reading and
//! decides, without touching the device, whether the command may proceed.

use std::time::Duration;

use crate::command::CommandKind;
use crate::error::{DroneError, Result};
use crate::state_machine::BatteryReading;

/// Shortest move the device accepts
pub const MIN_MOVE_DISTANCE_CM: u32 = 20;

/// Longest move the device accepts
pub const MAX_MOVE_DISTANCE_CM: u32 = 500;

pub const MIN_ROTATE_DEGREES: u32 = 1;

pub const MAX_ROTATE_DEGREES: u32 = 360;

/// Takeoff is refused below this battery percentage
pub const TAKEOFF_MIN_BATTERY_PERCENT: u8 = 20;

/// Battery readings older than this force a fresh query before takeoff
pub const BATTERY_FRESHNESS_MS: u64 = 10_000;

/// Handshake ("command") ACK timeout
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default ACK timeout for queries and short commands
pub const COMMAND_TIMEOUT_MS: u64 = 5_000;

/// Takeoff and land can take a while to be acknowledged
pub const FLIGHT_TIMEOUT_MS: u64 = 15_000;

/// Upper bound for any single command
pub const MAX_COMMAND_TIMEOUT_MS: u64 = 15_000;

/// Extra motion budget per centimetre travelled
pub const MOTION_PER_CM_MS: u64 = 20;

/// Extra motion budget per degree turned
pub const MOTION_PER_DEGREE_MS: u64 = 25;

/// How long to wait for a late answer after a timeout before reusing the link
pub const LATE_RESPONSE_GRACE_MS: u64 = 1_000;

/// Per-command response budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutBudget {
    pub handshake: Duration,
    pub command: Duration,
    pub flight: Duration,
    pub motion_base: Duration,
    pub per_cm: Duration,
    pub per_degree: Duration,
    pub max: Duration,
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            handshake: Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
            command: Duration::from_millis(COMMAND_TIMEOUT_MS),
            flight: Duration::from_millis(FLIGHT_TIMEOUT_MS),
            motion_base: Duration::from_millis(COMMAND_TIMEOUT_MS),
            per_cm: Duration::from_millis(MOTION_PER_CM_MS),
            per_degree: Duration::from_millis(MOTION_PER_DEGREE_MS),
            max: Duration::from_millis(MAX_COMMAND_TIMEOUT_MS),
        }
    }
}

impl TimeoutBudget {
    /// Motion base plus `extra`, clamped to `max`
    pub fn motion(&self, extra: Duration) -> Duration {
        std::cmp::min(self.motion_base.saturating_add(extra), self.max)
    }
}

/// Outcome of the pre-takeoff battery check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryCheck {
    /// Fresh reading at or above the threshold
    Ready(u8),
    /// No reading, or too old to trust; query the device first
    Stale,
    /// Fresh reading below the threshold
    Low(u8),
}

/// Thresholds enforced before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyPolicy {
    pub min_takeoff_battery: u8,
    pub battery_freshness_ms: u64,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            min_takeoff_battery: TAKEOFF_MIN_BATTERY_PERCENT,
            battery_freshness_ms: BATTERY_FRESHNESS_MS,
        }
    }
}

impl SafetyPolicy {
    /// Reject out-of-range distances and angles. Values are never clamped.
    pub fn check_parameters(&self, kind: &CommandKind) -> Result<()> {
        match kind {
            CommandKind::Move {
                direction,
                distance_cm,
            } => {
                if !(MIN_MOVE_DISTANCE_CM..=MAX_MOVE_DISTANCE_CM).contains(distance_cm) {
                    return Err(DroneError::invalid_parameter(format!(
                        "{} distance {}cm outside {}-{}cm",
                        direction, distance_cm, MIN_MOVE_DISTANCE_CM, MAX_MOVE_DISTANCE_CM
                    )));
                }
                Ok(())
            }
            CommandKind::Rotate { direction, degrees } => {
                if !(MIN_ROTATE_DEGREES..=MAX_ROTATE_DEGREES).contains(degrees) {
                    return Err(DroneError::invalid_parameter(format!(
                        "{} rotation {} degrees outside {}-{}",
                        direction, degrees, MIN_ROTATE_DEGREES, MAX_ROTATE_DEGREES
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Whether the reading is young enough to gate a takeoff
    pub fn is_fresh(&self, reading: &BatteryReading, current_time_ms: u64) -> bool {
        current_time_ms.saturating_sub(reading.read_at_ms) <= self.battery_freshness_ms
    }

    pub fn check_takeoff_battery(
        &self,
        reading: Option<BatteryReading>,
        current_time_ms: u64,
    ) -> BatteryCheck {
        match reading {
            Some(r) if self.is_fresh(&r, current_time_ms) => {
                if r.percent >= self.min_takeoff_battery {
                    BatteryCheck::Ready(r.percent)
                } else {
                    BatteryCheck::Low(r.percent)
                }
            }
            _ => BatteryCheck::Stale,
        }
    }

    pub fn low_battery_error(&self, percent: u8) -> DroneError {
        DroneError::LowBattery {
            percent,
            required: self.min_takeoff_battery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{MoveDirection, RotateDirection};

    fn mv(distance_cm: u32) -> CommandKind {
        CommandKind::Move {
            direction: MoveDirection::Left,
            distance_cm,
        }
    }

    fn rot(degrees: u32) -> CommandKind {
        CommandKind::Rotate {
            direction: RotateDirection::Clockwise,
            degrees,
        }
    }

    #[test]
    fn test_distance_range_enforced() {
        let policy = SafetyPolicy::default();
        for bad in [0, 1, 19, 501, 700, u32::MAX] {
            let err = policy.check_parameters(&mv(bad)).unwrap_err();
            assert_eq!(err.kind(), "invalid_parameter", "distance {}", bad);
        }
        for good in [20, 100, 500] {
            assert!(policy.check_parameters(&mv(good)).is_ok(), "distance {}", good);
        }
    }

    #[test]
    fn test_angle_range_enforced() {
        let policy = SafetyPolicy::default();
        for bad in [0, 361, 720] {
            assert!(policy.check_parameters(&rot(bad)).is_err(), "degrees {}", bad);
        }
        for good in [1, 90, 360] {
            assert!(policy.check_parameters(&rot(good)).is_ok(), "degrees {}", good);
        }
    }

    #[test]
    fn test_emergency_has_no_parameters_to_check() {
        let policy = SafetyPolicy::default();
        assert!(policy.check_parameters(&CommandKind::Emergency).is_ok());
    }

    #[test]
    fn test_battery_freshness() {
        let policy = SafetyPolicy::default();
        let reading = BatteryReading {
            percent: 45,
            read_at_ms: 1_000,
        };

        assert_eq!(
            policy.check_takeoff_battery(Some(reading), 1_000 + BATTERY_FRESHNESS_MS),
            BatteryCheck::Ready(45)
        );
        assert_eq!(
            policy.check_takeoff_battery(Some(reading), 1_000 + BATTERY_FRESHNESS_MS + 1),
            BatteryCheck::Stale
        );
        assert_eq!(policy.check_takeoff_battery(None, 1_000), BatteryCheck::Stale);
    }

    #[test]
    fn test_low_battery_threshold() {
        let policy = SafetyPolicy::default();
        let at = |percent| BatteryReading {
            percent,
            read_at_ms: 5_000,
        };
        assert_eq!(policy.check_takeoff_battery(Some(at(15)), 5_000), BatteryCheck::Low(15));
        assert_eq!(policy.check_takeoff_battery(Some(at(19)), 5_000), BatteryCheck::Low(19));
        assert_eq!(policy.check_takeoff_battery(Some(at(20)), 5_000), BatteryCheck::Ready(20));
    }

    #[test]
    fn test_motion_budget_clamp() {
        let budget = TimeoutBudget::default();
        assert_eq!(budget.motion(Duration::from_secs(60)), budget.max);
        assert_eq!(budget.motion(Duration::ZERO), budget.motion_base);
    }
}

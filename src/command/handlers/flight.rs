//! Takeoff, land and motion handlers

use crate::command::{CommandExecutor, CommandOutcome};
use crate::transport::TransportConnector;
use tello_link_shared::{now_ms, BatteryCheck, CommandKind, DroneError, Result};
use tracing::{info, warn};

impl<C: TransportConnector> CommandExecutor<C> {
    /// Takeoff with the mandatory battery check
    pub(crate) async fn handle_takeoff(&mut self) -> Result<CommandOutcome> {
        self.fsm.validate(&CommandKind::Takeoff)?;
        let percent = self.takeoff_battery().await?;

        self.dispatch(CommandKind::Takeoff).await?;
        info!("Airborne (battery {}%)", percent);
        Ok(self.outcome(format!("Takeoff complete (battery {}%)", percent)))
    }

    /// Battery percentage that clears the takeoff threshold. A stale or
    /// missing reading is refreshed from the device first.
    async fn takeoff_battery(&mut self) -> Result<u8> {
        let mut check = self.policy.check_takeoff_battery(self.fsm.battery(), now_ms());
        if check == BatteryCheck::Stale {
            info!("Battery reading stale, querying before takeoff");
            self.dispatch(CommandKind::Query).await?;
            check = self.policy.check_takeoff_battery(self.fsm.battery(), now_ms());
        }

        match check {
            BatteryCheck::Ready(percent) => Ok(percent),
            BatteryCheck::Low(percent) => {
                warn!("Takeoff refused, battery {}%", percent);
                Err(self.policy.low_battery_error(percent))
            }
            BatteryCheck::Stale => Err(DroneError::protocol("no battery reading available")),
        }
    }

    /// Land, move, rotate and stream toggles
    pub(crate) async fn handle_flight(&mut self, kind: CommandKind) -> Result<CommandOutcome> {
        self.dispatch(kind).await?;

        let message = match kind {
            CommandKind::Land => "Landed".to_string(),
            CommandKind::Move {
                direction,
                distance_cm,
            } => format!("Moved {} {}cm", direction, distance_cm),
            CommandKind::Rotate { direction, degrees } => {
                format!("Rotated {} {} degrees", direction, degrees)
            }
            other => format!("{} ok", other.name()),
        };
        Ok(self.outcome(message))
    }
}

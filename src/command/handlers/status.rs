//! Connect, disconnect and battery query handlers

use crate::command::{CommandExecutor, CommandOutcome};
use crate::connection::SessionStatus;
use crate::transport::TransportConnector;
use tello_link_shared::{CommandKind, DroneError, Result};
use tracing::{debug, info};

impl<C: TransportConnector> CommandExecutor<C> {
    pub(crate) async fn handle_connect(&mut self) -> Result<CommandOutcome> {
        let report = self.connection.connect(&mut self.fsm).await?;

        let mut outcome = self.outcome(if report.handshake_performed {
            "Connected to drone"
        } else {
            "Already connected"
        });
        outcome.data.battery = report.battery;
        Ok(outcome)
    }

    /// Best-effort: stops video, releases the socket, never fails
    pub(crate) async fn handle_disconnect(&mut self) -> Result<CommandOutcome> {
        if self.video.is_running().await {
            self.video.stop().await;
            if self.connection.status() == SessionStatus::Connected
                && self.fsm.validate(&CommandKind::StreamOff).is_ok()
            {
                if let Err(e) = self.dispatch(CommandKind::StreamOff).await {
                    debug!("streamoff during disconnect failed: {}", e);
                }
            }
        }

        self.connection.disconnect(&mut self.fsm).await;
        Ok(self.outcome("Disconnected"))
    }

    pub(crate) async fn handle_query(&mut self) -> Result<CommandOutcome> {
        self.dispatch(CommandKind::Query).await?;

        let percent = self
            .fsm
            .battery()
            .map(|b| b.percent)
            .ok_or_else(|| DroneError::protocol("battery value missing"))?;
        info!("Battery {}%", percent);
        Ok(self.outcome(format!("Battery: {}%", percent)))
    }
}

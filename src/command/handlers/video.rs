//! Video stream start/stop handlers

use crate::command::{CommandExecutor, CommandOutcome};
use crate::connection::SessionStatus;
use crate::transport::TransportConnector;
use tello_link_shared::{CommandKind, Result};
use tracing::{info, warn};

impl<C: TransportConnector> CommandExecutor<C> {
    pub(crate) async fn handle_video_start(&mut self) -> Result<CommandOutcome> {
        self.connection.ensure_connected(&mut self.fsm).await?;
        self.dispatch(CommandKind::StreamOn).await?;

        match self.video.start().await {
            Ok(addr) => {
                info!("Video stream started on {}", addr);
                Ok(self.outcome(format!("Video stream started on {}", addr)))
            }
            Err(e) => {
                // Do not leave the device streaming into a closed port
                if let Err(off) = self.dispatch(CommandKind::StreamOff).await {
                    warn!("streamoff after failed video start: {}", off);
                }
                Err(e)
            }
        }
    }

    pub(crate) async fn handle_video_stop(&mut self) -> Result<CommandOutcome> {
        self.video.stop().await;

        if self.connection.status() == SessionStatus::Connected
            && self.fsm.validate(&CommandKind::StreamOff).is_ok()
        {
            self.dispatch(CommandKind::StreamOff).await?;
        }
        Ok(self.outcome("Video stream stopped"))
    }
}

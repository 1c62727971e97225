//! Emergency stop handler

use crate::command::{CommandExecutor, CommandOutcome};
use crate::transport::TransportConnector;
use tello_link_shared::codec::Response;
use tello_link_shared::{now_ms, CommandKind, Result};
use tracing::{error, warn};

impl<C: TransportConnector> CommandExecutor<C> {
    /// Cut all motors.
    ///
    /// Bypasses every gate. The local transition to `Emergency` happens
    /// whether or not the device acknowledged; only a missing link is
    /// reported as an error.
    pub(crate) async fn handle_emergency(&mut self) -> Result<CommandOutcome> {
        error!("EMERGENCY STOP requested (state {})", self.fsm.status());

        // A degraded session still has a socket; use it rather than paying
        // for a handshake first.
        if !self.connection.has_channel() {
            if let Err(e) = self.connection.ensure_connected(&mut self.fsm).await {
                self.fsm.force_emergency(now_ms());
                error!("Emergency stop could not reach the drone: {}", e);
                return Err(e);
            }
        }

        let kind = CommandKind::Emergency;
        let budget = kind.response_timeout(self.connection.budget());
        let ack = self.connection.exchange(&kind, budget).await;
        self.fsm.force_emergency(now_ms());

        let message = match ack {
            Ok(Response::Ok) => "Emergency stop executed, motors cut".to_string(),
            Ok(other) => {
                warn!("Emergency stop answered with {:?}", other);
                format!("Emergency stop applied; device answered {:?}", other)
            }
            Err(e) => {
                warn!("Emergency stop not acknowledged: {}", e);
                format!("Emergency stop applied locally; no device ack ({})", e)
            }
        };
        Ok(self.outcome(message))
    }
}

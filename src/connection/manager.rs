//! Connection lifecycle manager
//!
//! Holds at most one `Session`. There is no background reconnect loop:
//! a lost or degraded link is re-established by the next command through
//! `ensure_connected()`.

use super::session::{Session, SessionStatus};
use crate::telemetry::TelemetryReader;
use crate::transport::{CommandChannel, TransportConnector};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tello_link_shared::codec::Response;
use tello_link_shared::safety::{self, TimeoutBudget};
use tello_link_shared::{
    now_ms, CommandKind, DroneError, FlightStateMachine, FlightStatus, Result, TransitionResult,
};
use tracing::{debug, info, warn};

/// Handshake attempts inside one `connect()`
pub const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 3;

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub handshake_attempts: u32,
    pub budget: TimeoutBudget,
    /// Wait for a late answer after a timeout before the next send
    pub late_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            budget: TimeoutBudget::default(),
            late_grace: Duration::from_millis(safety::LATE_RESPONSE_GRACE_MS),
        }
    }
}

/// Result of a `connect()` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectReport {
    pub connected: bool,
    pub battery: Option<u8>,
    /// False when the call found an existing session and did nothing
    pub handshake_performed: bool,
}

/// Owns the single session to the device
pub struct ConnectionManager<C: TransportConnector> {
    connector: C,
    config: ConnectionConfig,
    session: Option<Session<C::Channel>>,
    /// Status reported while no session is held
    idle_status: SessionStatus,
    telemetry: Option<Arc<TelemetryReader>>,
}

impl<C: TransportConnector> ConnectionManager<C> {
    pub fn new(connector: C, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config,
            session: None,
            idle_status: SessionStatus::Disconnected,
            telemetry: None,
        }
    }

    /// Start and stop the state telemetry listener together with the session
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryReader>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn telemetry(&self) -> Option<Arc<TelemetryReader>> {
        self.telemetry.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.session
            .as_ref()
            .map(|s| s.status())
            .unwrap_or(self.idle_status)
    }

    pub fn budget(&self) -> &TimeoutBudget {
        &self.config.budget
    }

    /// Whether a channel is open, even if the session is degraded
    pub fn has_channel(&self) -> bool {
        self.session.is_some()
    }

    /// Wall-clock time the device last answered
    pub fn last_contact_ms(&self) -> Option<u64> {
        self.session.as_ref().and_then(|s| s.last_contact_ms())
    }

    pub fn retry_count(&self) -> u32 {
        self.session.as_ref().map(|s| s.retry_count()).unwrap_or(0)
    }

    /// Milliseconds since the device last answered, if it ever did
    pub fn since_last_contact_ms(&self) -> Option<u64> {
        self.session
            .as_ref()
            .and_then(|s| s.last_contact())
            .map(|t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    /// Open the link and hand the device over to SDK mode.
    ///
    /// Does nothing when already connected, unless the drone is in
    /// `Emergency`: connecting again is the manual reset out of it.
    pub async fn connect(&mut self, fsm: &mut FlightStateMachine) -> Result<ConnectReport> {
        if self.status() == SessionStatus::Connected && fsm.status() != FlightStatus::Emergency {
            debug!("connect: session already up");
            return Ok(ConnectReport {
                connected: true,
                battery: fsm.battery().map(|b| b.percent),
                handshake_performed: false,
            });
        }

        self.idle_status = SessionStatus::Connecting;
        let mut session = match self.session.take() {
            // A degraded socket may still receive the answer to a timed-out
            // command; re-handshake on it so that answer is discarded there
            Some(mut previous) if !previous.is_broken() => {
                debug!("Re-handshaking on the existing socket");
                previous.set_status(SessionStatus::Connecting);
                previous
            }
            previous => {
                let late_pending = previous.as_ref().is_some_and(|s| s.awaiting_late_response());
                // Released before a new socket binds the same local port
                drop(previous);

                let channel = match self.connector.connect().await {
                    Ok(c) => c,
                    Err(e) => {
                        self.idle_status = SessionStatus::Error;
                        return Err(DroneError::connection(format!(
                            "{} transport: {:#}",
                            self.connector.name(),
                            e
                        )));
                    }
                };
                let mut session = Session::new(channel, self.config.late_grace);
                if late_pending {
                    session.expect_late_response();
                }
                session
            }
        };

        if let Err(e) = handshake(&mut session, fsm, &self.config).await {
            self.idle_status = SessionStatus::Error;
            session.set_status(SessionStatus::Error);
            self.session = Some(session);
            return Err(e);
        }

        session.set_status(SessionStatus::Connected);
        info!(
            "Connected to drone via {} (state {})",
            self.connector.name(),
            fsm.status()
        );

        let battery = match query_battery(&mut session, fsm, self.config.budget.command).await {
            Ok(percent) => Some(percent),
            Err(e) => {
                warn!("Connected but battery query failed: {}", e);
                None
            }
        };

        self.session = Some(session);
        self.idle_status = SessionStatus::Disconnected;
        if let Some(telemetry) = &self.telemetry {
            telemetry.start().await;
        }

        Ok(ConnectReport {
            connected: true,
            battery,
            handshake_performed: true,
        })
    }

    /// Reconnect once if the session is not up
    pub async fn ensure_connected(&mut self, fsm: &mut FlightStateMachine) -> Result<()> {
        if self.status() == SessionStatus::Connected {
            return Ok(());
        }
        match self.since_last_contact_ms() {
            Some(ms) => info!("Session {}, reconnecting (last answer {}ms ago)", self.status(), ms),
            None => info!("Session {}, reconnecting", self.status()),
        }
        self.connect(fsm).await.map(|_| ())
    }

    /// Release the socket. Safe to call in any state.
    pub async fn disconnect(&mut self, fsm: &mut FlightStateMachine) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.stop().await;
        }
        if self.session.take().is_some() {
            info!("Disconnected from drone");
        }
        self.idle_status = SessionStatus::Disconnected;
        fsm.on_disconnected();
    }

    /// Send one command on the current session.
    ///
    /// A timeout or socket failure marks the session degraded.
    pub async fn exchange(&mut self, kind: &CommandKind, budget: Duration) -> Result<Response> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DroneError::connection("not connected"))?;

        let result = session.exchange(kind, budget).await;
        if let Err(e) = &result {
            if e.is_link_failure() {
                warn!("Session degraded after {}: {}", kind.name(), e);
                session.set_status(SessionStatus::Error);
            }
        }
        result
    }
}

async fn handshake<Ch: CommandChannel>(
    session: &mut Session<Ch>,
    fsm: &mut FlightStateMachine,
    config: &ConnectionConfig,
) -> Result<()> {
    let attempts = config.handshake_attempts.max(1);
    let mut last_error = DroneError::connection("handshake not attempted");

    for attempt in 1..=attempts {
        session.set_retry_count(attempt - 1);
        let outcome = match session
            .exchange(&CommandKind::EnterSdk, config.budget.handshake)
            .await
        {
            Ok(response) => fsm.apply(&CommandKind::EnterSdk, &response, now_ms()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(TransitionResult::Success(_)) => return Ok(()),
            Ok(TransitionResult::Rejected { reason, .. }) => {
                last_error = DroneError::device(reason);
            }
            Ok(other) => {
                last_error = DroneError::protocol(format!("unexpected handshake result {:?}", other));
            }
            Err(e) => last_error = e,
        }
        warn!("Handshake attempt {}/{} failed: {}", attempt, attempts, last_error);
    }

    Err(DroneError::connection(format!(
        "handshake failed after {} attempts: {}",
        attempts, last_error
    )))
}

async fn query_battery<Ch: CommandChannel>(
    session: &mut Session<Ch>,
    fsm: &mut FlightStateMachine,
    budget: Duration,
) -> Result<u8> {
    let response = session.exchange(&CommandKind::Query, budget).await?;
    fsm.apply(&CommandKind::Query, &response, now_ms())?;
    fsm.battery()
        .map(|b| b.percent)
        .ok_or_else(|| DroneError::protocol("battery value missing"))
}

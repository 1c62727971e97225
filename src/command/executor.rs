//! Command executor - validates and dispatches requests against the device
//!
//! Runs inside the serializer's worker task, so it is the only code that
//! ever touches the session or the flight state machine.

use crate::connection::{ConnectionManager, SessionStatus};
use crate::transport::TransportConnector;
use crate::video::VideoStream;
use serde::Serialize;
use std::sync::Arc;
use tello_link_shared::{
    now_ms, Command, CommandKind, DroneError, DroneState, FlightStateMachine, FlightStatus,
    Result, SafetyPolicy, TransitionResult,
};
use tracing::{info, warn};

/// A unit of work for the serializer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect,
    Disconnect,
    Drone(Command),
    VideoStart,
    VideoStop,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect => "connect",
            Request::Disconnect => "disconnect",
            Request::Drone(cmd) => cmd.kind().name(),
            Request::VideoStart => "video_start",
            Request::VideoStop => "video_stop",
        }
    }

    pub fn is_emergency(&self) -> bool {
        matches!(self, Request::Drone(cmd) if cmd.kind().is_emergency())
    }

    pub fn describe(&self) -> String {
        match self {
            Request::Drone(cmd) => cmd.kind().to_string(),
            other => other.name().to_string(),
        }
    }
}

/// Values returned alongside a successful outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    pub connected: bool,
    pub flight_status: Option<FlightStatus>,
}

/// Result of a successful request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub message: String,
    pub data: OutcomeData,
}

/// Executes requests on behalf of the serializer
pub struct CommandExecutor<C: TransportConnector> {
    pub(crate) connection: ConnectionManager<C>,
    pub(crate) fsm: FlightStateMachine,
    pub(crate) policy: SafetyPolicy,
    pub(crate) video: Arc<VideoStream>,
}

impl<C: TransportConnector> CommandExecutor<C> {
    pub fn new(connection: ConnectionManager<C>, policy: SafetyPolicy, video: Arc<VideoStream>) -> Self {
        Self {
            connection,
            fsm: FlightStateMachine::new(),
            policy,
            video,
        }
    }

    pub fn session_status(&self) -> SessionStatus {
        self.connection.status()
    }

    pub fn drone_state(&self) -> DroneState {
        self.fsm.snapshot()
    }

    pub fn policy(&self) -> SafetyPolicy {
        self.policy
    }

    pub fn video(&self) -> Arc<VideoStream> {
        self.video.clone()
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    /// Execute a request and return the outcome for the caller
    pub async fn execute(&mut self, request: Request) -> Result<CommandOutcome> {
        match request {
            Request::Connect => self.handle_connect().await,
            Request::Disconnect => self.handle_disconnect().await,
            Request::VideoStart => self.handle_video_start().await,
            Request::VideoStop => self.handle_video_stop().await,
            Request::Drone(command) => {
                let kind = command.kind();
                info!("Executing {} for {}", kind, command.caller_id());

                if kind.is_emergency() {
                    return self.handle_emergency().await;
                }

                self.policy.check_parameters(&kind)?;
                // A known flight state is enough to refuse without a reconnect
                if self.fsm.status() != FlightStatus::Unknown {
                    self.fsm.validate(&kind)?;
                }
                self.connection.ensure_connected(&mut self.fsm).await?;

                match kind {
                    CommandKind::Takeoff => self.handle_takeoff().await,
                    CommandKind::Query => self.handle_query().await,
                    CommandKind::EnterSdk => Err(DroneError::invalid_parameter(
                        "the handshake is only sent by connect",
                    )),
                    other => self.handle_flight(other).await,
                }
            }
        }
    }

    /// Validate, send, decode and apply one command.
    ///
    /// Returns the flight status after the device confirmed the command.
    pub(crate) async fn dispatch(&mut self, kind: CommandKind) -> Result<FlightStatus> {
        self.fsm.validate(&kind)?;

        let budget = kind.response_timeout(self.connection.budget());
        let response = self.connection.exchange(&kind, budget).await?;

        match self.fsm.apply(&kind, &response, now_ms())? {
            TransitionResult::Success(state) => Ok(state),
            TransitionResult::Rejected { state, reason } => {
                warn!("Device refused {} (now {}): {}", kind, state, reason);
                Err(DroneError::device(reason))
            }
            TransitionResult::EmergencyStop { .. } => Ok(self.fsm.status()),
        }
    }

    /// Outcome carrying the current connection and flight state
    pub(crate) fn outcome(&self, message: impl Into<String>) -> CommandOutcome {
        CommandOutcome {
            message: message.into(),
            data: OutcomeData {
                battery: self.fsm.battery().map(|b| b.percent),
                connected: self.connection.status() == SessionStatus::Connected,
                flight_status: Some(self.fsm.status()),
            },
        }
    }
}

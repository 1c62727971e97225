//! A single live command session with the device

use crate::transport::CommandChannel;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tello_link_shared::codec::{self, Response};
use tello_link_shared::{now_ms, CommandKind, DroneError, Result};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Link status as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Link failed or degraded; the next command reconnects
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Owns the command channel and enforces one request/response at a time
pub struct Session<C: CommandChannel> {
    channel: C,
    status: SessionStatus,
    last_contact: Option<Instant>,
    last_contact_ms: Option<u64>,
    retry_count: u32,
    /// A timed-out command may still be answered
    awaiting_late_response: bool,
    /// The socket itself failed; reconnecting needs a new channel
    broken: bool,
    late_grace: Duration,
}

impl<C: CommandChannel> Session<C> {
    pub fn new(channel: C, late_grace: Duration) -> Self {
        Self {
            channel,
            status: SessionStatus::Connecting,
            last_contact: None,
            last_contact_ms: None,
            retry_count: 0,
            awaiting_late_response: false,
            broken: false,
            late_grace,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub fn last_contact(&self) -> Option<Instant> {
        self.last_contact
    }

    /// Wall-clock time of the last answer
    pub fn last_contact_ms(&self) -> Option<u64> {
        self.last_contact_ms
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn awaiting_late_response(&self) -> bool {
        self.awaiting_late_response
    }

    /// Treat the first answer within the grace period as belonging to a
    /// command sent on an earlier session
    pub fn expect_late_response(&mut self) {
        self.awaiting_late_response = true;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn set_retry_count(&mut self, count: u32) {
        self.retry_count = count;
    }

    /// Send one command and wait for exactly one answer
    pub async fn exchange(&mut self, kind: &CommandKind, budget: Duration) -> Result<Response> {
        self.settle().await;

        let wire = codec::encode(kind);
        debug!("-> {} ({})", wire, self.channel.peer());
        if let Err(e) = self.channel.send(wire.as_bytes()).await {
            self.broken = true;
            return Err(DroneError::connection(format!("{:#}", e)));
        }

        match timeout(budget, self.channel.recv()).await {
            Ok(Ok(datagram)) => {
                self.last_contact = Some(Instant::now());
                self.last_contact_ms = Some(now_ms());
                debug!("<- {:?}", String::from_utf8_lossy(&datagram));
                Ok(codec::decode(&datagram)?)
            }
            Ok(Err(e)) => {
                self.broken = true;
                Err(DroneError::connection(format!("{:#}", e)))
            }
            Err(_) => {
                warn!("No response to '{}' within {:?}", wire, budget);
                self.awaiting_late_response = true;
                Err(DroneError::Timeout {
                    command: kind.name(),
                    after: budget,
                })
            }
        }
    }

    /// Clear anything that could be mistaken for the next command's answer
    async fn settle(&mut self) {
        if self.awaiting_late_response {
            self.awaiting_late_response = false;
            if let Ok(Ok(late)) = timeout(self.late_grace, self.channel.recv()).await {
                debug!("Discarding late response {:?}", String::from_utf8_lossy(&late));
            }
        }

        loop {
            match self.channel.try_recv() {
                Ok(Some(stale)) => {
                    debug!("Discarding stale datagram {:?}", String::from_utf8_lossy(&stale))
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Drain stopped: {:#}", e);
                    break;
                }
            }
        }
    }
}

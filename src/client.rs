//! Thin HTTP client for a running daemon
//!
//! Used by `tello-link call ...` so that short-lived invocations never open
//! their own UDP session to the drone.

use crate::api::CALLER_HEADER;
use anyhow::{Context, Result};
use serde_json::{json, Value};
use tello_link_shared::{MoveDirection, RotateDirection};

/// One control operation as exposed by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Health,
    Status,
    Connect,
    Disconnect,
    Battery,
    Takeoff,
    Land,
    Emergency,
    Move {
        direction: MoveDirection,
        distance_cm: u32,
    },
    Rotate {
        direction: RotateDirection,
        degrees: u32,
    },
    VideoStart,
    VideoStop,
    VideoFrame,
}

impl Operation {
    fn path(&self) -> &'static str {
        match self {
            Operation::Health => "/health",
            Operation::Status => "/status",
            Operation::Connect => "/connect",
            Operation::Disconnect => "/disconnect",
            Operation::Battery => "/battery",
            Operation::Takeoff => "/takeoff",
            Operation::Land => "/land",
            Operation::Emergency => "/emergency",
            Operation::Move { .. } => "/move",
            Operation::Rotate { .. } => "/rotate",
            Operation::VideoStart => "/video/start",
            Operation::VideoStop => "/video/stop",
            Operation::VideoFrame => "/video/frame",
        }
    }

    fn is_read_only(&self) -> bool {
        matches!(
            self,
            Operation::Health | Operation::Status | Operation::Battery | Operation::VideoFrame
        )
    }

    fn body(&self) -> Option<Value> {
        match self {
            Operation::Move {
                direction,
                distance_cm,
            } => Some(json!({ "direction": direction, "distance": distance_cm })),
            Operation::Rotate { direction, degrees } => {
                Some(json!({ "direction": direction, "degrees": degrees }))
            }
            _ => None,
        }
    }
}

pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
    caller_id: String,
}

impl ControlClient {
    pub fn new(base_url: impl Into<String>, caller_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            caller_id: caller_id.into(),
        }
    }

    /// Run one operation and return the daemon's JSON answer
    pub async fn call(&self, op: Operation, nowait: bool) -> Result<Value> {
        let url = format!("{}{}", self.base_url, op.path());
        let mut request = if op.is_read_only() {
            self.http.get(&url)
        } else {
            self.http.post(&url)
        };
        request = request.header(CALLER_HEADER, &self.caller_id);
        if nowait {
            request = request.query(&[("nowait", "true")]);
        }
        if let Some(body) = op.body() {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("calling {}", url))?;
        response
            .json::<Value>()
            .await
            .with_context(|| format!("decoding answer from {}", url))
    }
}

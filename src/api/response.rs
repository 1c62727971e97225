//! Control response envelope shared by every operation

use crate::command::CommandOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tello_link_shared::{DroneError, Result};

/// `{success, message, data?, error?}` as returned to agents and CLIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Stable error tag, see `DroneError::kind`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
            error: None,
        }
    }

    pub fn failure(err: &DroneError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            data: None,
            error: Some(err.kind().to_string()),
        }
    }

    /// Malformed request; never reached the controller
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            error: Some("bad_request".to_string()),
        }
    }

    pub fn from_outcome(result: Result<CommandOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::ok(outcome.message, outcome.data),
            Err(e) => Self::failure(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_failure_message() {
        let resp = ControlResponse::failure(&DroneError::Timeout {
            command: "move",
            after: Duration::from_secs(7),
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "timeout");
        assert_eq!(json["error"], "timeout");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_outcome_carries_data() {
        let resp = ControlResponse::from_outcome(Ok(CommandOutcome {
            message: "Battery: 45%".into(),
            data: crate::command::OutcomeData {
                battery: Some(45),
                connected: true,
                flight_status: None,
            },
        }));
        assert!(resp.success);
        let data = resp.data.unwrap();
        assert_eq!(data["battery"], 45);
        assert_eq!(data["connected"], true);
    }
}

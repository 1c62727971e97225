//! Plaintext wire codec
//!
//! Commands go out as single ASCII datagrams:
//! ```text
//! command | takeoff | land | forward 100 | cw 90 | emergency | battery? | streamon
//! ```
//! The device answers each one with `ok`, an `error ...` text, or a number
//! for queries. State telemetry arrives on its own port as
//! `key:value;` pairs.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::command::CommandKind;

/// Longest response text echoed back in error messages
const MAX_ECHO_LEN: usize = 48;

/// Errors that can occur while decoding device datagrams
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty response")]
    Empty,

    #[error("non-text response ({0} bytes)")]
    NotText(usize),

    #[error("unrecognized response '{0}'")]
    Unrecognized(String),

    #[error("malformed state field '{0}'")]
    MalformedState(String),
}

/// A decoded answer to one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    /// Device refused or failed the command; carries the device's text
    Error(String),
    /// Numeric answer to a query
    Numeric(i64),
}

impl Response {
    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok)
    }
}

/// Encode a command as its wire text
pub fn encode(kind: &CommandKind) -> String {
    match kind {
        CommandKind::EnterSdk => "command".to_string(),
        CommandKind::Takeoff => "takeoff".to_string(),
        CommandKind::Land => "land".to_string(),
        CommandKind::Move {
            direction,
            distance_cm,
        } => format!("{} {}", direction.as_str(), distance_cm),
        CommandKind::Rotate { direction, degrees } => {
            format!("{} {}", direction.as_str(), degrees)
        }
        CommandKind::Emergency => "emergency".to_string(),
        CommandKind::Query => "battery?".to_string(),
        CommandKind::StreamOn => "streamon".to_string(),
        CommandKind::StreamOff => "streamoff".to_string(),
    }
}

fn as_text(buf: &[u8]) -> Result<&str, CodecError> {
    let text = std::str::from_utf8(buf).map_err(|_| CodecError::NotText(buf.len()))?;
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return Err(CodecError::NotText(buf.len()));
    }
    Ok(text.trim())
}

fn echo(text: &str) -> String {
    text.chars().take(MAX_ECHO_LEN).collect()
}

/// Decode one response datagram
pub fn decode(buf: &[u8]) -> Result<Response, CodecError> {
    let text = as_text(buf)?;
    if text.is_empty() {
        return Err(CodecError::Empty);
    }

    let lower = text.to_ascii_lowercase();
    if lower == "ok" {
        return Ok(Response::Ok);
    }
    if lower.starts_with("error") || lower == "out of range" || lower.starts_with("unknown command")
    {
        return Ok(Response::Error(echo(text)));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Ok(Response::Numeric(n));
    }

    Err(CodecError::Unrecognized(echo(text)))
}

/// One state telemetry datagram, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateTelemetry {
    pub fields: BTreeMap<String, String>,
}

impl StateTelemetry {
    fn int(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn battery_percent(&self) -> Option<u8> {
        self.int("bat").and_then(|v| u8::try_from(v).ok()).filter(|v| *v <= 100)
    }

    pub fn height_cm(&self) -> Option<i64> {
        self.int("h")
    }

    /// Motor-on time in seconds
    pub fn flight_time_s(&self) -> Option<i64> {
        self.int("time")
    }

    /// Time-of-flight distance sensor reading
    pub fn tof_cm(&self) -> Option<i64> {
        self.int("tof")
    }

    /// Lowest and highest board temperature
    pub fn temperature_c(&self) -> Option<(i64, i64)> {
        Some((self.int("templ")?, self.int("temph")?))
    }
}

/// Parse a state telemetry datagram
pub fn parse_state(buf: &[u8]) -> Result<StateTelemetry, CodecError> {
    let text = as_text(buf)?;
    if text.is_empty() {
        return Err(CodecError::Empty);
    }

    let mut fields = BTreeMap::new();
    for pair in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedState(echo(pair)))?;
        if key.is_empty() {
            return Err(CodecError::MalformedState(echo(pair)));
        }
        fields.insert(key.to_string(), value.to_string());
    }

    Ok(StateTelemetry { fields })
}

//! Command execution for the drone session
//!
//! This module handles:
//! - Serializing concurrent callers onto one worker (`DroneController`)
//! - Validating and dispatching requests (`CommandExecutor`)
//! - Per-request handlers (flight, emergency, status, video)

mod executor;
mod handlers;
mod serializer;

pub use executor::{CommandExecutor, CommandOutcome, OutcomeData, Request};
pub use serializer::{DroneController, DroneSnapshot, PendingRequest, StatusReport};

//! tello-link - persistent session manager for a Tello-class quadcopter
//!
//! One process owns the UDP session to the drone. Every caller, local or
//! over HTTP, goes through the same `DroneController`, which serializes
//! commands onto that session.

pub mod api;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod telemetry;
pub mod transport;
pub mod video;

use std::sync::Arc;

pub use command::{CommandExecutor, CommandOutcome, DroneController, DroneSnapshot, Request};
pub use config::Config;
pub use connection::{ConnectionManager, SessionStatus};
pub use tello_link_shared as shared;

use telemetry::TelemetryReader;
use transport::UdpConnector;
use video::VideoStream;

/// Wire a controller for the configured drone and start its worker
pub fn spawn_controller(config: &Config) -> DroneController {
    let connector = UdpConnector::new(config.drone.local_bind, config.drone.address);
    let mut connection = ConnectionManager::new(connector, config.connection());
    if config.drone.telemetry {
        connection = connection.with_telemetry(Arc::new(TelemetryReader::new(config.drone.state_bind)));
    }

    let video = Arc::new(VideoStream::new(config.drone.video_bind));
    let executor = CommandExecutor::new(connection, config.policy(), video);
    DroneController::spawn(executor)
}

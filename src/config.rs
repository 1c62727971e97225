//! Configuration file support for tello-link.
//!
//! Every section and field is optional; missing values fall back to the
//! constants in `tello_link_shared::safety` and the device's factory
//! addresses.
//!
//! ```toml
//! [general]
//! log_level = "debug"
//!
//! [drone]
//! address = "192.168.10.1:8889"
//! handshake_attempts = 3
//!
//! [timeouts]
//! flight_ms = 15000
//!
//! [safety]
//! min_takeoff_battery = 25
//!
//! [listen]
//! port = 8080
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tello_link_shared::safety::{self, SafetyPolicy, TimeoutBudget};

use crate::connection::{ConnectionConfig, DEFAULT_HANDSHAKE_ATTEMPTS};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub drone: DroneConfig,
    pub timeouts: TimeoutConfig,
    pub safety: SafetyConfig,
    pub listen: ListenConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Used when RUST_LOG is not set
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Device addresses and local ports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    /// Device command port
    pub address: SocketAddr,
    /// Local address the command socket binds to
    pub local_bind: SocketAddr,
    /// State telemetry listener
    pub state_bind: SocketAddr,
    pub telemetry: bool,
    /// Video listener
    pub video_bind: SocketAddr,
    pub handshake_attempts: u32,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1)), 8889),
            local_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 9000),
            state_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8890),
            telemetry: true,
            video_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 11111),
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
        }
    }
}

/// Response budgets in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub handshake_ms: u64,
    pub command_ms: u64,
    pub flight_ms: u64,
    pub motion_base_ms: u64,
    pub motion_per_cm_ms: u64,
    pub motion_per_degree_ms: u64,
    pub max_ms: u64,
    pub late_grace_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: safety::HANDSHAKE_TIMEOUT_MS,
            command_ms: safety::COMMAND_TIMEOUT_MS,
            flight_ms: safety::FLIGHT_TIMEOUT_MS,
            motion_base_ms: safety::COMMAND_TIMEOUT_MS,
            motion_per_cm_ms: safety::MOTION_PER_CM_MS,
            motion_per_degree_ms: safety::MOTION_PER_DEGREE_MS,
            max_ms: safety::MAX_COMMAND_TIMEOUT_MS,
            late_grace_ms: safety::LATE_RESPONSE_GRACE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub min_takeoff_battery: u8,
    pub battery_freshness_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            min_takeoff_battery: safety::TAKEOFF_MIN_BATTERY_PERCENT,
            battery_freshness_ms: safety::BATTERY_FRESHNESS_MS,
        }
    }
}

/// HTTP control endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    pub address: IpAddr,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
        }
    }
}

impl Config {
    /// Load and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("in config {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parsing TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing config")
    }

    pub fn validate(&self) -> Result<()> {
        let level = self.general.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            bail!(
                "[general].log_level '{}' is not one of {}",
                self.general.log_level,
                LOG_LEVELS.join(", ")
            );
        }

        if self.drone.handshake_attempts == 0 {
            bail!("[drone].handshake_attempts must be at least 1");
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("handshake_ms", t.handshake_ms),
            ("command_ms", t.command_ms),
            ("flight_ms", t.flight_ms),
            ("motion_base_ms", t.motion_base_ms),
            ("max_ms", t.max_ms),
        ] {
            if value == 0 {
                bail!("[timeouts].{} must be positive", name);
            }
        }
        if t.max_ms < t.motion_base_ms {
            bail!(
                "[timeouts].max_ms ({}) is below motion_base_ms ({})",
                t.max_ms,
                t.motion_base_ms
            );
        }

        if self.safety.min_takeoff_battery > 100 {
            bail!(
                "[safety].min_takeoff_battery {} is not a percentage",
                self.safety.min_takeoff_battery
            );
        }
        if self.safety.battery_freshness_ms == 0 {
            bail!("[safety].battery_freshness_ms must be positive");
        }

        Ok(())
    }

    pub fn budget(&self) -> TimeoutBudget {
        let t = &self.timeouts;
        TimeoutBudget {
            handshake: Duration::from_millis(t.handshake_ms),
            command: Duration::from_millis(t.command_ms),
            flight: Duration::from_millis(t.flight_ms),
            motion_base: Duration::from_millis(t.motion_base_ms),
            per_cm: Duration::from_millis(t.motion_per_cm_ms),
            per_degree: Duration::from_millis(t.motion_per_degree_ms),
            max: Duration::from_millis(t.max_ms),
        }
    }

    pub fn policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            min_takeoff_battery: self.safety.min_takeoff_battery,
            battery_freshness_ms: self.safety.battery_freshness_ms,
        }
    }

    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            handshake_attempts: self.drone.handshake_attempts,
            budget: self.budget(),
            late_grace: Duration::from_millis(self.timeouts.late_grace_ms),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen.address, self.listen.port)
    }
}

//! Connection lifecycle for the device command link
//!
//! - `Session` owns the channel and the one-at-a-time request/response rule
//! - `ConnectionManager` opens, handshakes, degrades and releases sessions

mod manager;
mod session;

pub use manager::{ConnectReport, ConnectionConfig, ConnectionManager, DEFAULT_HANDSHAKE_ATTEMPTS};
pub use session::{Session, SessionStatus};

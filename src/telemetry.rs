//! State Telemetry Reader
//!
//! Listens on the device's state port and keeps the most recent parsed
//! datagram. Telemetry is informational only; takeoff is still gated on a
//! battery value read through the command channel.

use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tello_link_shared::codec::{self, StateTelemetry};
use tello_link_shared::now_ms;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One parsed state datagram with its receive time
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySample {
    pub state: StateTelemetry,
    pub received_at_ms: u64,
}

/// Background reader for the state telemetry port
pub struct TelemetryReader {
    bind: SocketAddr,
    latest: Arc<RwLock<Option<TelemetrySample>>>,
    task: Mutex<Option<(JoinHandle<()>, SocketAddr)>>,
}

impl TelemetryReader {
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            latest: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Start listening. Returns the bound address, or None when the port
    /// could not be bound (logged, not fatal).
    pub async fn start(&self) -> Option<SocketAddr> {
        let mut task = self.task.lock().await;
        if let Some((_, addr)) = task.as_ref() {
            return Some(*addr);
        }

        let socket = match UdpSocket::bind(self.bind).await {
            Ok(s) => s,
            Err(e) => {
                warn!("State telemetry unavailable, cannot bind {}: {}", self.bind, e);
                return None;
            }
        };
        let addr = match socket.local_addr() {
            Ok(a) => a,
            Err(e) => {
                warn!("State telemetry socket has no local address: {}", e);
                return None;
            }
        };

        let latest = self.latest.clone();
        let handle = tokio::spawn(async move {
            read_loop(socket, latest).await;
        });
        info!("State telemetry listening on {}", addr);
        *task = Some((handle, addr));
        Some(addr)
    }

    pub async fn stop(&self) {
        if let Some((handle, addr)) = self.task.lock().await.take() {
            handle.abort();
            info!("State telemetry on {} stopped", addr);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Latest sample, if any arrived since the reader started
    pub async fn latest(&self) -> Option<TelemetrySample> {
        self.latest.read().await.clone()
    }
}

async fn read_loop(socket: UdpSocket, latest: Arc<RwLock<Option<TelemetrySample>>>) {
    let mut buf = vec![0u8; 1024];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!("State telemetry receive error: {}", e);
                continue;
            }
        };

        match codec::parse_state(&buf[..n]) {
            Ok(state) => {
                *latest.write().await = Some(TelemetrySample {
                    state,
                    received_at_ms: now_ms(),
                });
            }
            Err(e) => debug!("Ignoring state datagram from {}: {}", from, e),
        }
    }
}

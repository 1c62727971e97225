//! Scripted stand-in for the drone's command port
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tello_link::{spawn_controller, Config, DroneController};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One command as seen by the fake device
#[derive(Debug, Clone)]
pub struct Exchange {
    pub command: String,
    pub received_at: Instant,
    pub answered_at: Option<Instant>,
}

#[derive(Default)]
struct Script {
    battery: i64,
    delays: Vec<(String, Duration)>,
    silent: Vec<String>,
    errors: Vec<(String, String)>,
    log: Vec<Exchange>,
}

impl Script {
    fn reply_for(&self, command: &str) -> (Option<String>, Duration) {
        let delay = self
            .delays
            .iter()
            .find(|(p, _)| command.starts_with(p.as_str()))
            .map(|(_, d)| *d)
            .unwrap_or(Duration::ZERO);

        if self.silent.iter().any(|p| command.starts_with(p.as_str())) {
            return (None, delay);
        }
        if let Some((_, reply)) = self.errors.iter().find(|(p, _)| command.starts_with(p.as_str())) {
            return (Some(reply.clone()), delay);
        }
        if command == "battery?" {
            return (Some(self.battery.to_string()), delay);
        }
        (Some("ok".to_string()), delay)
    }
}

pub struct FakeTello {
    addr: SocketAddr,
    script: Arc<Mutex<Script>>,
    task: JoinHandle<()>,
}

impl FakeTello {
    /// Fake device on a loopback port reporting 45% battery
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let script = Arc::new(Mutex::new(Script {
            battery: 45,
            ..Default::default()
        }));

        let shared = script.clone();
        let task = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                let command = String::from_utf8_lossy(&buf[..n]).into_owned();
                let (reply, delay) = {
                    let mut script = shared.lock().unwrap();
                    script.log.push(Exchange {
                        command: command.clone(),
                        received_at: Instant::now(),
                        answered_at: None,
                    });
                    script.reply_for(&command)
                };

                let Some(reply) = reply else { continue };
                tokio::time::sleep(delay).await;
                let _ = socket.send_to(reply.as_bytes(), from).await;

                let mut script = shared.lock().unwrap();
                if let Some(last) = script.log.last_mut() {
                    last.answered_at = Some(Instant::now());
                }
            }
        });

        Self { addr, script, task }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_battery(&self, percent: i64) {
        self.script.lock().unwrap().battery = percent;
    }

    /// Hold the answer to commands starting with `prefix`
    pub fn delay(&self, prefix: &str, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .delays
            .push((prefix.to_string(), delay));
    }

    /// Never answer commands starting with `prefix`
    pub fn silence(&self, prefix: &str) {
        self.script.lock().unwrap().silent.push(prefix.to_string());
    }

    pub fn unsilence(&self, prefix: &str) {
        self.script.lock().unwrap().silent.retain(|p| p != prefix);
    }

    /// Answer commands starting with `prefix` with `reply`
    pub fn fail(&self, prefix: &str, reply: &str) {
        self.script
            .lock()
            .unwrap()
            .errors
            .push((prefix.to_string(), reply.to_string()));
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.script.lock().unwrap().log.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.exchanges().into_iter().map(|e| e.command).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }
}

impl Drop for FakeTello {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Config pointing at `device` with short budgets and loopback ports
pub fn test_config(device: SocketAddr) -> Config {
    let mut config = Config::default();
    config.drone.address = device;
    config.drone.local_bind = "127.0.0.1:0".parse().unwrap();
    config.drone.telemetry = false;
    config.drone.video_bind = "127.0.0.1:0".parse().unwrap();
    config.drone.handshake_attempts = 2;

    config.timeouts.handshake_ms = 300;
    config.timeouts.command_ms = 300;
    config.timeouts.flight_ms = 500;
    config.timeouts.motion_base_ms = 400;
    config.timeouts.motion_per_cm_ms = 1;
    config.timeouts.motion_per_degree_ms = 1;
    config.timeouts.max_ms = 1_000;
    config.timeouts.late_grace_ms = 100;
    config
}

pub fn controller_for(fake: &FakeTello) -> DroneController {
    spawn_controller(&test_config(fake.addr()))
}

/// A loopback UDP port that was free a moment ago
pub async fn free_udp_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap().port()
}

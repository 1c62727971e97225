//! UDP transport for the device command port

use crate::transport::traits::{CommandChannel, TransportConnector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::debug;

/// Largest response datagram the device produces
const MAX_RESPONSE_LEN: usize = 2048;

/// Connected UDP socket implementing CommandChannel
pub struct UdpCommandChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    buf: Vec<u8>,
}

impl UdpCommandChannel {
    pub fn new(socket: UdpSocket, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            buf: vec![0u8; MAX_RESPONSE_LEN],
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait]
impl CommandChannel for UdpCommandChannel {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.socket
            .send(payload)
            .await
            .with_context(|| format!("send to {}", self.peer))?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Bytes> {
        let n = self
            .socket
            .recv(&mut self.buf)
            .await
            .with_context(|| format!("recv from {}", self.peer))?;
        Ok(Bytes::copy_from_slice(&self.buf[..n]))
    }

    fn try_recv(&mut self) -> Result<Option<Bytes>> {
        match self.socket.try_recv(&mut self.buf) {
            Ok(n) => Ok(Some(Bytes::copy_from_slice(&self.buf[..n]))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e).with_context(|| format!("recv from {}", self.peer)),
        }
    }

    fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// UDP connector for the device command port
#[derive(Debug, Clone)]
pub struct UdpConnector {
    local_bind: SocketAddr,
    device_addr: SocketAddr,
}

impl UdpConnector {
    pub fn new(local_bind: SocketAddr, device_addr: SocketAddr) -> Self {
        Self {
            local_bind,
            device_addr,
        }
    }

    pub fn device_addr(&self) -> SocketAddr {
        self.device_addr
    }
}

#[async_trait]
impl TransportConnector for UdpConnector {
    type Channel = UdpCommandChannel;

    async fn connect(&self) -> Result<Self::Channel> {
        let socket = UdpSocket::bind(self.local_bind)
            .await
            .with_context(|| format!("bind {}", self.local_bind))?;
        // Connected sockets only deliver datagrams from the device
        socket
            .connect(self.device_addr)
            .await
            .with_context(|| format!("connect {}", self.device_addr))?;
        debug!(
            "UDP command channel {} -> {}",
            socket.local_addr()?,
            self.device_addr
        );
        Ok(UdpCommandChannel::new(socket, self.device_addr))
    }

    fn name(&self) -> &'static str {
        "UDP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_udp_channel_round_trip() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let device_addr = device.local_addr().unwrap();
        let connector = UdpConnector::new("127.0.0.1:0".parse().unwrap(), device_addr);
        assert_eq!(connector.name(), "UDP");

        let mut channel = connector.connect().await.unwrap();
        assert_eq!(channel.peer(), device_addr);
        assert!(channel.try_recv().unwrap().is_none());

        channel.send(b"command").await.unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = device.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"command");

        device.send_to(b"ok", from).await.unwrap();
        assert_eq!(&channel.recv().await.unwrap()[..], b"ok");
    }
}

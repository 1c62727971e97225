//! Transport trait abstraction for the device command link

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;

/// A datagram channel to the device's command port
#[async_trait]
pub trait CommandChannel: Send + Sync + 'static {
    /// Send one command datagram
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait for the next datagram from the device
    async fn recv(&mut self) -> Result<Bytes>;

    /// Take an already-queued datagram, if any, without waiting
    fn try_recv(&mut self) -> Result<Option<Bytes>>;

    /// Address of the device end
    fn peer(&self) -> SocketAddr;
}

/// Factory for opening command channels
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The channel type this connector produces
    type Channel: CommandChannel;

    /// Attempt to open a channel
    async fn connect(&self) -> Result<Self::Channel>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

pub mod traits;
pub mod udp;

pub use traits::{CommandChannel, TransportConnector};
pub use udp::{UdpCommandChannel, UdpConnector};

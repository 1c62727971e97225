//! Video channel
//!
//! The device streams its encoded video as a sequence of UDP datagrams of at
//! most `MAX_VIDEO_DATAGRAM` bytes; a shorter datagram closes the current
//! frame. Frames are kept in memory and handed to a `FrameDecoder` only when
//! a caller asks for one, so the command serializer is never involved.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tello_link_shared::{now_ms, DroneError, Result};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest datagram the device sends on the video port
pub const MAX_VIDEO_DATAGRAM: usize = 1460;

/// Frames growing past this are discarded as corrupt
pub const MAX_FRAME_BYTES: usize = 2 * 1024 * 1024;

/// An image produced from one encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

/// Turns one encoded frame into a still image
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, frame: &[u8]) -> Result<DecodedImage>;
}

/// Returns the encoded frame unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn decode(&self, frame: &[u8]) -> Result<DecodedImage> {
        Ok(DecodedImage {
            bytes: frame.to_vec(),
            mime: "video/h264",
        })
    }
}

/// A still image as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoFrame {
    /// Base64 of the decoded image
    pub image: String,
    pub captured_at_ms: u64,
    pub mime: String,
}

/// Reassembles frames from video datagrams
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one datagram; returns a frame when this datagram completes one
    pub fn push(&mut self, datagram: &[u8]) -> Option<Bytes> {
        if self.buf.len() + datagram.len() > MAX_FRAME_BYTES {
            warn!("Dropping oversized video frame ({} bytes)", self.buf.len());
            self.buf.clear();
            return None;
        }

        self.buf.extend_from_slice(datagram);
        if datagram.len() < MAX_VIDEO_DATAGRAM && !self.buf.is_empty() {
            return Some(self.buf.split().freeze());
        }
        None
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Debug, Clone)]
struct CapturedFrame {
    data: Bytes,
    captured_at_ms: u64,
}

/// Receiver for the video port
pub struct VideoStream {
    bind: SocketAddr,
    decoder: Arc<dyn FrameDecoder>,
    latest: Arc<RwLock<Option<CapturedFrame>>>,
    task: Mutex<Option<(JoinHandle<()>, SocketAddr)>>,
}

impl VideoStream {
    pub fn new(bind: SocketAddr) -> Self {
        Self::with_decoder(bind, Arc::new(PassthroughDecoder))
    }

    pub fn with_decoder(bind: SocketAddr, decoder: Arc<dyn FrameDecoder>) -> Self {
        Self {
            bind,
            decoder,
            latest: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Bind the video port and start collecting frames
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut task = self.task.lock().await;
        if let Some((_, addr)) = task.as_ref() {
            return Ok(*addr);
        }

        let socket = UdpSocket::bind(self.bind).await.map_err(|e| {
            DroneError::video_unavailable(format!("cannot bind {}: {}", self.bind, e))
        })?;
        let addr = socket
            .local_addr()
            .map_err(|e| DroneError::video_unavailable(e.to_string()))?;

        *self.latest.write().await = None;
        let latest = self.latest.clone();
        let handle = tokio::spawn(async move {
            receive_loop(socket, latest).await;
        });
        info!("Video receiver listening on {}", addr);
        *task = Some((handle, addr));
        Ok(addr)
    }

    pub async fn stop(&self) {
        if let Some((handle, addr)) = self.task.lock().await.take() {
            handle.abort();
            info!("Video receiver on {} stopped", addr);
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Decode the most recent complete frame
    pub async fn latest_frame(&self) -> Result<VideoFrame> {
        if !self.is_running().await {
            return Err(DroneError::video_unavailable("video stream is not started"));
        }
        let frame = self
            .latest
            .read()
            .await
            .clone()
            .ok_or_else(|| DroneError::video_unavailable("no frame received yet"))?;

        let image = self.decoder.decode(&frame.data)?;
        Ok(VideoFrame {
            image: STANDARD.encode(&image.bytes),
            captured_at_ms: frame.captured_at_ms,
            mime: image.mime.to_string(),
        })
    }
}

async fn receive_loop(socket: UdpSocket, latest: Arc<RwLock<Option<CapturedFrame>>>) {
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; 2048];
    loop {
        let n = match socket.recv(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Video receive error: {}", e);
                continue;
            }
        };

        if let Some(data) = assembler.push(&buf[..n]) {
            debug!("Video frame complete ({} bytes)", data.len());
            *latest.write().await = Some(CapturedFrame {
                data,
                captured_at_ms: now_ms(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_short_datagram_closes_frame() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[1u8; MAX_VIDEO_DATAGRAM]).is_none());
        assert!(assembler.push(&[2u8; MAX_VIDEO_DATAGRAM]).is_none());
        assert_eq!(assembler.pending_len(), 2 * MAX_VIDEO_DATAGRAM);

        let frame = assembler.push(&[3u8; 100]).expect("frame complete");
        assert_eq!(frame.len(), 2 * MAX_VIDEO_DATAGRAM + 100);
        assert_eq!(frame[0], 1);
        assert_eq!(frame[frame.len() - 1], 3);
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn test_single_small_datagram_is_a_frame() {
        let mut assembler = FrameAssembler::new();
        let frame = assembler.push(b"\x00\x00\x00\x01sps").unwrap();
        assert_eq!(&frame[..], b"\x00\x00\x00\x01sps");
        assert!(assembler.push(&[]).is_none());
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let mut assembler = FrameAssembler::new();
        let chunk = [0u8; MAX_VIDEO_DATAGRAM];
        for _ in 0..(MAX_FRAME_BYTES / MAX_VIDEO_DATAGRAM) {
            assembler.push(&chunk);
        }
        assert!(assembler.push(&chunk).is_none());
        assert_eq!(assembler.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_frame_unavailable_until_started() {
        let video = VideoStream::new("127.0.0.1:0".parse().unwrap());
        let err = video.latest_frame().await.unwrap_err();
        assert_eq!(err.kind(), "video_unavailable");

        video.start().await.unwrap();
        let err = video.latest_frame().await.unwrap_err();
        assert_eq!(err.kind(), "video_unavailable");
        video.stop().await;
    }

    #[tokio::test]
    async fn test_latest_frame_is_base64() {
        let video = VideoStream::new("127.0.0.1:0".parse().unwrap());
        let addr = video.start().await.unwrap();

        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        device.send_to(b"frame", addr).await.unwrap();

        let mut frame = None;
        for _ in 0..50 {
            if let Ok(f) = video.latest_frame().await {
                frame = Some(f);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let frame = frame.expect("frame should arrive");
        assert_eq!(frame.image, STANDARD.encode(b"frame"));
        assert_eq!(frame.mime, "video/h264");
        assert!(frame.captured_at_ms > 0);
        video.stop().await;
    }
}

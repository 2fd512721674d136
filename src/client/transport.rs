//! Byte transport underneath the protocol client.
//!
//! One `send` carries exactly one envelope and one `receive` yields exactly
//! one, so the codec never has to re-frame. Over TCP this uses the packet
//! layout of the legacy server: a big-endian `u32` packet length, then a
//! big-endian `u32` string length, then the UTF-8 bytes.

use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::common::error::TransportError;

/// Upper bound on one inbound packet; a larger length prefix means a corrupt stream.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

#[async_trait]
pub trait FrameSender: Send + Sync {
    /// Sends one frame. `Ok` means the whole frame was handed to the peer.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    async fn close(&self);
}

#[async_trait]
pub trait FrameReceiver: Send {
    /// Blocks until the next complete frame arrives.
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError>;
}

pub struct PacketWriter<W> {
    inner: Mutex<BufWriter<W>>,
}

impl<W: AsyncWrite + Unpin + Send> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: Mutex::new(BufWriter::new(writer)) }
    }
}

/// Wraps `frame` as a string packet.
pub fn encode_packet(frame: &[u8]) -> Result<Vec<u8>, TransportError> {
    let str_len =
        u32::try_from(frame.len()).map_err(|_| TransportError::FrameTooLarge(frame.len()))?;
    let packet_len = str_len.checked_add(4).ok_or(TransportError::FrameTooLarge(frame.len()))?;
    let mut out = Vec::with_capacity(frame.len() + 8);
    out.extend_from_slice(&packet_len.to_be_bytes());
    out.extend_from_slice(&str_len.to_be_bytes());
    out.extend_from_slice(frame);
    Ok(out)
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSender for PacketWriter<W> {
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let packet = encode_packet(frame)?;
        let mut writer = self.inner.lock().await;
        writer.write_all(&packet).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let mut writer = self.inner.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of write half failed: {}", e);
        }
    }
}

pub struct PacketReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin + Send> PacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self { inner: BufReader::new(reader) }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameReceiver for PacketReader<R> {
    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let size = self.inner.read_u32().await? as usize;
        if size > MAX_PACKET_SIZE {
            return Err(TransportError::FrameTooLarge(size));
        }
        let mut payload = vec![0u8; size];
        self.inner.read_exact(&mut payload).await?;

        // A string packet carries its own length; anything else is passed through.
        if payload.len() >= 4 {
            let declared =
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
            if declared == payload.len() - 4 {
                payload.drain(..4);
                return Ok(payload);
            }
        }
        debug!("Packet of {} bytes has no string header, passing through", size);
        Ok(payload)
    }
}

pub type TcpSender = PacketWriter<OwnedWriteHalf>;
pub type TcpReceiver = PacketReader<OwnedReadHalf>;

pub async fn connect(
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<(TcpSender, TcpReceiver), TransportError> {
    let target = format!("{}:{}", address, port);
    info!("Connecting to {}", target);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(TransportError::ConnectFailed(target, e.to_string())),
        Err(_) => return Err(TransportError::ConnectTimeout(target)),
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not set TCP_NODELAY: {}", e);
    }
    info!("Connected to {}", target);
    let (reader, writer) = stream.into_split();
    Ok((PacketWriter::new(writer), PacketReader::new(reader)))
}

/// In-process transport; the [`memory::ServerEnd`] plays the server in tests and tooling.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    use crate::common::codec;
    use crate::common::protocol::{SERVER_ID, TYPE_ERROR};

    pub struct MemorySender {
        tx: mpsc::UnboundedSender<Vec<u8>>,
        closed: AtomicBool,
        close_calls: Arc<AtomicUsize>,
    }

    pub struct MemoryReceiver {
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
    }

    pub struct ServerEnd {
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        close_calls: Arc<AtomicUsize>,
    }

    pub fn pair() -> (MemorySender, MemoryReceiver, ServerEnd) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        let close_calls = Arc::new(AtomicUsize::new(0));
        (
            MemorySender {
                tx: client_tx,
                closed: AtomicBool::new(false),
                close_calls: close_calls.clone(),
            },
            MemoryReceiver { rx: client_rx },
            ServerEnd { inbound: server_rx, outbound: server_tx, close_calls },
        )
    }

    #[async_trait]
    impl FrameSender for MemorySender {
        async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected);
            }
            self.tx.send(frame.to_vec()).map_err(|_| TransportError::Disconnected)
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FrameReceiver for MemoryReceiver {
        async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
            self.rx.recv().await.ok_or(TransportError::Disconnected)
        }
    }

    impl ServerEnd {
        /// Next raw frame written by the client.
        pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
            self.inbound.recv().await
        }

        /// Body of the next frame written by the client, e.g. `!join :general`.
        pub async fn next_body(&mut self) -> Option<String> {
            let frame = self.next_frame().await?;
            codec::decode(&frame).ok().map(|m| m.body)
        }

        pub fn send_raw(&self, frame: Vec<u8>) -> bool {
            self.outbound.send(frame).is_ok()
        }

        /// Replies as the server with a text body (`+join :general`, `db user {...}`).
        pub fn reply(&self, text: &str) -> bool {
            let now = chrono::Utc::now().timestamp();
            self.send_raw(codec::encode_user_message(text, "", SERVER_ID, now))
        }

        pub fn error(&self, src: &str, reason: &str) -> bool {
            let frame = serde_json::json!({
                "type": TYPE_ERROR,
                "time": chrono::Utc::now().timestamp(),
                "src": src,
                "dst": "",
                "msg": reason,
            });
            self.send_raw(frame.to_string().into_bytes())
        }

        /// Pushes a live chat message as if another user had sent it.
        pub fn deliver(&self, src: &str, dst: &str, body: &str) -> bool {
            let now = chrono::Utc::now().timestamp();
            self.send_raw(codec::encode_user_message(body, dst, src, now))
        }

        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_packet_round_trip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let writer = PacketWriter::new(client);
        let mut reader = PacketReader::new(server);

        writer.send(b"{\"type\":\"message\"}").await.unwrap();
        writer.send(b"").await.unwrap();
        writer.send("héllo".as_bytes()).await.unwrap();

        assert_eq!(reader.receive().await.unwrap(), b"{\"type\":\"message\"}".to_vec());
        assert_eq!(reader.receive().await.unwrap(), Vec::<u8>::new());
        assert_eq!(reader.receive().await.unwrap(), "héllo".as_bytes().to_vec());
    }

    #[test]
    fn test_packet_layout() {
        let packet = encode_packet(b"abc").unwrap();
        assert_eq!(packet, vec![0, 0, 0, 7, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn test_raw_packet_passes_through() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(server);
        client.write_all(&[0, 0, 0, 2, b'h', b'i']).await.unwrap();
        assert_eq!(reader.receive().await.unwrap(), b"hi".to_vec());
    }

    #[tokio::test]
    async fn test_oversized_length_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(server);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        assert!(matches!(reader.receive().await, Err(TransportError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_closed_peer_reports_disconnect() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = PacketReader::new(server);
        drop(client);
        assert_eq!(reader.receive().await, Err(TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_memory_pair() {
        let (sender, mut receiver, mut server) = memory::pair();
        sender.send(b"ping").await.unwrap();
        assert_eq!(server.next_frame().await.unwrap(), b"ping".to_vec());

        assert!(server.send_raw(b"pong".to_vec()));
        assert_eq!(receiver.receive().await.unwrap(), b"pong".to_vec());

        sender.close().await;
        assert_eq!(sender.send(b"late").await, Err(TransportError::Disconnected));
        assert_eq!(server.close_calls(), 1);

        drop(server);
        assert_eq!(receiver.receive().await, Err(TransportError::Disconnected));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let result = connect("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_, _))));
    }
}

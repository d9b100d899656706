//! TCP session with the hub.
//!
//! This module provides the `Session` which handles:
//! - Connecting to the hub over TCP
//! - Writing newline-delimited JSON packets in submission order
//! - Parsing incoming lines and forwarding them to the runtime loop
//!
//! A session covers exactly one connection. Reconnection policy lives in
//! the runtime, which builds a fresh `Session` after a disconnect.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free
//! guidelines. No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`,
//! or `todo!()`.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError};
use casthub_protocol::ServerPacket;

// ============================================================================
// Events
// ============================================================================

/// Events emitted by a live session.
#[derive(Debug)]
pub enum SessionEvent {
    /// A packet arrived from the hub.
    Packet(ServerPacket),

    /// The connection is gone; no more packets will follow.
    Disconnected { reason: String },
}

// ============================================================================
// Session
// ============================================================================

/// One live connection to the hub.
///
/// Outgoing packets are queued onto a single writer task, so two `send`
/// calls made in order reach the wire in that order. Incoming lines are
/// parsed on a reader task and forwarded as [`SessionEvent`]s; a line that
/// fails to parse is logged and skipped without dropping the connection.
pub struct Session {
    outgoing_tx: mpsc::UnboundedSender<ServerPacket>,
    cancel_token: CancellationToken,
}

impl Session {
    /// Connects to the hub and spawns the reader and writer tasks.
    ///
    /// # Arguments
    ///
    /// * `host` - Hub hostname or address
    /// * `port` - Hub TCP port
    /// * `event_tx` - Channel the reader forwards [`SessionEvent`]s to
    ///
    /// # Returns
    ///
    /// A connected `Session`, or [`RuntimeError::Connect`] if the hub is
    /// unreachable.
    pub async fn connect(
        host: &str,
        port: u16,
        event_tx: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| RuntimeError::Connect {
                addr: addr.clone(),
                source,
            })?;
        info!(addr = %addr, "Connected to hub");

        let (reader, writer) = stream.into_split();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        tokio::spawn(reader_task(reader, event_tx, cancel_token.clone()));
        tokio::spawn(writer_task(writer, outgoing_rx, cancel_token.clone()));

        Ok(Self {
            outgoing_tx,
            cancel_token,
        })
    }

    /// Queues a packet for the writer task.
    ///
    /// Packets are written in the order they are queued. Returns
    /// [`RuntimeError::SessionClosed`] once the connection is gone.
    pub fn send(&self, packet: ServerPacket) -> Result<()> {
        self.outgoing_tx
            .send(packet)
            .map_err(|_| RuntimeError::SessionClosed)
    }

    /// Returns true once the session has been closed or has dropped.
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled() || self.outgoing_tx.is_closed()
    }

    /// Tears down the reader and writer tasks.
    pub fn close(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

// ============================================================================
// Reader / Writer Tasks
// ============================================================================

/// Reads newline-delimited JSON from the hub until EOF, error, or cancel.
async fn reader_task(
    reader: tokio::net::tcp::OwnedReadHalf,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel_token: CancellationToken,
) {
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    let reason = loop {
        line.clear();
        tokio::select! {
            read_result = buf_reader.read_line(&mut line) => {
                match read_result {
                    Ok(0) => break "hub closed connection".to_string(),
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<ServerPacket>(trimmed) {
                            Ok(packet) => {
                                let _ = event_tx.send(SessionEvent::Packet(packet));
                            }
                            Err(e) => {
                                // Skip the bad line, keep the connection
                                warn!(error = %e, line = %trimmed, "Failed to parse packet");
                            }
                        }
                    }
                    Err(e) => break format!("read error: {e}"),
                }
            }
            _ = cancel_token.cancelled() => {
                debug!("Session reader cancelled");
                return;
            }
        }
    };

    debug!(reason = %reason, "Session reader finished");
    cancel_token.cancel();
    let _ = event_tx.send(SessionEvent::Disconnected { reason });
}

/// Drains the outgoing queue onto the socket, preserving queue order.
async fn writer_task(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    mut outgoing_rx: mpsc::UnboundedReceiver<ServerPacket>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            packet = outgoing_rx.recv() => {
                let Some(packet) = packet else {
                    debug!("Session writer channel closed");
                    return;
                };
                let json = match serde_json::to_string(&packet) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(error = %e, "Failed to serialize outgoing packet");
                        continue;
                    }
                };
                if let Err(e) = write_line(&mut writer, &json).await {
                    warn!(error = %e, "Failed to write packet, closing session");
                    cancel_token.cancel();
                    return;
                }
                debug!(packet_type = ?packet.kind, "Sent packet to hub");
            }
            _ = cancel_token.cancelled() => {
                debug!("Session writer cancelled");
                return;
            }
        }
    }
}

async fn write_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, json: &str) -> Result<()> {
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use casthub_protocol::PacketType;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        // Port 1 is almost certainly closed
        let result = Session::connect("127.0.0.1", 1, event_tx).await;
        assert!(matches!(result, Err(RuntimeError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_sends_preserve_order() {
        let (listener, port) = listener().await;
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let session = Session::connect("127.0.0.1", port, event_tx).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut reader = BufReader::new(stream);

        for i in 0..10 {
            session
                .send(ServerPacket::join_channel(&format!("ext-{i}"), "CHAN"))
                .unwrap();
        }

        for i in 0..10 {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            let packet: ServerPacket = serde_json::from_str(line.trim()).unwrap();
            assert_eq!(packet.kind, PacketType::JoinChannel);
            assert_eq!(packet.from, format!("ext-{i}"));
        }
    }

    #[tokio::test]
    async fn test_incoming_packets_forwarded() {
        let (listener, port) = listener().await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let _session = Session::connect("127.0.0.1", port, event_tx).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        let packet = ServerPacket::join_channel("someone", "CHAN");
        let json = serde_json::to_string(&packet).unwrap();
        stream.write_all(json.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();

        match event_rx.recv().await.unwrap() {
            SessionEvent::Packet(received) => {
                assert_eq!(received.kind, PacketType::JoinChannel);
                assert_eq!(received.from, "someone");
            }
            other => panic!("Expected Packet event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_disconnect() {
        let (listener, port) = listener().await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let _session = Session::connect("127.0.0.1", port, event_tx).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        stream.write_all(b"this is not json\n").await.unwrap();
        let packet = ServerPacket::join_channel("after", "CHAN");
        let json = serde_json::to_string(&packet).unwrap();
        stream.write_all(json.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();

        // The bad line is skipped; the next packet still arrives
        match event_rx.recv().await.unwrap() {
            SessionEvent::Packet(received) => assert_eq!(received.from, "after"),
            other => panic!("Expected Packet event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hub_close_emits_disconnected() {
        let (listener, port) = listener().await;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let session = Session::connect("127.0.0.1", port, event_tx).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        match event_rx.recv().await.unwrap() {
            SessionEvent::Disconnected { .. } => {}
            other => panic!("Expected Disconnected event, got {other:?}"),
        }

        // Further sends fail once the writer notices
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(session.is_closed());
    }
}

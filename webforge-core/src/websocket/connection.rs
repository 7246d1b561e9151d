//! WebSocket connection handles.
//!
//! A [`WsConnection`] is the sending half of an open connection. The
//! receive loop owns the socket; outgoing frames are queued on an
//! unbounded channel and written by a dedicated write task, so a slow
//! client never blocks the code that sends to it.
//!
//! Handles are cheaply cloneable and are what room membership lists
//! store.

use crate::error::{Error, Result};
use crate::websocket::frame::{EventFrame, EventKey};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Unique, monotonically increasing connection identifier.
pub type ConnectionId = u64;

/// The sending half of an open WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnection {
    id: ConnectionId,
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

impl WsConnection {
    pub(crate) fn new(
        id: ConnectionId,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self { id, addr, sender }
    }

    /// This connection's identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The client's socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Sends a fast (numbered) event to this connection.
    ///
    /// The frame is queued immediately; delivery happens on the
    /// connection's write task.
    pub fn send_fast(&self, id: u8, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_frame(&EventFrame::new(id, payload.into()))
    }

    /// Sends a named event to this connection.
    pub fn send_named(&self, name: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_frame(&EventFrame::new(name, payload.into()))
    }

    /// Sends an already-built event frame.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] when the connection's write task has
    /// shut down.
    pub fn send_frame(&self, frame: &EventFrame) -> Result<()> {
        self.send_bytes(frame.encode())
    }

    /// Sends a pre-framed event by key and payload.
    pub fn send_event(&self, key: impl Into<EventKey>, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.send_frame(&EventFrame::new(key, payload.into()))
    }

    fn send_bytes(&self, bytes: Vec<u8>) -> Result<()> {
        self.sender
            .send(bytes)
            .map_err(|_| Error::ConnectionClosed(self.id))
    }
}

impl PartialEq for WsConnection {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WsConnection {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn(id: u64) -> (WsConnection, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        (WsConnection::new(id, addr, tx), rx)
    }

    #[tokio::test]
    async fn test_send_fast_frames_correctly() {
        let (conn, mut rx) = test_conn(1);
        conn.send_fast(5, b"hi".to_vec()).unwrap();
        let bytes = rx.recv().await.unwrap();
        assert_eq!(bytes, vec![0x00, 0x05, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_send_named_frames_correctly() {
        let (conn, mut rx) = test_conn(2);
        conn.send_named("chat", b"hello".to_vec()).unwrap();
        let bytes = rx.recv().await.unwrap();
        assert_eq!(bytes, b"chat\0hello");
    }

    #[test]
    fn test_send_on_closed_connection_errors() {
        let (conn, rx) = test_conn(3);
        drop(rx);
        let err = conn.send_fast(0, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed(3)));
    }

    #[test]
    fn test_equality_is_by_id() {
        let (a, _rx_a) = test_conn(7);
        let (b, _rx_b) = test_conn(7);
        let (c, _rx_c) = test_conn(8);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

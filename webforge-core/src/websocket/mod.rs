//! The WebSocket event layer.
//!
//! Connections upgraded from the HTTP listener enter a per-connection
//! receive loop that parses binary [event frames](frame) and dispatches
//! them to registered callbacks. Two independent namespaces exist:
//!
//! - **Fast events**: a 256-slot table indexed by a single byte, for
//!   hot-path messages that should not pay for name matching.
//! - **Named events**: a map from NUL-terminated string names to
//!   callbacks.
//!
//! Callbacks receive a [`WsContext`] scoped to the connection the frame
//! arrived on, through which they can reply, create and join
//! [rooms](room), and broadcast to room members.
//!
//! Frames from one connection are processed strictly in arrival order;
//! frames from different connections are independent. A frame that fails
//! to parse, or that names an unregistered event, is logged and dropped —
//! the connection stays open.
//!
//! # Examples
//!
//! ```no_run
//! use webforge_core::prelude::*;
//!
//! async fn on_chat(ctx: WsContext, payload: Vec<u8>) -> Result<()> {
//!     println!("chat: {}", String::from_utf8_lossy(&payload));
//!     ctx.send_fast(0, b"ack".to_vec())
//! }
//!
//! # fn example() {
//! let ws = WebSockets::new()
//!     .named_event("chat", event(on_chat))
//!     .fast_event(0, event(|ctx: WsContext, _payload| async move {
//!         ctx.send_named("pong", Vec::new())
//!     }));
//!
//! let server = Server::new().websockets(ws);
//! # }
//! ```

pub mod connection;
pub mod frame;
pub mod room;

pub use connection::{ConnectionId, WsConnection};
pub use frame::{EventFrame, EventKey, MAX_NAME_LEN};
pub use room::{Room, RoomRegistry};

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, error, info, warn};

/// A callback registered for a fast or named event.
///
/// Use [`event`] to build one from an async function.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one event occurrence.
    async fn call(&self, ctx: WsContext, payload: Vec<u8>) -> Result<()>;
}

struct EventFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for EventFn<F>
where
    F: Fn(WsContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: WsContext, payload: Vec<u8>) -> Result<()> {
        (self.f)(ctx, payload).await
    }
}

/// Wraps an async function into an [`EventHandler`] for registration.
pub fn event<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(WsContext, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(EventFn { f })
}

/// Builder for the WebSocket subsystem.
///
/// Register callbacks here, then hand the builder to
/// [`Server::websockets`](crate::server::Server::websockets). The
/// registries are frozen once the server starts listening.
pub struct WebSockets {
    subprotocol: Option<String>,
    fast: [Option<Arc<dyn EventHandler>>; 256],
    named: HashMap<String, Arc<dyn EventHandler>>,
}

impl WebSockets {
    /// Creates an empty subsystem with no registered events.
    pub fn new() -> Self {
        Self {
            subprotocol: None,
            fast: std::array::from_fn(|_| None),
            named: HashMap::new(),
        }
    }

    /// Offers `subprotocol` during the upgrade handshake.
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    /// Registers a callback for fast event `id`.
    ///
    /// Registering an occupied slot overwrites it with a warning; the
    /// last registration wins.
    pub fn fast_event(mut self, id: u8, handler: Arc<dyn EventHandler>) -> Self {
        if self.fast[id as usize].replace(handler).is_some() {
            warn!("fast event {id} registered twice; keeping the later callback");
        }
        self
    }

    /// Registers a callback for the named event `name`.
    ///
    /// Registering an occupied name overwrites it with a warning; the
    /// last registration wins.
    pub fn named_event(mut self, name: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let name = name.into();
        if self.named.insert(name.clone(), handler).is_some() {
            warn!("named event `{name}` registered twice; keeping the later callback");
        }
        self
    }

    pub(crate) fn into_state(self) -> Arc<WsState> {
        Arc::new(WsState {
            subprotocol: self.subprotocol,
            fast: self.fast,
            named: self.named,
            rooms: RoomRegistry::new(),
            connections: DashMap::new(),
            next_id: AtomicU64::new(0),
        })
    }
}

impl Default for WebSockets {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime state of the subsystem, shared by every connection task.
pub(crate) struct WsState {
    subprotocol: Option<String>,
    fast: [Option<Arc<dyn EventHandler>>; 256],
    named: HashMap<String, Arc<dyn EventHandler>>,
    rooms: RoomRegistry,
    connections: DashMap<ConnectionId, WsConnection>,
    next_id: AtomicU64,
}

/// Connection-scoped context passed to every event callback.
///
/// Identifies the connection the current frame arrived on, so replies go
/// to the right client without any ambient state.
#[derive(Clone)]
pub struct WsContext {
    conn: WsConnection,
    state: Arc<WsState>,
}

impl WsContext {
    /// The connection whose frame is being handled.
    pub fn connection(&self) -> &WsConnection {
        &self.conn
    }

    /// The room registry, for creating and looking up rooms.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.state.rooms
    }

    /// Number of currently open connections.
    pub fn connection_count(&self) -> usize {
        self.state.connections.len()
    }

    /// Sends a fast event back to the calling connection.
    pub fn send_fast(&self, id: u8, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.conn.send_fast(id, payload)
    }

    /// Sends a named event back to the calling connection.
    pub fn send_named(&self, name: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
        self.conn.send_named(name, payload)
    }

    /// Sends the same event to every member of the given rooms,
    /// completing every send before returning.
    ///
    /// Sends to connections that have gone away are logged and skipped.
    /// Returns the number of connections the event was delivered to.
    pub fn broadcast_sync(
        &self,
        key: impl Into<EventKey>,
        payload: &[u8],
        rooms: &[&Room],
    ) -> usize {
        broadcast(&EventFrame::new(key, payload.to_vec()), rooms)
    }

    /// Sends the same event to every member of the given rooms as a
    /// detached task, returning immediately.
    pub fn broadcast_async(&self, key: impl Into<EventKey>, payload: &[u8], rooms: &[&Room]) {
        let frame = EventFrame::new(key, payload.to_vec());
        let rooms: Vec<Arc<Room>> = rooms
            .iter()
            .filter_map(|r| self.state.rooms.get(r.id()))
            .collect();
        tokio::spawn(async move {
            let refs: Vec<&Room> = rooms.iter().map(Arc::as_ref).collect();
            broadcast(&frame, &refs);
        });
    }
}

fn broadcast(frame: &EventFrame, rooms: &[&Room]) -> usize {
    let mut delivered = 0;
    for room in rooms {
        for conn in room.members() {
            match conn.send_frame(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("broadcast to connection {} failed: {e}", conn.id()),
            }
        }
    }
    debug!("broadcast {} delivered to {delivered} connections", frame.key);
    delivered
}

/// Runs one upgraded connection to completion.
///
/// Performs the handshake, spawns the write task, then processes inbound
/// frames in arrival order until a close frame or transport error. On
/// exit the connection is removed from every room and from the registry.
pub(crate) async fn handle_upgrade(
    state: Arc<WsState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let ws_stream = if let Some(proto) = state.subprotocol.clone() {
        tokio_tungstenite::accept_hdr_async(stream, move |_req: &Request, mut resp: Response| {
            match proto.parse() {
                Ok(value) => {
                    resp.headers_mut().append("Sec-WebSocket-Protocol", value);
                }
                Err(_) => warn!("subprotocol `{proto}` is not a valid header value"),
            }
            Ok(resp)
        })
        .await?
    } else {
        tokio_tungstenite::accept_async(stream).await?
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    let conn = WsConnection::new(id, peer, tx);
    state.connections.insert(id, conn.clone());
    info!("WebSocket connection {id} open from {peer}");

    let write_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Binary(bytes)).await {
                warn!("write to connection {id} failed: {e}");
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                info!("close frame from connection {id}");
                break;
            }
            Ok(Message::Binary(data)) => dispatch_frame(&state, &conn, &data).await,
            Ok(Message::Text(_)) => {
                debug!("ignoring text frame on connection {id}; the event protocol is binary");
            }
            Ok(_) => {} // ping/pong handled by the transport
            Err(e) => {
                warn!("WebSocket error on connection {id}: {e}");
                break;
            }
        }
    }

    state.connections.remove(&id);
    state.rooms.remove_everywhere(id);
    write_task.abort();
    info!("WebSocket connection {id} closed");
    Ok(())
}

/// Parses one inbound message and runs the matching callback.
///
/// Every failure here is contained: bad frames and unknown events are
/// logged and dropped, callback errors are logged. The receive loop
/// continues regardless.
async fn dispatch_frame(state: &Arc<WsState>, conn: &WsConnection, raw: &[u8]) {
    let frame = match EventFrame::parse(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("dropping message from connection {}: {e}", conn.id());
            return;
        }
    };

    let handler = match &frame.key {
        EventKey::Fast(id) => state.fast[*id as usize].clone(),
        EventKey::Named(name) => state.named.get(name).cloned(),
    };
    let Some(handler) = handler else {
        error!("no callback registered for event {}", frame.key);
        return;
    };

    let ctx = WsContext {
        conn: conn.clone(),
        state: state.clone(),
    };
    if let Err(e) = handler.call(ctx, frame.payload).await {
        error!("event {} callback failed: {e}", frame.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_conn(
        state: &Arc<WsState>,
        id: u64,
    ) -> (WsConnection, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let conn = WsConnection::new(id, addr, tx);
        state.connections.insert(id, conn.clone());
        (conn, rx)
    }

    fn recorder() -> (Arc<Mutex<Vec<Vec<u8>>>>, Arc<dyn EventHandler>) {
        let seen: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = event(move |_ctx: WsContext, payload: Vec<u8>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(payload);
                Ok(())
            }
        });
        (seen, handler)
    }

    #[tokio::test]
    async fn test_fast_frame_dispatches_with_payload() {
        let (seen, handler) = recorder();
        let state = WebSockets::new().fast_event(5, handler).into_state();
        let (conn, _rx) = test_conn(&state, 0);

        dispatch_frame(&state, &conn, &[0x00, 0x05, b'h', b'i']).await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"hi".to_vec()]);
    }

    #[tokio::test]
    async fn test_named_frame_dispatches_with_payload() {
        let (seen, handler) = recorder();
        let state = WebSockets::new().named_event("chat", handler).into_state();
        let (conn, _rx) = test_conn(&state, 0);

        dispatch_frame(&state, &conn, b"chat\0hello").await;
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn test_unregistered_event_is_dropped_quietly() {
        let state = WebSockets::new().into_state();
        let (conn, _rx) = test_conn(&state, 0);

        dispatch_frame(&state, &conn, &[0x00, 0x07]).await;
        dispatch_frame(&state, &conn, b"nobody\0home").await;
        // Nothing to assert beyond not panicking; the loop must survive.
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_quietly() {
        let (seen, handler) = recorder();
        let state = WebSockets::new().named_event("x", handler).into_state();
        let (conn, _rx) = test_conn(&state, 0);

        dispatch_frame(&state, &conn, b"unterminated-name").await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();
        let state = WebSockets::new()
            .fast_event(1, first)
            .fast_event(1, second)
            .into_state();
        let (conn, _rx) = test_conn(&state, 0);

        dispatch_frame(&state, &conn, &[0x00, 0x01, b'x']).await;
        assert!(first_seen.lock().unwrap().is_empty());
        assert_eq!(second_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_callback_can_reply_to_its_connection() {
        let handler = event(|ctx: WsContext, _payload: Vec<u8>| async move {
            ctx.send_fast(0, b"Hello!".to_vec())
        });
        let state = WebSockets::new().fast_event(0, handler).into_state();
        let (conn, mut rx) = test_conn(&state, 3);

        dispatch_frame(&state, &conn, &[0x00, 0x00, b'p']).await;
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply, vec![0x00, 0x00, b'H', b'e', b'l', b'l', b'o', b'!']);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_room_members() {
        let state = WebSockets::new().into_state();
        let room = state.rooms.create();
        let (a, mut rx_a) = test_conn(&state, 1);
        let (b, mut rx_b) = test_conn(&state, 2);
        let (c, mut rx_c) = test_conn(&state, 3);
        room.join(&a);
        room.join(&b);
        room.join(&c);

        let ctx = WsContext {
            conn: a.clone(),
            state: state.clone(),
        };
        let delivered = ctx.broadcast_sync("tick", b"42", &[&room]);
        assert_eq!(delivered, 3);
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(rx.recv().await.unwrap(), b"tick\x0042".to_vec());
        }
    }

    #[tokio::test]
    async fn test_leave_excludes_from_later_broadcasts() {
        let state = WebSockets::new().into_state();
        let room = state.rooms.create();
        let (a, mut rx_a) = test_conn(&state, 1);
        let (b, mut rx_b) = test_conn(&state, 2);
        room.join(&a);
        room.join(&b);
        room.leave(&b);

        let ctx = WsContext {
            conn: a.clone(),
            state: state.clone(),
        };
        let delivered = ctx.broadcast_sync(9u8, b"go", &[&room]);
        assert_eq!(delivered, 1);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_async_delivers_eventually() {
        let state = WebSockets::new().into_state();
        let room = state.rooms.create();
        let (a, mut rx_a) = test_conn(&state, 1);
        room.join(&a);

        let ctx = WsContext {
            conn: a.clone(),
            state: state.clone(),
        };
        ctx.broadcast_async("later", b"x", &[&room]);
        let bytes = rx_a.recv().await.unwrap();
        assert_eq!(bytes, b"later\0x".to_vec());
    }
}

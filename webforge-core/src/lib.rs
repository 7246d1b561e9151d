//! # WebForge Core - Hybrid HTTP/WebSocket Micro-Framework
//!
//! `webforge-core` is the foundational library for the WebForge
//! framework: HTTP routing with user actions, byte-level `{{var}}` HTML
//! templating, static-file serving through a bounded file cache, and an
//! optional binary event layer over WebSocket — all on a single port.
//!
//! ## Overview
//!
//! A WebForge application registers routes on a [`Server`], each mapping
//! a `(path, method)` pair to a page file, an action, or both. Actions
//! receive a per-request [`Context`] and choose exactly one outcome:
//! render a page (optionally with template data), redirect to another
//! route, send raw bytes, or answer with an HTTP error. Requests whose
//! path carries a file extension bypass routing and are served as static
//! assets.
//!
//! Page and asset bytes flow through a count-bounded, mtime-validated
//! [`FileCache`], so repeated requests for the same file rarely touch
//! the disk while edits still show up immediately.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  TCP Listener   │
//! └────────┬────────┘
//!          │
//!          ├──→ HTTP Request ──→ Route Dispatch ──→ Action ──→ Outcome
//!          │          │                                │
//!          │          └──→ Static Asset                ├──→ FileCache
//!          │                     │                     └──→ TemplateEngine
//!          │                     └──→ FileCache
//!          │
//!          └──→ WebSocket Upgrade ──→ Receive Loop ──→ Event Callbacks
//!                                          │
//!                                          └──→ Rooms & Broadcast
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use webforge_core::prelude::*;
//!
//! async fn welcome(ctx: Context) -> Result<()> {
//!     ctx.render(ctx.redirect_data())
//! }
//!
//! async fn submit(ctx: Context) -> Result<()> {
//!     let name = ctx.form_field("name").unwrap_or_default().to_string();
//!     ctx.set_redirect_data(TemplateData::new().set("name", name));
//!     ctx.redirect("/")
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     Server::with_config(ServerConfig::from_file("server.conf"))
//!         .route("/", Method::GET, "index.html", action(welcome))
//!         .route_action("/name", Method::POST, action(submit))
//!         .start()
//!         .await
//! }
//! ```
//!
//! ## WebSocket Events
//!
//! The event layer multiplexes application events over binary WebSocket
//! messages: fast events are addressed by a single byte, named events by
//! a NUL-terminated string. Callbacks get a [`WsContext`] scoped to the
//! connection the event arrived on and can group connections into
//! [`Room`]s for broadcasting.
//!
//! ```no_run
//! use webforge_core::prelude::*;
//!
//! async fn echo(ctx: WsContext, payload: Vec<u8>) -> Result<()> {
//!     ctx.send_fast(0, payload)
//! }
//!
//! # fn example() {
//! let ws = WebSockets::new().fast_event(0, event(echo));
//! let server = Server::new().websockets(ws);
//! # }
//! ```
//!
//! ## Module Structure
//!
//! - [`server`]: the builder, accept loop and request pipeline
//! - [`routes`]: route table, actions and outcome dispatch
//! - [`context`]: per-request state and the outcome contract
//! - [`cache`]: bounded, mtime-validated file cache
//! - [`template`]: `{{var}}` substitution engine
//! - [`websocket`]: event framing, connections, rooms, broadcast
//! - [`config`]: `key=value` configuration loading
//! - [`error`]: error types and result handling

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod routes;
pub mod server;
pub mod template;
pub mod websocket;

pub use cache::FileCache;
pub use config::ServerConfig;
pub use context::{Context, Outcome};
pub use error::{Error, Result};
pub use routes::{Action, Resolved, Route, RouteTable, action};
pub use server::Server;
pub use template::{TemplateData, TemplateEngine, TemplateValue};
pub use websocket::{
    EventFrame, EventHandler, EventKey, Room, RoomRegistry, WebSockets, WsConnection, WsContext,
    event,
};

// Route keys and registration use the `http` crate's method type.
pub use http::Method;

/// Commonly used types and traits for WebForge applications.
///
/// Importing this module brings the whole application-facing surface
/// into scope with one `use`:
///
/// ```
/// use webforge_core::prelude::*;
///
/// async fn ping(ctx: Context) -> Result<()> {
///     ctx.send_raw("pong")
/// }
///
/// # fn example() {
/// let server = Server::new().route_action("/ping", Method::GET, action(ping));
/// # }
/// ```
pub mod prelude {
    pub use crate::cache::FileCache;
    pub use crate::config::ServerConfig;
    pub use crate::context::{Context, Outcome};
    pub use crate::error::{Error, Result};
    pub use crate::routes::{Action, Resolved, RouteTable, action};
    pub use crate::server::Server;
    pub use crate::template::{TemplateData, TemplateValue};
    pub use crate::websocket::{
        EventFrame, EventHandler, EventKey, Room, RoomRegistry, WebSockets, WsConnection,
        WsContext, event,
    };
    pub use http::Method;
}

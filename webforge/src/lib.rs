//! # WebForge - Hybrid HTTP/WebSocket Micro-Framework for Rust
//!
//! WebForge lets you stand up a multithreaded web server that serves
//! HTML pages and static files, runs per-route actions, substitutes
//! `{{var}}` template variables, and — on the same port — dispatches
//! binary WebSocket events to registered callbacks, with rooms for
//! broadcasting.
//!
//! This crate is a thin facade over [`webforge_core`], re-exporting its
//! whole API. Depend on `webforge` in applications; depend on
//! `webforge-core` directly only if you are building on the internals.
//!
//! ## Quick Start
//!
//! ```no_run
//! use webforge::prelude::*;
//!
//! async fn welcome(ctx: Context) -> Result<()> {
//!     ctx.render(TemplateData::new().set("greeting", "hello"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     Server::new()
//!         .route("/", Method::GET, "index.html", action(welcome))
//!         .listen("127.0.0.1:5000")
//!         .await
//! }
//! ```
//!
//! ## Feature Tour
//!
//! - **Routing**: `(path, method)` pairs map to page files and async
//!   actions; actions choose exactly one outcome (render, redirect,
//!   raw bytes, HTTP error) per request.
//! - **Templating**: flat `{{identifier}}` substitution over page bytes,
//!   fail-open on malformed templates.
//! - **File cache**: count-bounded LRU with mtime validation, shared by
//!   pages and static assets.
//! - **WebSocket events**: numbered and named events over a compact
//!   binary framing, with rooms and sync/async broadcast.
//!
//! See the [`webforge_core`] documentation for the full reference.

pub use webforge_core::*;

/// Commonly used types and traits, re-exported from
/// [`webforge_core::prelude`].
pub mod prelude {
    pub use webforge_core::prelude::*;
}

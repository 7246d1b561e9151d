//! The server builder, accept loop and request pipeline.
//!
//! [`Server`] is the application object: routes, static-directory
//! mappings and the optional WebSocket subsystem are registered on it at
//! startup, after which [`Server::listen`] takes over the task of
//! accepting connections. There is no global state — everything a
//! request needs travels through the shared server state and the
//! request's own [`Context`].
//!
//! # Request pipeline
//!
//! Each accepted connection is handled in its own task:
//!
//! 1. Reject early when the source address is over its concurrent
//!    connection limit.
//! 2. Peek the stream; an `Upgrade: websocket` request is handed to the
//!    WebSocket subsystem, everything else is parsed as a plain HTTP
//!    request.
//! 3. URIs over the configured character limit answer 414.
//! 4. Paths without a file extension are routes: dispatch runs the
//!    registered action and the outcome resolves to a page render, raw
//!    bytes or an error code. Pages are fetched through the
//!    [`FileCache`] and substituted by the [`TemplateEngine`] when
//!    templating is enabled.
//! 5. Paths with an extension are static assets, served from the
//!    extension's directory (default: the static directory) through the
//!    same cache, with percent-decoding and a path-traversal guard.
//! 6. Any failure becomes a canned error page; a request can never take
//!    down the accept loop.
//!
//! # Examples
//!
//! ```no_run
//! use webforge_core::prelude::*;
//!
//! async fn welcome(ctx: Context) -> Result<()> {
//!     ctx.render(TemplateData::new().set("user", "alice"))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     Server::new()
//!         .route("/", Method::GET, "index.html", action(welcome))
//!         .route_page("/about", Method::GET, "about.html")
//!         .extension_dir("js", &["js"])
//!         .listen("0.0.0.0:5000")
//!         .await
//! }
//! ```

use crate::cache::FileCache;
use crate::config::ServerConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::routes::{Action, Resolved, RouteTable};
use crate::template::{TemplateData, TemplateEngine};
use crate::websocket::{self, WebSockets, WsState};
use bytes::Bytes;
use dashmap::DashMap;
use http::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The application server: route table, static mappings, WebSocket
/// subsystem and configuration, built once and then run.
///
/// Builder-style; every method returns `self`. Construction happens
/// before [`listen`](Server::listen), after which the registries are
/// read-only.
pub struct Server {
    config: ServerConfig,
    routes: RouteTable,
    extension_dirs: HashMap<String, String>,
    websockets: Option<WebSockets>,
}

impl Server {
    /// Creates a server with default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a server with the given configuration.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            routes: RouteTable::new(),
            extension_dirs: HashMap::new(),
            websockets: None,
        }
    }

    /// Registers a route with a page file and an action.
    pub fn route(
        mut self,
        path: impl Into<String>,
        method: Method,
        file: impl Into<String>,
        action: Arc<dyn Action>,
    ) -> Self {
        self.routes
            .add(path, method, Some(file.into()), Some(action));
        self
    }

    /// Registers a route that serves a page file with no action.
    pub fn route_page(
        mut self,
        path: impl Into<String>,
        method: Method,
        file: impl Into<String>,
    ) -> Self {
        self.routes.add(path, method, Some(file.into()), None);
        self
    }

    /// Registers a route with an action and no page file. The action
    /// must choose an outcome on every invocation.
    pub fn route_action(
        mut self,
        path: impl Into<String>,
        method: Method,
        action: Arc<dyn Action>,
    ) -> Self {
        self.routes.add(path, method, None, Some(action));
        self
    }

    /// Serves the given file extensions from `dir` instead of the
    /// default static directory.
    ///
    /// Extensions may be given with or without their leading dot.
    ///
    /// # Examples
    ///
    /// ```
    /// use webforge_core::server::Server;
    ///
    /// let server = Server::new().extension_dir("scripts", &["js", ".mjs"]);
    /// ```
    pub fn extension_dir(mut self, dir: impl Into<String>, extensions: &[&str]) -> Self {
        let dir = dir.into();
        for ext in extensions {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            self.extension_dirs.insert(format!(".{ext}"), dir.clone());
        }
        self
    }

    /// Enables the WebSocket subsystem with the given event
    /// registrations.
    pub fn websockets(mut self, ws: WebSockets) -> Self {
        self.websockets = Some(ws);
        self
    }

    /// The server's configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds `0.0.0.0` on the configured port and serves forever.
    pub async fn start(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        self.listen(addr).await
    }

    /// Binds `addr` and serves forever.
    ///
    /// Each accepted connection runs in its own task; a failing request
    /// is logged and answered with an error page without disturbing the
    /// accept loop.
    pub async fn listen(self, addr: impl AsRef<str>) -> Result<()> {
        let addr: SocketAddr = addr
            .as_ref()
            .parse()
            .map_err(|e| Error::custom(format!("invalid address: {e}")))?;

        let state = Arc::new(ServerState {
            cache: FileCache::new(self.config.cache_file_limit),
            engine: TemplateEngine::new(self.config.max_template_size),
            pages: ErrorPages::load(&self.config.error_dir),
            websockets: self.websockets.map(WebSockets::into_state),
            per_ip: DashMap::new(),
            extension_dirs: self.extension_dirs,
            routes: self.routes,
            config: self.config,
        });

        let listener = TcpListener::bind(addr).await?;
        info!("server listening on {addr}");

        loop {
            let (stream, peer) = listener.accept().await?;
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(state, stream, peer).await {
                    error!("connection from {peer} failed: {e}");
                }
            });
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

struct ServerState {
    cache: FileCache,
    engine: TemplateEngine,
    pages: ErrorPages,
    websockets: Option<Arc<WsState>>,
    per_ip: DashMap<IpAddr, usize>,
    extension_dirs: HashMap<String, String>,
    routes: RouteTable,
    config: ServerConfig,
}

/// Canned bodies for error responses, loaded from the error-page
/// directory at startup with built-in fallbacks.
struct ErrorPages {
    pages: HashMap<u16, Bytes>,
}

impl ErrorPages {
    fn load(dir: &str) -> Self {
        let mut pages = HashMap::new();
        for code in [400u16, 404, 414, 500] {
            let path = Path::new(dir).join(format!("{code}.html"));
            match std::fs::read(&path) {
                Ok(bytes) => {
                    pages.insert(code, Bytes::from(bytes));
                }
                Err(_) => debug!("no custom page for {code}, using the built-in one"),
            }
        }
        Self { pages }
    }

    fn get(&self, code: u16) -> Bytes {
        self.pages
            .get(&code)
            .cloned()
            .unwrap_or_else(|| fallback_page(code))
    }
}

fn fallback_page(code: u16) -> Bytes {
    let reason = StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error");
    Bytes::from(format!("<HTML><BODY>Error code {code}: {reason}.</BODY></HTML>"))
}

/// Decrements the source address's connection count when the request
/// finishes, however it finishes.
struct IpGuard {
    state: Arc<ServerState>,
    ip: IpAddr,
}

impl IpGuard {
    fn try_acquire(state: &Arc<ServerState>, ip: IpAddr) -> Option<Self> {
        let limit = state.config.max_connections_per_ip;
        let mut entry = state.per_ip.entry(ip).or_insert(0);
        if *entry >= limit {
            return None;
        }
        *entry += 1;
        drop(entry);
        Some(Self {
            state: state.clone(),
            ip,
        })
    }
}

impl Drop for IpGuard {
    fn drop(&mut self) {
        let emptied = if let Some(mut entry) = self.state.per_ip.get_mut(&self.ip) {
            *entry = entry.saturating_sub(1);
            *entry == 0
        } else {
            false
        };
        if emptied {
            self.state.per_ip.remove_if(&self.ip, |_, count| *count == 0);
        }
    }
}

async fn handle_connection(
    state: Arc<ServerState>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    let _guard = if state.config.max_connections_per_ip > 0 {
        match IpGuard::try_acquire(&state, peer.ip()) {
            Some(guard) => Some(guard),
            None => {
                if state.config.show_messages {
                    info!("refusing {peer}: per-address connection limit reached");
                }
                let body = state.pages.get(429);
                return write_response(&mut stream, 429, "text/html", &body).await;
            }
        }
    } else {
        None
    };

    let mut peek_buf = [0u8; 2048];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.peek(&mut peek_buf))
        .await
        .map_err(|_| Error::custom("timed out waiting for request"))??;

    let head = String::from_utf8_lossy(&peek_buf[..n]).to_ascii_lowercase();
    if head.contains("upgrade: websocket") {
        match &state.websockets {
            Some(ws) => websocket::handle_upgrade(ws.clone(), stream, peer).await,
            None => {
                warn!("websocket upgrade from {peer} but websockets are not enabled");
                let body = state.pages.get(500);
                write_response(&mut stream, 500, "text/html", &body).await
            }
        }
    } else {
        handle_http(state, stream, peer).await
    }
}

async fn handle_http(state: Arc<ServerState>, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!("malformed request from {peer}: {e}");
            let body = state.pages.get(400);
            return write_response(&mut stream, 400, "text/html", &body).await;
        }
    };

    if state.config.show_messages {
        info!("{} {} from {peer}", request.method, request.target);
    }

    let (status, content_type, body) = respond(&state, request).await;
    write_response(&mut stream, status, &content_type, &body).await
}

struct RawRequest {
    method: Method,
    /// The request target as sent, including any query string.
    target: String,
    path: String,
    query: String,
    body: Vec<u8>,
}

async fn read_request<S>(stream: &mut S) -> Result<RawRequest>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(2048);
    let mut chunk = [0u8; 2048];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::custom("connection closed before request was complete"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(Error::custom("request head too large"));
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| Error::custom("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::custom("missing method"))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::custom("unrecognized method"))?;
    let target = parts
        .next()
        .ok_or_else(|| Error::custom("missing request target"))?
        .to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(Error::custom("request body too large"));
    }

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (target.clone(), String::new()),
    };

    Ok(RawRequest {
        method,
        target,
        path,
        query,
        body,
    })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Runs the routing/static pipeline for one parsed request. Infallible:
/// every failure maps to an error page.
async fn respond(state: &Arc<ServerState>, request: RawRequest) -> (u16, String, Bytes) {
    if request.target.len() > state.config.uri_char_limit {
        if state.config.show_messages {
            info!("414 - URI too long ({} chars)", request.target.len());
        }
        return (414, "text/html".into(), state.pages.get(414));
    }

    match detect_extension(&request.path) {
        None => respond_route(state, request).await,
        Some(ext) => respond_static(state, &request.path, &ext).await,
    }
}

async fn respond_route(state: &Arc<ServerState>, request: RawRequest) -> (u16, String, Bytes) {
    let ctx = Context::new(
        request.method.clone(),
        request.path.clone(),
        &request.query,
        request.body,
    );
    match state
        .routes
        .dispatch(&request.path, request.method, &ctx, &state.config)
        .await
    {
        Resolved::Raw(bytes) => (200, "*/*".into(), Bytes::from(bytes)),
        Resolved::Error(code) => (code, "text/html".into(), state.pages.get(code)),
        Resolved::Page { file, data } => render_page(state, &file, data).await,
    }
}

async fn render_page(
    state: &Arc<ServerState>,
    file: &str,
    data: Option<TemplateData>,
) -> (u16, String, Bytes) {
    let path = Path::new(&state.config.html_dir).join(file);
    match state.cache.get(&path).await {
        Ok(bytes) => {
            let bytes = match data {
                Some(data) if state.config.templating => {
                    Bytes::from(state.engine.substitute(&bytes, &data))
                }
                Some(_) => {
                    warn!(
                        "template data passed for `{file}` but templating is disabled; \
                         set templating=true to enable substitution"
                    );
                    bytes
                }
                None => bytes,
            };
            (200, content_type_for(file), bytes)
        }
        Err(Error::FileNotFound(path)) => {
            warn!("page file {} not found", path.display());
            (404, "text/html".into(), state.pages.get(404))
        }
        Err(e) => {
            log_failure(&state.config, "reading page file failed", &e);
            (500, "text/html".into(), state.pages.get(500))
        }
    }
}

async fn respond_static(state: &Arc<ServerState>, path: &str, ext: &str) -> (u16, String, Bytes) {
    let dir = state
        .extension_dirs
        .get(ext)
        .unwrap_or(&state.config.static_dir);

    let relative = path.trim_start_matches('/');
    let decoded = match percent_decode_str(relative).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => {
            warn!("badly encoded path: {path}");
            return (400, "text/html".into(), state.pages.get(400));
        }
    };

    // Resolve both ends and require the file to stay under its
    // directory; a missing file and an escape attempt both answer 404.
    let Ok(root) = tokio::fs::canonicalize(dir).await else {
        warn!("static directory `{dir}` does not exist");
        return (404, "text/html".into(), state.pages.get(404));
    };
    let full = Path::new(dir).join(&decoded);
    let Ok(canonical) = tokio::fs::canonicalize(&full).await else {
        if state.config.show_messages {
            info!("'{}' not found", full.display());
        }
        return (404, "text/html".into(), state.pages.get(404));
    };
    if !canonical.starts_with(&root) {
        warn!("path traversal attempt: {path}");
        return (404, "text/html".into(), state.pages.get(404));
    }

    match state.cache.get(&canonical).await {
        Ok(bytes) => (200, content_type_for(path), bytes),
        Err(Error::FileNotFound(_)) => (404, "text/html".into(), state.pages.get(404)),
        Err(e) => {
            log_failure(&state.config, "reading static file failed", &e);
            (500, "text/html".into(), state.pages.get(500))
        }
    }
}

async fn write_response<S>(stream: &mut S, status: u16, content_type: &str, body: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Extracts the file extension that routes a request to the static
/// pipeline, lowercased and including its dot. `None` means the path is
/// a route.
fn detect_extension(path: &str) -> Option<String> {
    let dot = path.rfind('.')?;
    let ext = &path[dot..];
    if ext.contains('/') {
        // A dot inside a directory name is not an extension.
        return None;
    }
    if ext.len() == 1 {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Content type from the fixed extension table; unknown extensions get
/// the wildcard type.
fn content_type_for(path: &str) -> String {
    match detect_extension(path) {
        Some(ext) => mime_guess::from_ext(ext.trim_start_matches('.'))
            .first_raw()
            .unwrap_or("*/*")
            .to_string(),
        None => "*/*".to_string(),
    }
}

fn log_failure(config: &ServerConfig, what: &str, e: &Error) {
    if config.show_exceptions {
        error!("{what}: {e}");
    } else {
        error!("{what}");
    }
}

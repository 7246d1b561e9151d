//! Route registration and dispatch.
//!
//! A route maps a `(path, method)` pair to an optional page file and an
//! optional [`Action`]. Dispatch runs the action, interprets the outcome
//! it chose through its [`Context`], and resolves to one of three
//! terminal results: a page to render, raw bytes, or an HTTP error code.
//! Redirect outcomes loop back into dispatch, so a chain `A → B → C`
//! resolves exactly like a direct request for `C`.
//!
//! The table is populated while the server is being built and is
//! read-only once it starts listening, so lookups need no
//! synchronization.
//!
//! # Examples
//!
//! ```
//! use webforge_core::prelude::*;
//!
//! async fn welcome(ctx: Context) -> Result<()> {
//!     ctx.render(TemplateData::new().set("user", "alice"))
//! }
//!
//! let mut routes = RouteTable::new();
//! routes.add("/", Method::GET, Some("index.html".into()), Some(action(welcome)));
//! routes.add("/about", Method::GET, Some("about.html".into()), None);
//! ```

use crate::config::ServerConfig;
use crate::context::{Context, Outcome};
use crate::error::Result;
use crate::template::TemplateData;
use async_trait::async_trait;
use http::Method;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Longest redirect chain dispatch will follow before giving up with a
/// 500. A chain this deep is a registration bug, not a use case.
const MAX_REDIRECT_DEPTH: usize = 32;

/// User-supplied logic run when a route is dispatched.
///
/// An action receives the request [`Context`] and must choose exactly one
/// outcome through it (or none, to fall back to the route's registered
/// page file). Use [`action`] to build one from an async function.
#[async_trait]
pub trait Action: Send + Sync {
    /// Runs the action for one request.
    async fn call(&self, ctx: &Context) -> Result<()>;
}

struct ActionFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Action for ActionFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: &Context) -> Result<()> {
        (self.f)(ctx.clone()).await
    }
}

/// Wraps an async function into an [`Action`] for route registration.
///
/// # Examples
///
/// ```
/// use webforge_core::prelude::*;
///
/// async fn ping(ctx: Context) -> Result<()> {
///     ctx.send_raw("pong")
/// }
///
/// let act = action(ping);
/// ```
pub fn action<F, Fut>(f: F) -> Arc<dyn Action>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(ActionFn { f })
}

/// A registered route: an optional page file, an optional action.
///
/// A route with a file and no action serves that file as-is. A route
/// with an action and no file relies on the action choosing an outcome;
/// falling through without one is a misconfiguration answered with a 500.
#[derive(Clone)]
pub struct Route {
    pub(crate) file: Option<String>,
    pub(crate) action: Option<Arc<dyn Action>>,
}

/// What a dispatched request resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Render `file` from the html directory, substituting `data` when
    /// templating is enabled.
    Page {
        /// File to render.
        file: String,
        /// Template fields chosen by the action, if any.
        data: Option<TemplateData>,
    },
    /// Respond with these bytes verbatim.
    Raw(Vec<u8>),
    /// Respond with the canned page for this status code.
    Error(u16),
}

/// The `(path, method)` → [`Route`] table.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<(String, Method), Route>,
}

impl RouteTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route for `(path, method)`.
    ///
    /// Registering the same pair twice overwrites the earlier route with
    /// a warning; the last registration wins.
    pub fn add(
        &mut self,
        path: impl Into<String>,
        method: Method,
        file: Option<String>,
        action: Option<Arc<dyn Action>>,
    ) {
        let path = path.into();
        let previous = self
            .routes
            .insert((path.clone(), method.clone()), Route { file, action });
        if previous.is_some() {
            warn!("route {} {} registered twice; keeping the later one", method, path);
        }
    }

    /// Looks up the route for `(path, method)`.
    pub fn get(&self, path: &str, method: &Method) -> Option<&Route> {
        self.routes.get(&(path.to_string(), method.clone()))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatches a request and resolves the outcome chain.
    ///
    /// The algorithm per hop:
    ///
    /// 1. Unknown `(path, method)` → [`Resolved::Error`]\(400\), after
    ///    the configured unmatched-route delay if one is set.
    /// 2. Run the route's action; an action error is logged and treated
    ///    as if no outcome had been chosen.
    /// 3. A redirect outcome re-enters at step 1 with the new target;
    ///    chains longer than 32 hops resolve to 500.
    /// 4. Raw and error outcomes are terminal.
    /// 5. Render outcomes resolve to a page, honoring a file override;
    ///    render without any file registered is a 500.
    /// 6. No outcome at all serves the registered page file when there
    ///    is one, else 500.
    pub async fn dispatch(
        &self,
        path: &str,
        method: Method,
        ctx: &Context,
        config: &ServerConfig,
    ) -> Resolved {
        let mut path = path.to_string();
        let mut method = method;

        for _ in 0..MAX_REDIRECT_DEPTH {
            let Some(route) = self.get(&path, &method) else {
                if config.unmatched_route_delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(
                        config.unmatched_route_delay_ms,
                    ))
                    .await;
                }
                warn!("no route registered for {} {}", method, path);
                return Resolved::Error(400);
            };

            if let Some(act) = &route.action {
                if let Err(e) = act.call(ctx).await {
                    if config.show_exceptions {
                        error!("action for {} {} failed: {e}", method, path);
                    } else {
                        error!("action for {} {} failed", method, path);
                    }
                    // A failed action forfeits whatever outcome it may
                    // have chosen before failing.
                    let _ = ctx.take_outcome();
                }
            }

            match ctx.take_outcome() {
                Some(Outcome::Redirect { path: p, method: m }) => {
                    if config.show_messages {
                        info!("redirect to {} {}", m, p);
                    }
                    path = p;
                    method = m;
                }
                Some(Outcome::SendRaw(bytes)) => return Resolved::Raw(bytes),
                Some(Outcome::HttpError(code)) => return Resolved::Error(code),
                Some(Outcome::RenderFile { file, data }) => {
                    return Resolved::Page { file, data };
                }
                Some(Outcome::Render { data }) => match &route.file {
                    Some(file) => {
                        return Resolved::Page {
                            file: file.clone(),
                            data,
                        };
                    }
                    None => {
                        error!(
                            "render chosen for {} {} but the route has no page file",
                            method, path
                        );
                        return Resolved::Error(500);
                    }
                },
                None => match &route.file {
                    Some(file) => {
                        return Resolved::Page {
                            file: file.clone(),
                            data: None,
                        };
                    }
                    None => {
                        error!(
                            "route {} {} chose no outcome and has no page file",
                            method, path
                        );
                        return Resolved::Error(500);
                    }
                },
            }
        }

        error!("redirect chain exceeded {MAX_REDIRECT_DEPTH} hops; giving up");
        Resolved::Error(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(Method::GET, "/", "", Vec::new())
    }

    fn config() -> ServerConfig {
        ServerConfig::default()
    }

    #[tokio::test]
    async fn test_static_route_returns_its_file() {
        let mut routes = RouteTable::new();
        routes.add("/", Method::GET, Some("index.html".into()), None);

        let resolved = routes.dispatch("/", Method::GET, &ctx(), &config()).await;
        assert_eq!(
            resolved,
            Resolved::Page {
                file: "index.html".into(),
                data: None
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_400() {
        let routes = RouteTable::new();
        let resolved = routes.dispatch("/nope", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Error(400));
    }

    #[tokio::test]
    async fn test_method_is_part_of_the_key() {
        let mut routes = RouteTable::new();
        routes.add("/form", Method::POST, Some("form.html".into()), None);

        let resolved = routes.dispatch("/form", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Error(400));
    }

    #[tokio::test]
    async fn test_render_with_data() {
        let mut routes = RouteTable::new();
        routes.add(
            "/",
            Method::GET,
            Some("index.html".into()),
            Some(action(|ctx: Context| async move {
                ctx.render(TemplateData::new().set("x", 1))
            })),
        );

        match routes.dispatch("/", Method::GET, &ctx(), &config()).await {
            Resolved::Page { file, data } => {
                assert_eq!(file, "index.html");
                assert!(data.unwrap().get("x").is_some());
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_file_overrides_registered_file() {
        let mut routes = RouteTable::new();
        routes.add(
            "/",
            Method::GET,
            Some("index.html".into()),
            Some(action(|ctx: Context| async move {
                ctx.render_file("special.html", None)
            })),
        );

        match routes.dispatch("/", Method::GET, &ctx(), &config()).await {
            Resolved::Page { file, .. } => assert_eq!(file, "special.html"),
            other => panic!("unexpected resolution: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_raw_is_terminal() {
        let mut routes = RouteTable::new();
        routes.add(
            "/api",
            Method::GET,
            None,
            Some(action(|ctx: Context| async move { ctx.send_raw("payload") })),
        );

        let resolved = routes.dispatch("/api", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Raw(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_http_error_is_terminal() {
        let mut routes = RouteTable::new();
        routes.add(
            "/gone",
            Method::GET,
            None,
            Some(action(|ctx: Context| async move { ctx.http_error(404) })),
        );

        let resolved = routes.dispatch("/gone", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Error(404));
    }

    #[tokio::test]
    async fn test_redirect_chain_matches_direct_dispatch() {
        let mut routes = RouteTable::new();
        routes.add(
            "/a",
            Method::GET,
            None,
            Some(action(|ctx: Context| async move { ctx.redirect("/b") })),
        );
        routes.add(
            "/b",
            Method::GET,
            None,
            Some(action(|ctx: Context| async move { ctx.redirect("/c") })),
        );
        routes.add("/c", Method::GET, Some("c.html".into()), None);

        let chained = routes.dispatch("/a", Method::GET, &ctx(), &config()).await;
        let direct = routes.dispatch("/c", Method::GET, &ctx(), &config()).await;
        assert_eq!(chained, direct);
    }

    #[tokio::test]
    async fn test_redirect_can_switch_method() {
        let mut routes = RouteTable::new();
        routes.add(
            "/submit",
            Method::POST,
            None,
            Some(action(|ctx: Context| async move { ctx.redirect("/done") })),
        );
        routes.add("/done", Method::GET, Some("done.html".into()), None);

        let ctx = Context::new(Method::POST, "/submit", "", Vec::new());
        let resolved = routes.dispatch("/submit", Method::POST, &ctx, &config()).await;
        assert_eq!(
            resolved,
            Resolved::Page {
                file: "done.html".into(),
                data: None
            }
        );
    }

    #[tokio::test]
    async fn test_redirect_cycle_resolves_to_500() {
        let mut routes = RouteTable::new();
        routes.add(
            "/loop",
            Method::GET,
            None,
            Some(action(|ctx: Context| async move { ctx.redirect("/loop") })),
        );

        let resolved = routes.dispatch("/loop", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Error(500));
    }

    #[tokio::test]
    async fn test_failing_action_falls_back_to_file() {
        let mut routes = RouteTable::new();
        routes.add(
            "/",
            Method::GET,
            Some("index.html".into()),
            Some(action(|_ctx: Context| async move {
                Err(crate::error::Error::custom("boom"))
            })),
        );

        let resolved = routes.dispatch("/", Method::GET, &ctx(), &config()).await;
        assert_eq!(
            resolved,
            Resolved::Page {
                file: "index.html".into(),
                data: None
            }
        );
    }

    #[tokio::test]
    async fn test_failing_action_without_file_is_500() {
        let mut routes = RouteTable::new();
        routes.add(
            "/",
            Method::GET,
            None,
            Some(action(|_ctx: Context| async move {
                Err(crate::error::Error::custom("boom"))
            })),
        );

        let resolved = routes.dispatch("/", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Error(500));
    }

    #[tokio::test]
    async fn test_render_without_file_is_500() {
        let mut routes = RouteTable::new();
        routes.add(
            "/",
            Method::GET,
            None,
            Some(action(|ctx: Context| async move { ctx.render(None) })),
        );

        let resolved = routes.dispatch("/", Method::GET, &ctx(), &config()).await;
        assert_eq!(resolved, Resolved::Error(500));
    }

    #[tokio::test]
    async fn test_double_outcome_surfaces_as_action_error() {
        // The second outcome call fails; the action propagates that
        // error, which forfeits the first outcome and falls back to the
        // registered file.
        let mut routes = RouteTable::new();
        routes.add(
            "/",
            Method::GET,
            Some("fallback.html".into()),
            Some(action(|ctx: Context| async move {
                ctx.send_raw("first")?;
                ctx.redirect("/elsewhere")?;
                Ok(())
            })),
        );

        let resolved = routes.dispatch("/", Method::GET, &ctx(), &config()).await;
        assert_eq!(
            resolved,
            Resolved::Page {
                file: "fallback.html".into(),
                data: None
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let mut routes = RouteTable::new();
        routes.add("/", Method::GET, Some("old.html".into()), None);
        routes.add("/", Method::GET, Some("new.html".into()), None);
        assert_eq!(routes.len(), 1);

        let resolved = routes.dispatch("/", Method::GET, &ctx(), &config()).await;
        assert_eq!(
            resolved,
            Resolved::Page {
                file: "new.html".into(),
                data: None
            }
        );
    }

    #[tokio::test]
    async fn test_redirect_data_survives_the_chain() {
        let mut routes = RouteTable::new();
        routes.add(
            "/submit",
            Method::POST,
            None,
            Some(action(|ctx: Context| async move {
                ctx.set_redirect_data(TemplateData::new().set("name", "alice"));
                ctx.redirect("/")
            })),
        );
        routes.add(
            "/",
            Method::GET,
            Some("index.html".into()),
            Some(action(|ctx: Context| async move {
                ctx.render(ctx.redirect_data())
            })),
        );

        let ctx = Context::new(Method::POST, "/submit", "", Vec::new());
        match routes.dispatch("/submit", Method::POST, &ctx, &config()).await {
            Resolved::Page { file, data } => {
                assert_eq!(file, "index.html");
                assert!(data.unwrap().get("name").is_some());
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }
}

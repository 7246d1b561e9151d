//! Per-request state and the outcome contract.
//!
//! Every HTTP request gets its own [`Context`]: an explicit object carrying
//! the parsed request (method, path, query, body) and the request's
//! **outcome slot**. Actions receive a clone of the context and choose
//! exactly one outcome through it — render a page, render a specific
//! file, redirect to another route, send raw bytes, or signal an HTTP
//! error. Choosing a second outcome fails with
//! [`Error::AlreadyResponded`].
//!
//! Contexts are dropped when their request finishes; nothing here is
//! shared between requests, so concurrent requests can never observe
//! each other's state.
//!
//! # Examples
//!
//! ```
//! use webforge_core::prelude::*;
//!
//! async fn welcome(ctx: Context) -> Result<()> {
//!     // Data set by a redirecting route survives the redirect chain.
//!     ctx.render(ctx.redirect_data())
//! }
//!
//! async fn submit(ctx: Context) -> Result<()> {
//!     let name = ctx.form_field("name").unwrap_or_default().to_string();
//!     ctx.set_redirect_data(TemplateData::new().set("name", name));
//!     ctx.redirect("/")
//! }
//! ```

use crate::error::{Error, Result};
use crate::template::TemplateData;
use http::Method;
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// The terminal decision an action makes for a request.
///
/// Produced through the [`Context`] outcome methods and consumed by the
/// dispatcher; exposed publicly so dispatch results can be asserted on in
/// tests and advanced integrations.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Render the route's registered page file, optionally substituting
    /// template fields.
    Render {
        /// Fields for the template engine, if any.
        data: Option<TemplateData>,
    },
    /// Render a specific file instead of the route's registered one.
    RenderFile {
        /// Page file to render, relative to the html directory.
        file: String,
        /// Fields for the template engine, if any.
        data: Option<TemplateData>,
    },
    /// Re-dispatch as if the client had requested `(path, method)`.
    Redirect {
        /// Target route path.
        path: String,
        /// Target method; [`Context::redirect`] defaults this to GET.
        method: Method,
    },
    /// Respond with these bytes verbatim, bypassing files and templates.
    SendRaw(Vec<u8>),
    /// Respond with the canned page for an HTTP status code.
    HttpError(u16),
}

struct ContextInner {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
    form: OnceLock<HashMap<String, String>>,
    outcome: Mutex<Option<Outcome>>,
    redirect_data: Mutex<Option<TemplateData>>,
}

/// Request-scoped state handed to every action.
///
/// Cheaply cloneable (`Arc` inside); clones refer to the same request.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Builds a context from the parsed pieces of a request.
    ///
    /// `query` is the raw query string without the leading `?`; `body`
    /// is the raw request body.
    pub fn new(method: Method, path: impl Into<String>, query: &str, body: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                method,
                path: path.into(),
                query: parse_pairs(query),
                body,
                form: OnceLock::new(),
                outcome: Mutex::new(None),
                redirect_data: Mutex::new(None),
            }),
        }
    }

    /// The request's HTTP method.
    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// The request's path, without query string.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Looks up a query-string parameter.
    ///
    /// # Examples
    ///
    /// ```
    /// use webforge_core::context::Context;
    /// use http::Method;
    ///
    /// let ctx = Context::new(Method::GET, "/search", "q=rust&page=2", Vec::new());
    /// assert_eq!(ctx.url_param("q"), Some("rust"));
    /// assert_eq!(ctx.url_param("missing"), None);
    /// ```
    pub fn url_param(&self, name: &str) -> Option<&str> {
        self.inner.query.get(name).map(String::as_str)
    }

    /// Looks up a field from a form-encoded request body.
    ///
    /// The body is parsed as `application/x-www-form-urlencoded` pairs on
    /// first access and cached for the rest of the request.
    pub fn form_field(&self, name: &str) -> Option<&str> {
        let form = self.inner.form.get_or_init(|| {
            let raw = String::from_utf8_lossy(&self.inner.body);
            parse_pairs(&raw)
        });
        form.get(name).map(String::as_str)
    }

    /// The raw request body.
    pub fn raw_body(&self) -> &[u8] {
        &self.inner.body
    }

    /// Chooses the render outcome: serve the route's registered page
    /// file, substituting `data` if templating is enabled.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyResponded`] if an outcome was already chosen.
    pub fn render(&self, data: impl Into<Option<TemplateData>>) -> Result<()> {
        self.set_outcome(Outcome::Render { data: data.into() })
    }

    /// Chooses the render outcome with an explicit page file, overriding
    /// the route's registered one.
    pub fn render_file(
        &self,
        file: impl Into<String>,
        data: impl Into<Option<TemplateData>>,
    ) -> Result<()> {
        self.set_outcome(Outcome::RenderFile {
            file: file.into(),
            data: data.into(),
        })
    }

    /// Chooses the redirect outcome, re-dispatching to `path` as a GET.
    pub fn redirect(&self, path: impl Into<String>) -> Result<()> {
        self.redirect_to(path, Method::GET)
    }

    /// Chooses the redirect outcome with an explicit method.
    pub fn redirect_to(&self, path: impl Into<String>, method: Method) -> Result<()> {
        self.set_outcome(Outcome::Redirect {
            path: path.into(),
            method,
        })
    }

    /// Chooses the raw outcome: respond with `bytes` verbatim.
    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.set_outcome(Outcome::SendRaw(bytes.into()))
    }

    /// Serializes `value` to JSON and chooses the raw outcome with it.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.send_raw(bytes)
    }

    /// Chooses the error outcome: respond with the canned page for
    /// `code`.
    pub fn http_error(&self, code: u16) -> Result<()> {
        self.set_outcome(Outcome::HttpError(code))
    }

    /// Stores template data that survives a redirect chain, so the
    /// target route's action can pick it up with
    /// [`Context::redirect_data`].
    pub fn set_redirect_data(&self, data: TemplateData) {
        *lock(&self.inner.redirect_data) = Some(data);
    }

    /// Data stored by an earlier hop of this request's redirect chain.
    pub fn redirect_data(&self) -> Option<TemplateData> {
        lock(&self.inner.redirect_data).clone()
    }

    fn set_outcome(&self, outcome: Outcome) -> Result<()> {
        let mut slot = lock(&self.inner.outcome);
        if slot.is_some() {
            return Err(Error::AlreadyResponded);
        }
        *slot = Some(outcome);
        Ok(())
    }

    /// Removes and returns the chosen outcome, re-arming the slot for
    /// the next hop of a redirect chain.
    pub(crate) fn take_outcome(&self) -> Option<Outcome> {
        lock(&self.inner.outcome).take()
    }
}

/// Locks ignoring poisoning: the guarded sections cannot leave the slot
/// in an invalid state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn parse_pairs(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        out.insert(decode(key), decode(value));
    }
    out
}

fn decode(s: &str) -> String {
    let s = s.replace('+', " ");
    percent_decode_str(&s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context {
        Context::new(Method::GET, "/", "", Vec::new())
    }

    #[test]
    fn test_single_outcome_is_accepted() {
        let ctx = ctx();
        ctx.render(None).unwrap();
        assert_eq!(ctx.take_outcome(), Some(Outcome::Render { data: None }));
    }

    #[test]
    fn test_second_outcome_is_rejected() {
        let ctx = ctx();
        ctx.send_raw(b"one".to_vec()).unwrap();
        let err = ctx.redirect("/elsewhere").unwrap_err();
        assert!(matches!(err, Error::AlreadyResponded));
        // The first outcome is preserved.
        assert_eq!(ctx.take_outcome(), Some(Outcome::SendRaw(b"one".to_vec())));
    }

    #[test]
    fn test_take_rearms_the_slot() {
        let ctx = ctx();
        ctx.redirect("/next").unwrap();
        ctx.take_outcome();
        ctx.render(None).unwrap();
        assert!(ctx.take_outcome().is_some());
    }

    #[test]
    fn test_redirect_defaults_to_get() {
        let ctx = ctx();
        ctx.redirect("/home").unwrap();
        match ctx.take_outcome() {
            Some(Outcome::Redirect { path, method }) => {
                assert_eq!(path, "/home");
                assert_eq!(method, Method::GET);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_url_params() {
        let ctx = Context::new(Method::GET, "/s", "a=1&b=two%20words&c", Vec::new());
        assert_eq!(ctx.url_param("a"), Some("1"));
        assert_eq!(ctx.url_param("b"), Some("two words"));
        assert_eq!(ctx.url_param("c"), Some(""));
        assert_eq!(ctx.url_param("d"), None);
    }

    #[test]
    fn test_form_fields() {
        let body = b"name=alice&color=dark+blue".to_vec();
        let ctx = Context::new(Method::POST, "/submit", "", body);
        assert_eq!(ctx.form_field("name"), Some("alice"));
        assert_eq!(ctx.form_field("color"), Some("dark blue"));
        assert_eq!(ctx.form_field("missing"), None);
    }

    #[test]
    fn test_send_json() {
        #[derive(Serialize)]
        struct Reply {
            ok: bool,
        }
        let ctx = ctx();
        ctx.send_json(&Reply { ok: true }).unwrap();
        match ctx.take_outcome() {
            Some(Outcome::SendRaw(bytes)) => assert_eq!(bytes, br#"{"ok":true}"#),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_redirect_data_round_trip() {
        let ctx = ctx();
        assert!(ctx.redirect_data().is_none());
        ctx.set_redirect_data(crate::template::TemplateData::new().set("n", 1));
        let data = ctx.redirect_data().unwrap();
        assert!(data.get("n").is_some());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let ctx = ctx();
        let clone = ctx.clone();
        clone.http_error(404).unwrap();
        let err = ctx.render(None).unwrap_err();
        assert!(matches!(err, Error::AlreadyResponded));
    }
}

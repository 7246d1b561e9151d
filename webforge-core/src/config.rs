//! Server configuration.
//!
//! [`ServerConfig`] collects every tunable the framework exposes: listen
//! port, directory names for the static/html/error-page trees, the URI
//! length limit, log visibility toggles, templating options, the file
//! cache bound and the per-address connection cap.
//!
//! Configuration is loaded from a plain `key=value` file, one pair per
//! line. Unrecognized keys are ignored with a warning, malformed values
//! keep their defaults, and a missing file means all defaults apply — a
//! server always starts.
//!
//! # File format
//!
//! ```text
//! port=8080
//! static_dir=assets
//! uri_char_limit=512
//! templating=true
//! cache_file_limit=200
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use webforge_core::config::ServerConfig;
//!
//! let config = ServerConfig::from_file("server.conf");
//! println!("listening on port {}", config.port);
//! ```

use std::fmt;
use std::path::Path;
use tracing::warn;

/// Runtime configuration for a [`Server`](crate::server::Server).
///
/// All fields are public; construct via [`ServerConfig::default`] and
/// override what you need, or load overrides from disk with
/// [`ServerConfig::from_file`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the server listens on.
    pub port: u16,
    /// Directory served for static-asset requests (paths with a file
    /// extension) unless overridden per extension.
    pub static_dir: String,
    /// Directory that route page files are rendered from.
    pub html_dir: String,
    /// Directory holding canned error pages (`400.html`, `404.html`, ...).
    pub error_dir: String,
    /// Maximum request-URI length in characters; longer URIs get a 414.
    pub uri_char_limit: usize,
    /// Gates routine request-flow log messages.
    pub show_messages: bool,
    /// Gates full error detail when an action or the pipeline fails.
    pub show_exceptions: bool,
    /// Enables `{{var}}` substitution when rendering page files.
    pub templating: bool,
    /// Upper bound in bytes for a processed template's output.
    pub max_template_size: usize,
    /// Maximum number of entries the file cache holds before evicting.
    pub cache_file_limit: usize,
    /// Maximum concurrent connections accepted per source IP address.
    /// Zero disables the limit.
    pub max_connections_per_ip: usize,
    /// Delay in milliseconds before answering an unmatched route.
    /// Zero (the default) disables the delay; non-zero values throttle
    /// route probing at the cost of holding a task per bad request.
    pub unmatched_route_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            static_dir: "static".to_string(),
            html_dir: "html".to_string(),
            error_dir: "httperrors".to_string(),
            uri_char_limit: 255,
            show_messages: true,
            show_exceptions: true,
            templating: false,
            max_template_size: 5_242_880,
            cache_file_limit: 1000,
            max_connections_per_ip: 0,
            unmatched_route_delay_ms: 0,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a `key=value` file, falling back to
    /// defaults for anything absent or unreadable.
    ///
    /// Lines without `=` and lines starting with `#` are skipped.
    /// Unknown keys and unparsable values produce a warning and are
    /// otherwise ignored.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let mut config = Self::default();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                warn!("config file {:?} not found, using defaults", path);
                return config;
            }
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!("ignoring malformed config line: {line}");
                continue;
            };
            config.apply(key.trim(), value.trim());
        }
        config
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "port" => set(key, value, &mut self.port),
            "static_dir" => self.static_dir = value.to_string(),
            "html_dir" => self.html_dir = value.to_string(),
            "error_dir" => self.error_dir = value.to_string(),
            "uri_char_limit" => set(key, value, &mut self.uri_char_limit),
            "show_messages" => set_bool(key, value, &mut self.show_messages),
            "show_exceptions" => set_bool(key, value, &mut self.show_exceptions),
            "templating" => set_bool(key, value, &mut self.templating),
            "max_template_size" => set(key, value, &mut self.max_template_size),
            "cache_file_limit" => set(key, value, &mut self.cache_file_limit),
            "max_connections_per_ip" => set(key, value, &mut self.max_connections_per_ip),
            "unmatched_route_delay_ms" => set(key, value, &mut self.unmatched_route_delay_ms),
            _ => warn!("unrecognized config key: {key}"),
        }
    }
}

fn set<T>(key: &str, value: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match value.parse() {
        Ok(v) => *slot = v,
        Err(e) => warn!("invalid value for {key}: {value} ({e})"),
    }
}

fn set_bool(key: &str, value: &str, slot: &mut bool) {
    match value {
        "true" | "1" => *slot = true,
        "false" | "0" => *slot = false,
        other => warn!("invalid value for {key}: {other} (expected true/false)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.static_dir, "static");
        assert_eq!(config.html_dir, "html");
        assert_eq!(config.error_dir, "httperrors");
        assert_eq!(config.uri_char_limit, 255);
        assert!(!config.templating);
        assert_eq!(config.cache_file_limit, 1000);
        assert_eq!(config.max_connections_per_ip, 0);
        assert_eq!(config.unmatched_route_delay_ms, 0);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ServerConfig::from_file("definitely/not/a/real/file.conf");
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_parses_known_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port=8080").unwrap();
        writeln!(file, "static_dir=assets").unwrap();
        writeln!(file, "templating=true").unwrap();
        writeln!(file, "cache_file_limit=50").unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file).unwrap();

        let config = ServerConfig::from_file(file.path());
        assert_eq!(config.port, 8080);
        assert_eq!(config.static_dir, "assets");
        assert!(config.templating);
        assert_eq!(config.cache_file_limit, 50);
        // untouched keys keep defaults
        assert_eq!(config.uri_char_limit, 255);
    }

    #[test]
    fn test_unknown_keys_and_bad_values_are_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no_such_key=1").unwrap();
        writeln!(file, "port=not-a-number").unwrap();
        writeln!(file, "show_messages=maybe").unwrap();
        writeln!(file, "just a stray line").unwrap();

        let config = ServerConfig::from_file(file.path());
        assert_eq!(config.port, 5000);
        assert!(config.show_messages);
    }

    #[test]
    fn test_bool_numeric_forms() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "show_messages=0").unwrap();
        writeln!(file, "templating=1").unwrap();

        let config = ServerConfig::from_file(file.path());
        assert!(!config.show_messages);
        assert!(config.templating);
    }
}

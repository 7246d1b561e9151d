//! Byte-level `{{var}}` template substitution.
//!
//! The engine performs a single left-to-right pass over a page's raw
//! bytes, replacing each well-formed `{{name}}` placeholder with the text
//! form of the matching field from a [`TemplateData`] map. It is
//! deliberately not a templating language: no nesting, no expressions,
//! no escaping — just flat identifier substitution.
//!
//! # Placeholder rules
//!
//! - A placeholder opens with a literal `{{` and must close with `}}`
//!   immediately after the name.
//! - Names are ASCII letters, digits and underscores, at most
//!   [`MAX_VAR_LEN`] characters.
//! - A name present in the data map is replaced by its value's text form.
//! - A well-formed name missing from the map is dropped from the output
//!   with a warning — pages render, just without that value.
//! - A malformed placeholder (unterminated, over-long, illegal
//!   characters) aborts processing: the **original** template bytes are
//!   returned unchanged, so a broken template serves unsubstituted
//!   content rather than failing the request.
//!
//! # Examples
//!
//! ```
//! use webforge_core::template::{TemplateData, TemplateEngine};
//!
//! let engine = TemplateEngine::new(1024);
//! let data = TemplateData::new().set("name", "World").set("visits", 3);
//!
//! let out = engine.substitute(b"Hello {{name}}, visit #{{visits}}!", &data);
//! assert_eq!(out, b"Hello World, visit #3!");
//! ```

use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, warn};

/// Maximum length of a placeholder name, in characters.
pub const MAX_VAR_LEN: usize = 32;

/// A value that can be substituted into a template.
///
/// Explicit string/number union built by the caller — field lookup is a
/// plain map access, with no runtime reflection involved.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    /// Text, substituted verbatim.
    Str(String),
    /// Signed integer, substituted in decimal form.
    Int(i64),
    /// Floating point number.
    Float(f64),
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Str(s) => f.write_str(s),
            TemplateValue::Int(n) => write!(f, "{n}"),
            TemplateValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::Str(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::Str(value)
    }
}

impl From<i64> for TemplateValue {
    fn from(value: i64) -> Self {
        TemplateValue::Int(value)
    }
}

impl From<i32> for TemplateValue {
    fn from(value: i32) -> Self {
        TemplateValue::Int(value.into())
    }
}

impl From<u32> for TemplateValue {
    fn from(value: u32) -> Self {
        TemplateValue::Int(value.into())
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Float(value)
    }
}

impl From<f32> for TemplateValue {
    fn from(value: f32) -> Self {
        TemplateValue::Float(value.into())
    }
}

/// Named fields passed to the template engine.
///
/// Built by actions before rendering and carried on the request context.
///
/// # Examples
///
/// ```
/// use webforge_core::template::TemplateData;
///
/// let data = TemplateData::new()
///     .set("user", "alice")
///     .set("score", 42);
///
/// assert_eq!(data.len(), 2);
/// assert!(data.get("user").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateData {
    fields: BTreeMap<String, TemplateValue>,
}

impl TemplateData {
    /// Creates an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style. Re-using a name overwrites.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<TemplateValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.fields.get(name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The substitution engine.
///
/// Holds the output size cap; everything else is per-call input. One
/// engine instance is shared by all requests of a server.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    max_output: usize,
}

impl TemplateEngine {
    /// Creates an engine whose processed output may not exceed
    /// `max_output` bytes.
    pub fn new(max_output: usize) -> Self {
        Self { max_output }
    }

    /// Substitutes `fields` into `template`, returning the processed
    /// bytes.
    ///
    /// Fail-open: any processing fault (malformed placeholder, output
    /// over the size cap) returns the original template unchanged. The
    /// fault is logged; the response pipeline never sees an error from
    /// here.
    pub fn substitute(&self, template: &[u8], fields: &TemplateData) -> Vec<u8> {
        match self.try_substitute(template, fields) {
            Ok(out) => out,
            Err(e) => {
                error!("{e}; serving template unmodified");
                template.to_vec()
            }
        }
    }

    fn try_substitute(
        &self,
        template: &[u8],
        fields: &TemplateData,
    ) -> crate::error::Result<Vec<u8>> {
        // Head start on capacity: assume ~20 bytes per substituted field.
        let mut out = Vec::with_capacity(template.len() + fields.len() * 20);
        let mut i = 0;

        while i < template.len() {
            if template[i] == b'{' && template.get(i + 1) == Some(&b'{') {
                let start = i + 2;
                let mut end = start;
                while end < template.len()
                    && is_var_char(template[end])
                    && end - start < MAX_VAR_LEN
                {
                    end += 1;
                }
                if template.get(end) != Some(&b'}') || template.get(end + 1) != Some(&b'}') {
                    let shown = String::from_utf8_lossy(&template[start..end]);
                    return Err(crate::error::Error::template(format!(
                        "placeholder `{shown}` not closed, over {MAX_VAR_LEN} characters, \
                         or contains invalid characters"
                    )));
                }
                // Names are ASCII by construction of is_var_char.
                let name = std::str::from_utf8(&template[start..end]).unwrap_or_default();
                match fields.get(name) {
                    Some(value) => {
                        out.extend_from_slice(value.to_string().as_bytes());
                    }
                    None => {
                        warn!("template variable `{name}` was not passed to the template");
                    }
                }
                i = end + 2;
            } else {
                out.push(template[i]);
                i += 1;
            }

            if out.len() > self.max_output {
                return Err(crate::error::Error::template(format!(
                    "processed output exceeds {} bytes",
                    self.max_output
                )));
            }
        }

        Ok(out)
    }
}

fn is_var_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

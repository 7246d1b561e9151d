//! Binary event framing.
//!
//! Events travel inside binary WebSocket messages with a compact,
//! length-free header:
//!
//! - **Fast event**: first byte `0x00`, second byte the event id
//!   (0–255), then the payload. The payload ends at the first NUL byte
//!   or at the end of the message.
//! - **Named event**: the message starts with the event name (any
//!   leading byte other than `0x00`), terminated by a NUL byte, followed
//!   by the payload. Names longer than [`MAX_NAME_LEN`] bytes are a
//!   parse error and the message is dropped.
//!
//! # Examples
//!
//! ```
//! use webforge_core::websocket::frame::{EventFrame, EventKey};
//!
//! let frame = EventFrame::parse(&[0x00, 0x05, b'h', b'i']).unwrap();
//! assert_eq!(frame.key, EventKey::Fast(5));
//! assert_eq!(frame.payload, b"hi");
//!
//! let frame = EventFrame::parse(b"chat\0hello").unwrap();
//! assert_eq!(frame.key, EventKey::Named("chat".into()));
//! assert_eq!(frame.payload, b"hello");
//! ```

use crate::error::{Error, Result};

/// Maximum length of a named event's header region in bytes, including
/// the NUL terminator position.
pub const MAX_NAME_LEN: usize = 256;

/// Identifies which callback an event frame targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    /// A numbered event, dispatched through the 256-slot fast table.
    Fast(u8),
    /// A named event, dispatched through the name map.
    Named(String),
}

impl From<u8> for EventKey {
    fn from(id: u8) -> Self {
        EventKey::Fast(id)
    }
}

impl From<&str> for EventKey {
    fn from(name: &str) -> Self {
        EventKey::Named(name.to_string())
    }
}

impl From<String> for EventKey {
    fn from(name: String) -> Self {
        EventKey::Named(name)
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKey::Fast(id) => write!(f, "#{id}"),
            EventKey::Named(name) => f.write_str(name),
        }
    }
}

/// A parsed (or to-be-sent) application event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    /// Target event.
    pub key: EventKey,
    /// Event payload bytes.
    pub payload: Vec<u8>,
}

impl EventFrame {
    /// Builds a frame for sending.
    pub fn new(key: impl Into<EventKey>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }

    /// Parses an inbound binary message into an event frame.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidFrame`] when the message is empty, a fast frame
    /// is missing its id byte, or a named frame's name is unterminated
    /// within the [`MAX_NAME_LEN`] header region.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let Some(&first) = raw.first() else {
            return Err(Error::frame("empty message"));
        };

        if first == 0 {
            if raw.len() < 2 {
                return Err(Error::frame("numbered event is missing its id byte"));
            }
            let rest = &raw[2..];
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            Ok(Self {
                key: EventKey::Fast(raw[1]),
                payload: rest[..end].to_vec(),
            })
        } else {
            let header = &raw[..raw.len().min(MAX_NAME_LEN)];
            let Some(nul) = header.iter().position(|&b| b == 0) else {
                return Err(Error::frame(format!(
                    "event name not NUL-terminated within {MAX_NAME_LEN} bytes"
                )));
            };
            let name = std::str::from_utf8(&raw[..nul])
                .map_err(|_| Error::frame("event name is not valid UTF-8"))?;
            Ok(Self {
                key: EventKey::Named(name.to_string()),
                payload: raw[nul + 1..].to_vec(),
            })
        }
    }

    /// Encodes this frame into the wire layout [`parse`](Self::parse)
    /// understands.
    pub fn encode(&self) -> Vec<u8> {
        match &self.key {
            EventKey::Fast(id) => {
                let mut out = Vec::with_capacity(self.payload.len() + 2);
                out.push(0);
                out.push(*id);
                out.extend_from_slice(&self.payload);
                out
            }
            EventKey::Named(name) => {
                let mut out = Vec::with_capacity(name.len() + 1 + self.payload.len());
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                out.extend_from_slice(&self.payload);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fast_event() {
        let frame = EventFrame::parse(&[0x00, 0x05, b'h', b'i']).unwrap();
        assert_eq!(frame.key, EventKey::Fast(5));
        assert_eq!(frame.payload, b"hi");
    }

    #[test]
    fn test_parse_fast_event_payload_stops_at_nul() {
        let frame = EventFrame::parse(&[0x00, 0x09, b'o', b'k', 0x00, b'x']).unwrap();
        assert_eq!(frame.key, EventKey::Fast(9));
        assert_eq!(frame.payload, b"ok");
    }

    #[test]
    fn test_parse_fast_event_empty_payload() {
        let frame = EventFrame::parse(&[0x00, 0xFF]).unwrap();
        assert_eq!(frame.key, EventKey::Fast(255));
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_parse_named_event() {
        let frame = EventFrame::parse(b"chat\0hello").unwrap();
        assert_eq!(frame.key, EventKey::Named("chat".into()));
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn test_parse_named_event_empty_payload() {
        let frame = EventFrame::parse(b"ping\0").unwrap();
        assert_eq!(frame.key, EventKey::Named("ping".into()));
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_empty_message_is_an_error() {
        assert!(EventFrame::parse(&[]).is_err());
    }

    #[test]
    fn test_fast_event_without_id_is_an_error() {
        assert!(EventFrame::parse(&[0x00]).is_err());
    }

    #[test]
    fn test_unterminated_name_is_an_error() {
        let raw = vec![b'a'; MAX_NAME_LEN + 10];
        let err = EventFrame::parse(&raw).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame(_)));
    }

    #[test]
    fn test_short_unterminated_name_is_an_error() {
        assert!(EventFrame::parse(b"no-terminator").is_err());
    }

    #[test]
    fn test_encode_fast_round_trip() {
        let frame = EventFrame::new(7u8, b"data".to_vec());
        let parsed = EventFrame::parse(&frame.encode()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_encode_named_round_trip() {
        let frame = EventFrame::new("move", b"x=1".to_vec());
        let parsed = EventFrame::parse(&frame.encode()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_encode_named_layout() {
        let frame = EventFrame::new("hi", b"!".to_vec());
        assert_eq!(frame.encode(), b"hi\0!");
    }
}

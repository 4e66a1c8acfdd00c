//! Hybrid JSON + binary wire frame.
//!
//! Binary frames carry a length-prefixed JSON header followed by an opaque
//! payload:
//! ```text
//! ┌────────────────┬──────────────────────┬──────────────────┐
//! │ header_len (H) │ header               │ payload          │
//! │ 4 bytes, u32 LE│ H bytes, UTF-8 JSON  │ remaining bytes  │
//! └────────────────┴──────────────────────┴──────────────────┘
//! ```
//!
//! Text frames carry a bare JSON document and never have a payload.
//! The relay only decodes headers to pick a route; forwarded frames are
//! relayed byte-for-byte.

use serde_json::Value;
use thiserror::Error;

/// Size of the little-endian header length prefix.
pub const HEADER_PREFIX_LEN: usize = 4;

/// Frame codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes than the prefix or the declared header length requires.
    #[error("frame too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    /// Header bytes are not UTF-8 or not JSON.
    #[error("invalid frame header: {0}")]
    InvalidHeader(String),
    /// Serialized header does not fit the 32-bit length prefix.
    #[error("frame header too large: {0} bytes")]
    HeaderTooLarge(usize),
}

/// Transport-level framing kind of an inbound message.
#[derive(Debug, Clone, Copy)]
pub enum WireFrame<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// A decoded frame: JSON header plus optional payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: Value,
    /// `None` for text frames, `Some` (possibly empty) for binary frames.
    pub payload: Option<Vec<u8>>,
}

impl Frame {
    pub fn new(header: Value, payload: Option<Vec<u8>>) -> Self {
        Self { header, payload }
    }

    /// The header's `type` field, if it is a string.
    pub fn message_type(&self) -> Option<&str> {
        self.header.get("type").and_then(Value::as_str)
    }

    /// Payload bytes, empty when absent.
    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or(&[])
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

/// A decoded frame whose payload still borrows the inbound buffer.
///
/// Routing only needs the header, so the relay decodes into this view and
/// never copies tile bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRef<'a> {
    pub header: Value,
    pub payload: Option<&'a [u8]>,
}

impl<'a> FrameRef<'a> {
    pub fn message_type(&self) -> Option<&str> {
        self.header.get("type").and_then(Value::as_str)
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload.unwrap_or(&[])
    }

    pub fn into_owned(self) -> Frame {
        Frame {
            header: self.header,
            payload: self.payload.map(<[u8]>::to_vec),
        }
    }
}

/// Decode an inbound message according to its transport framing kind.
pub fn decode(wire: WireFrame<'_>) -> Result<Frame, FrameError> {
    decode_ref(wire).map(FrameRef::into_owned)
}

/// Like [`decode`], but borrows the payload instead of copying it.
pub fn decode_ref(wire: WireFrame<'_>) -> Result<FrameRef<'_>, FrameError> {
    match wire {
        WireFrame::Text(text) => Ok(FrameRef {
            header: parse_header(text)?,
            payload: None,
        }),
        WireFrame::Binary(raw) => {
            let (header, payload) = split_binary(raw)?;
            Ok(FrameRef {
                header,
                payload: Some(payload),
            })
        }
    }
}

/// Decode a length-prefixed binary frame.
pub fn decode_binary(raw: &[u8]) -> Result<Frame, FrameError> {
    let (header, payload) = split_binary(raw)?;
    Ok(Frame {
        header,
        payload: Some(payload.to_vec()),
    })
}

fn split_binary(raw: &[u8]) -> Result<(Value, &[u8]), FrameError> {
    if raw.len() < HEADER_PREFIX_LEN {
        return Err(FrameError::TooShort {
            needed: HEADER_PREFIX_LEN,
            actual: raw.len(),
        });
    }

    let mut prefix = [0u8; HEADER_PREFIX_LEN];
    prefix.copy_from_slice(&raw[..HEADER_PREFIX_LEN]);
    let header_len = u32::from_le_bytes(prefix) as usize;

    // A huge prefix must not overflow on 32-bit targets.
    let header_end = HEADER_PREFIX_LEN
        .checked_add(header_len)
        .ok_or(FrameError::TooShort {
            needed: usize::MAX,
            actual: raw.len(),
        })?;
    if raw.len() < header_end {
        return Err(FrameError::TooShort {
            needed: header_end,
            actual: raw.len(),
        });
    }

    let text = std::str::from_utf8(&raw[HEADER_PREFIX_LEN..header_end])
        .map_err(|e| FrameError::InvalidHeader(e.to_string()))?;
    let header = parse_header(text)?;

    Ok((header, &raw[header_end..]))
}

/// Decode a text frame: the whole text is the JSON header.
pub fn decode_text(text: &str) -> Result<Frame, FrameError> {
    Ok(Frame {
        header: parse_header(text)?,
        payload: None,
    })
}

/// Encode a header and payload into a binary frame.
pub fn encode(header: &Value, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(header).map_err(|e| FrameError::InvalidHeader(e.to_string()))?;
    let header_len = u32::try_from(json.len()).map_err(|_| FrameError::HeaderTooLarge(json.len()))?;

    let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + json.len() + payload.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(payload);
    Ok(out)
}

fn parse_header(text: &str) -> Result<Value, FrameError> {
    serde_json::from_str(text).map_err(|e| FrameError::InvalidHeader(e.to_string()))
}

//! WebSocket frames as seen by route handlers.
//!
//! Ping and pong are answered by the host transport and never reach
//! handlers, so only data and close frames are modelled.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CloseCode, WsError, WsResult};

/// A data or close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
    /// Close frame with an optional code and reason.
    Close(Option<CloseFrame>),
}

/// Code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Wire close code.
    pub code: u16,
    /// Human readable reason.
    pub reason: String,
}

impl CloseFrame {
    /// Creates a close frame.
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: code.as_u16(),
            reason: reason.into(),
        }
    }

    /// Returns the code if it is a known [`CloseCode`].
    pub fn close_code(&self) -> Option<CloseCode> {
        CloseCode::from_u16(self.code)
    }
}

impl Message {
    /// Creates a text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates a binary message.
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Creates a close message.
    pub fn close(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Close(Some(CloseFrame::new(code, reason)))
    }

    /// Serializes `value` into a text message.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> WsResult<Self> {
        serde_json::to_string(value)
            .map(Self::Text)
            .map_err(|e| WsError::EncodeFailed(e.to_string()))
    }

    /// Parses a text or binary payload as JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> WsResult<T> {
        let result = match self {
            Self::Text(text) => serde_json::from_str(text),
            Self::Binary(data) => serde_json::from_slice(data),
            Self::Close(_) => return Err(WsError::DecodeFailed("close frame".to_string())),
        };
        result.map_err(|e| WsError::DecodeFailed(e.to_string()))
    }

    /// Returns the text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the payload bytes of a data frame.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(data) => Some(data),
            Self::Close(_) => None,
        }
    }

    /// Returns true for close frames.
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Close(_))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

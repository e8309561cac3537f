//! Errors raised while encoding or decoding wire messages.
//!
//! Sources are wrapped in `Arc` so the error stays `Clone`; decoded frames are
//! fanned out to several consumers in the host crate.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Errors arising from the line-delimited JSON protocol.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// A non-empty line could not be decoded into a message.
    #[error("malformed message: {message}")]
    MalformedMessage {
        /// The offending line, lossily decoded.
        line: String,
        /// Human-readable description of the failure.
        message: String,
        /// Underlying JSON error, when parsing got that far.
        #[source]
        source: Option<Arc<serde_json::Error>>,
    },

    /// A message could not be serialised.
    #[error("failed to encode message: {0}")]
    Encode(#[source] Arc<serde_json::Error>),

    /// Reading from the underlying stream failed.
    #[error("failed to read message stream: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl ProtocolError {
    /// Builds a malformed-message error without an underlying JSON source.
    #[must_use]
    pub fn malformed(line: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedMessage {
            line: line.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Returns `true` for errors describing a single bad line.
    ///
    /// Such errors are recoverable: the stream keeps producing frames.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedMessage { .. })
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Broad category of a transport failure, used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// TLS or protocol mismatch while talking to the remote end.
    Protocol,
    /// The peer reset the connection.
    ConnectionReset,
    Timeout,
    /// The connection could not be established at all.
    Connect,
    /// A response arrived but its body could not be parsed.
    Decode,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Protocol => "protocol",
            Self::ConnectionReset => "connection reset",
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Decode => "decode",
            Self::Other => "other",
        };
        f.write_str(label)
    }
}

/// No usable response was obtained from the collector.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// True for failures that usually mean a plaintext-only proxy was asked to speak TLS.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Protocol | TransportErrorKind::ConnectionReset
        )
    }
}

/// Errors surfaced by the collector API. A send that returns any of these
/// leaves the caller responsible for keeping the unsent data.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Not connected to collector.")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("No agent run ID received from handshake.")]
    MissingRunId,
    #[error("a connect or restart is already in progress")]
    NegotiationInProgress,
    #[error("the collector permanently rejected this agent")]
    Terminated,
    #[error("connect cancelled before a session was established")]
    Cancelled,
    #[error("failed to restart agent run: {0}")]
    RestartFailed(String),
    #[error("failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading [`crate::config::Config`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

pub const DEFAULT_PORT: u16 = 443;

/// Host/port pair a remote method is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a `redirect_host` value of the form `host` or `host:port`.
    ///
    /// Returns `None` for malformed values: more than one colon, an empty
    /// host, or a port that is not a valid `u16`. A missing port falls back
    /// to [`DEFAULT_PORT`].
    pub fn from_redirect_host(redirect_host: &str) -> Option<Self> {
        let parts = redirect_host.split(':').collect::<Vec<&str>>();
        let (host, port) = match parts.as_slice() {
            [host] => (*host, DEFAULT_PORT),
            [host, port] => (*host, port.parse::<u16>().ok()?),
            _ => return None,
        };
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

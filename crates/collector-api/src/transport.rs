// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The request transport consumed by the collector API.
//!
//! The core never speaks HTTP itself. It hands a [`RemoteRequest`] to a
//! [`Transport`] and gets back either a [`RawResponse`] (any status code) or a
//! [`TransportError`] when no response was obtained at all.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::errors::TransportError;
use crate::method::Method;

/// One invocation of a remote method.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: Method,
    pub endpoint: Endpoint,
    /// Current run identifier, absent for the handshake methods.
    pub run_id: Option<String>,
    pub payload: Value,
    /// Headers handed out by the collector on connect.
    pub headers: Option<HashMap<String, String>>,
}

/// Status code and parsed body of a collector response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub payload: Option<Value>,
}

impl RawResponse {
    pub fn new(status: u16, payload: Option<Value>) -> Self {
        Self { status, payload }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes the request. Timeouts are the transport's responsibility.
    async fn invoke(&self, request: RemoteRequest) -> Result<RawResponse, TransportError>;
}

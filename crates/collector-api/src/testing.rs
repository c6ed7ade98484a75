// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{TransportError, TransportErrorKind};
use crate::method::Method;
use crate::transport::{RawResponse, RemoteRequest, Transport};

type Scripted = Result<RawResponse, TransportError>;

/// Replays queued results per method and records every request.
///
/// Unscripted calls succeed: preconnect with an empty reply, connect with a
/// fresh `run-N` id, everything else with no payload.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Mutex<HashMap<Method, VecDeque<Scripted>>>,
    requests: Mutex<Vec<RemoteRequest>>,
    runs: AtomicU64,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, method: Method, result: Scripted) {
        self.script
            .lock()
            .expect("script lock")
            .entry(method)
            .or_default()
            .push_back(result);
    }

    pub(crate) fn respond(&self, method: Method, status: u16, payload: Option<Value>) {
        self.push(method, Ok(RawResponse::new(status, payload)));
    }

    pub(crate) fn fail(&self, method: Method, kind: TransportErrorKind) {
        self.push(method, Err(TransportError::new(kind, "scripted failure")));
    }

    pub(crate) fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn requests_for(&self, method: Method) -> Vec<RemoteRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method == method)
            .collect()
    }

    fn unscripted(&self, method: Method) -> Scripted {
        let payload = match method {
            Method::Preconnect => Some(json!({})),
            Method::Connect => {
                let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
                Some(json!({"agent_run_id": format!("run-{run}")}))
            }
            _ => None,
        };
        Ok(RawResponse::new(200, payload))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn invoke(&self, request: RemoteRequest) -> Result<RawResponse, TransportError> {
        // Let concurrent callers interleave the way a real network round trip would.
        tokio::task::yield_now().await;

        let method = request.method;
        self.requests.lock().expect("requests lock").push(request);
        let scripted = self
            .script
            .lock()
            .expect("script lock")
            .get_mut(&method)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| self.unscripted(method))
    }
}

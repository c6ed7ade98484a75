// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::trace;

use crate::endpoint::Endpoint;
use crate::errors::TransportError;
use crate::transport::{RawResponse, RemoteRequest, Transport};

/// Every remote method the collector exposes to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Preconnect,
    Connect,
    AgentSettings,
    ErrorData,
    MetricData,
    TransactionSampleData,
    Shutdown,
    AnalyticEventData,
    CustomEventData,
    SqlTraceData,
    ErrorEventData,
    SpanEventData,
    LogEventData,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::Preconnect,
        Method::Connect,
        Method::AgentSettings,
        Method::ErrorData,
        Method::MetricData,
        Method::TransactionSampleData,
        Method::Shutdown,
        Method::AnalyticEventData,
        Method::CustomEventData,
        Method::SqlTraceData,
        Method::ErrorEventData,
        Method::SpanEventData,
        Method::LogEventData,
    ];

    /// Wire identifier sent as the `method` query parameter.
    pub fn name(self) -> &'static str {
        match self {
            Method::Preconnect => "preconnect",
            Method::Connect => "connect",
            Method::AgentSettings => "agent_settings",
            Method::ErrorData => "error_data",
            Method::MetricData => "metric_data",
            Method::TransactionSampleData => "transaction_sample_data",
            Method::Shutdown => "shutdown",
            Method::AnalyticEventData => "analytic_event_data",
            Method::CustomEventData => "custom_event_data",
            Method::SqlTraceData => "sql_trace_data",
            Method::ErrorEventData => "error_event_data",
            Method::SpanEventData => "span_event_data",
            Method::LogEventData => "log_event_data",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The telemetry kinds that are harvested and sent during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryKind {
    Errors,
    Metrics,
    Traces,
    Events,
    CustomEvents,
    Queries,
    ErrorEvents,
    SpanEvents,
    LogEvents,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 9] = [
        TelemetryKind::Errors,
        TelemetryKind::Metrics,
        TelemetryKind::Traces,
        TelemetryKind::Events,
        TelemetryKind::CustomEvents,
        TelemetryKind::Queries,
        TelemetryKind::ErrorEvents,
        TelemetryKind::SpanEvents,
        TelemetryKind::LogEvents,
    ];

    pub fn method(self) -> Method {
        match self {
            TelemetryKind::Errors => Method::ErrorData,
            TelemetryKind::Metrics => Method::MetricData,
            TelemetryKind::Traces => Method::TransactionSampleData,
            TelemetryKind::Events => Method::AnalyticEventData,
            TelemetryKind::CustomEvents => Method::CustomEventData,
            TelemetryKind::Queries => Method::SqlTraceData,
            TelemetryKind::ErrorEvents => Method::ErrorEventData,
            TelemetryKind::SpanEvents => Method::SpanEventData,
            TelemetryKind::LogEvents => Method::LogEventData,
        }
    }
}

/// Endpoint slot that can be redirected while bindings keep pointing at it.
pub type SharedEndpoint = Arc<RwLock<Endpoint>>;

/// A remote method bound to an endpoint.
#[derive(Debug, Clone)]
pub struct RemoteMethod {
    method: Method,
    endpoint: SharedEndpoint,
}

impl RemoteMethod {
    pub fn new(method: Method, endpoint: SharedEndpoint) -> Self {
        Self { method, endpoint }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn name(&self) -> &'static str {
        self.method.name()
    }

    pub fn endpoint(&self) -> Endpoint {
        match self.endpoint.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update_endpoint(&self, endpoint: Endpoint) {
        let mut guard = match self.endpoint.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = endpoint;
    }

    pub async fn invoke(
        &self,
        transport: &dyn Transport,
        run_id: Option<String>,
        payload: Value,
        headers: Option<HashMap<String, String>>,
    ) -> Result<RawResponse, TransportError> {
        let endpoint = self.endpoint();
        trace!(method = self.name(), endpoint = %endpoint, "invoking remote method");
        transport
            .invoke(RemoteRequest {
                method: self.method,
                endpoint,
                run_id,
                payload,
                headers,
            })
            .await
    }
}

/// One binding per remote method. Everything except preconnect shares a
/// single endpoint slot, so a redirect moves them all at once.
#[derive(Debug)]
pub struct MethodTable {
    preconnect: RemoteMethod,
    shared: SharedEndpoint,
    methods: HashMap<Method, RemoteMethod>,
}

impl MethodTable {
    pub fn new(initial: Endpoint) -> Self {
        let preconnect = RemoteMethod::new(
            Method::Preconnect,
            Arc::new(RwLock::new(initial.clone())),
        );
        let shared: SharedEndpoint = Arc::new(RwLock::new(initial));
        let methods = Method::ALL
            .iter()
            .filter(|method| **method != Method::Preconnect)
            .map(|method| (*method, RemoteMethod::new(*method, Arc::clone(&shared))))
            .collect();
        Self {
            preconnect,
            shared,
            methods,
        }
    }

    pub fn get(&self, method: Method) -> &RemoteMethod {
        match self.methods.get(&method) {
            Some(remote) => remote,
            None => &self.preconnect,
        }
    }

    /// Points every method except preconnect at `endpoint`.
    pub fn update_endpoints(&self, endpoint: Endpoint) {
        trace!(endpoint = %endpoint, "updating endpoints");
        let mut guard = match self.shared.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = endpoint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_method_has_a_binding() {
        let table = MethodTable::new(Endpoint::new("collector.example.com", 443));
        for method in Method::ALL {
            assert_eq!(table.get(method).method(), method);
        }
    }

    #[test]
    fn update_endpoints_skips_preconnect() {
        let initial = Endpoint::new("collector.example.com", 443);
        let table = MethodTable::new(initial.clone());
        let redirected = Endpoint::new("collector-2.example.com", 8080);

        table.update_endpoints(redirected.clone());

        assert_eq!(table.get(Method::Preconnect).endpoint(), initial);
        for method in Method::ALL
            .into_iter()
            .filter(|m| *m != Method::Preconnect)
        {
            assert_eq!(table.get(method).endpoint(), redirected, "{method}");
        }
    }

    #[test]
    fn telemetry_kinds_map_to_data_methods() {
        assert_eq!(TelemetryKind::Errors.method().name(), "error_data");
        assert_eq!(TelemetryKind::Metrics.method().name(), "metric_data");
        assert_eq!(
            TelemetryKind::Traces.method().name(),
            "transaction_sample_data"
        );
        assert_eq!(TelemetryKind::Events.method().name(), "analytic_event_data");
        assert_eq!(TelemetryKind::Queries.method().name(), "sql_trace_data");
        assert_eq!(TelemetryKind::LogEvents.method().name(), "log_event_data");
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reporting pipeline between an APM agent and its collector.
//!
//! [`CollectorApi`] negotiates a run with the collector (preconnect, then
//! connect), retries on a fixed backoff schedule, sends telemetry under the
//! granted run, and turns every response status into a behavior: keep
//! going, restart the run, or stop for good. [`HttpTransport`] is the default
//! way requests reach the collector; anything implementing [`Transport`] can
//! stand in for it.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod agent;
pub mod api;
pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod harvest;
pub mod http;
pub mod method;
mod negotiator;
pub mod response;
pub mod security;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{AgentHooks, NoopAgentHooks};
pub use api::CollectorApi;
pub use backoff::{backoff_for_attempt, Backoff, ConnectAttempts, BACKOFFS};
pub use config::Config;
pub use endpoint::Endpoint;
pub use errors::{CollectorError, ConfigError, TransportError, TransportErrorKind};
pub use harvest::{Aggregator, HarvestHandle, HarvestOutcome, Harvester};
pub use http::HttpTransport;
pub use method::{Method, TelemetryKind};
pub use response::{classify, AgentRunBehavior, CollectorResponse, ResponseKind};
pub use security::{apply_security_policies, RecordSql};
pub use session::SessionState;
pub use transport::{RawResponse, RemoteRequest, Transport};

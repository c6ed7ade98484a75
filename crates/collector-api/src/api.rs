// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector API facade.
//!
//! [`CollectorApi`] owns the session with the collector. It drives the
//! connect loop with its backoff schedule, sends harvested telemetry under
//! the current run, and reacts to what each response asks of the agent run:
//! keep going, restart under a new run, or stop for good.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::agent::AgentHooks;
use crate::backoff::ConnectAttempts;
use crate::config::Config;
use crate::errors::CollectorError;
use crate::method::{Method, MethodTable, TelemetryKind};
use crate::negotiator::{login, LoginOutcome};
use crate::response::{classify, is_unexpected_status, AgentRunBehavior, CollectorResponse};
use crate::session::{SessionContext, SessionState};
use crate::transport::Transport;

const LICENSE_KEY_STATUS: u16 = 401;
const DISCONNECT_STATUS: u16 = 410;

/// State shared by every clone of a [`CollectorApi`].
pub(crate) struct ApiShared {
    pub(crate) config: RwLock<Config>,
    pub(crate) methods: MethodTable,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) hooks: Arc<dyn AgentHooks>,
    pub(crate) session: SessionContext,
    /// Held for the duration of a connect or restart so only one runs at a time.
    lifecycle: Mutex<()>,
    connect_attempts: AtomicU64,
    cancel: CancellationToken,
    /// Child of `cancel` for the connect cycle in progress; `shutdown` aborts it.
    connect_cycle: std::sync::Mutex<CancellationToken>,
}

impl std::fmt::Debug for ApiShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiShared")
            .field("methods", &self.methods)
            .field("session", &self.session)
            .finish()
    }
}

impl ApiShared {
    pub(crate) fn config_snapshot(&self) -> Config {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update_config<T>(&self, update: impl FnOnce(&mut Config) -> T) -> T {
        let mut guard = match self.config.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut guard)
    }

    fn start_connect_cycle(&self) -> CancellationToken {
        let cycle = self.cancel.child_token();
        let mut guard = match self.connect_cycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = cycle.clone();
        cycle
    }

    fn abort_connect_cycle(&self) {
        let guard = match self.connect_cycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.cancel();
    }
}

#[derive(Debug, Clone)]
pub struct CollectorApi {
    shared: Arc<ApiShared>,
}

impl CollectorApi {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        hooks: Arc<dyn AgentHooks>,
    ) -> Self {
        Self::with_cancellation(config, transport, hooks, CancellationToken::new())
    }

    /// Builds the API with a token that, once cancelled, abandons any pending
    /// connect retry instead of waiting out its backoff.
    pub fn with_cancellation(
        config: Config,
        transport: Arc<dyn Transport>,
        hooks: Arc<dyn AgentHooks>,
        cancel: CancellationToken,
    ) -> Self {
        let methods = MethodTable::new(config.endpoint());
        Self {
            shared: Arc::new(ApiShared {
                config: RwLock::new(config),
                methods,
                transport,
                hooks,
                session: SessionContext::new(),
                lifecycle: Mutex::new(()),
                connect_attempts: AtomicU64::new(0),
                connect_cycle: std::sync::Mutex::new(cancel.child_token()),
                cancel,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session.is_connected()
    }

    pub fn state(&self) -> SessionState {
        self.shared.session.state()
    }

    pub fn run_id(&self) -> Option<String> {
        self.shared.session.run_id()
    }

    /// Current configuration, including any tightening applied by security policies.
    pub fn config(&self) -> Config {
        self.shared.config_snapshot()
    }

    /// Total handshake attempts made over the life of this API.
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Endpoint the given method is currently sent to.
    pub fn endpoint(&self, method: Method) -> crate::endpoint::Endpoint {
        self.shared.methods.get(method).endpoint()
    }

    /// Connects to the collector, retrying on the backoff schedule until a run
    /// is granted or the collector rejects the agent for good.
    ///
    /// Returns a success response carrying the connect payload, or a fatal
    /// response when the agent must shut down. Fails with
    /// [`CollectorError::NegotiationInProgress`] if a connect or restart is
    /// already running.
    pub async fn connect(&self) -> Result<CollectorResponse, CollectorError> {
        let Ok(_guard) = self.shared.lifecycle.try_lock() else {
            return Err(CollectorError::NegotiationInProgress);
        };
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<CollectorResponse, CollectorError> {
        trace!("Starting collector.");
        if !self.shared.session.begin_connecting() {
            return Err(CollectorError::Terminated);
        }

        let cycle = self.shared.start_connect_cycle();
        let mut attempts = ConnectAttempts::new();
        let mut errors: Vec<CollectorError> = Vec::new();

        loop {
            self.shared.connect_attempts.fetch_add(1, Ordering::Relaxed);

            let rejection = match login(&self.shared).await {
                Ok(LoginOutcome::Connected(response)) => {
                    if cycle.is_cancelled() {
                        debug!("Connect aborted while the handshake was in flight.");
                        self.shared.session.disconnect();
                        return Err(CollectorError::Cancelled);
                    }
                    dump_errors(&errors, "connect");
                    return Ok(response);
                }
                Ok(LoginOutcome::Rejected(response)) => Some(response),
                Err(err) => {
                    if self.is_proxy_misconfigured(&err) {
                        warn!(
                            "Your proxy server appears to be configured to accept connections \
                             over http. When setting `proxy_host` and `proxy_port` the agent \
                             attempts to connect over SSL(https). If your proxy is configured \
                             to accept connections over http, try setting `proxy` to a fully \
                             qualified URL (e.g http://proxy-host:8080). Error: {err}"
                        );
                    }
                    errors.push(err);
                    None
                }
            };

            if let Some(response) = &rejection {
                if response.status == Some(DISCONNECT_STATUS) || response.should_shutdown_run() {
                    error!("The collector rejected this agent.");
                    self.shared.session.terminate();
                    return Ok(CollectorResponse::fatal(response.payload.clone()));
                }
                if response.status == Some(LICENSE_KEY_STATUS) {
                    warn!(
                        "Your license key appears to be invalid. Reattempting connection. \
                         (status code {LICENSE_KEY_STATUS})"
                    );
                }
            }

            let attempt = attempts.current();
            let backoff = attempts.register_failure();
            if backoff.warn {
                warn!(
                    "No connection has been established to the collector after {attempt} attempts."
                );
            }
            debug!(
                attempt,
                status = ?rejection.as_ref().and_then(|r| r.status),
                error = ?errors.last().map(ToString::to_string),
                "Failed to connect to the collector after attempt {attempt}, waiting {}s to retry.",
                backoff.interval_secs
            );

            tokio::select! {
                () = cycle.cancelled() => {
                    debug!("Connect retry cancelled.");
                    self.shared.session.disconnect();
                    return Err(CollectorError::Cancelled);
                }
                () = tokio::time::sleep(backoff.interval()) => {}
            }
        }
    }

    fn is_proxy_misconfigured(&self, err: &CollectorError) -> bool {
        match err {
            CollectorError::Transport(transport) => {
                transport.is_protocol_mismatch()
                    && self.shared.config_snapshot().uses_split_proxy_settings()
            }
            _ => false,
        }
    }

    /// Pushes the agent's public settings. Failures are logged and returned,
    /// never treated as fatal.
    pub async fn report_settings(&self) -> Result<CollectorResponse, CollectorError> {
        let session = self.shared.session.snapshot();
        let settings = self.shared.config_snapshot().public_settings();
        let result = self
            .shared
            .methods
            .get(Method::AgentSettings)
            .invoke(
                self.shared.transport.as_ref(),
                session.run_id,
                json!([settings]),
                session.request_headers,
            )
            .await;

        match result {
            Ok(raw) => Ok(classify(raw.status, raw.payload)),
            Err(err) => {
                let err = CollectorError::from(err);
                dump_errors(std::slice::from_ref(&err), Method::AgentSettings.name());
                Err(err)
            }
        }
    }

    /// Sends already-encoded telemetry of the given kind under the current run.
    ///
    /// Any error means the caller keeps the data for the next harvest. A
    /// response's `retain_data` says the same for responses that did arrive.
    /// A restart requested by the collector has completed (or failed, in
    /// which case [`CollectorError::RestartFailed`] is returned) by the time
    /// this resolves. A shutdown behavior ends the run here but stopping the
    /// agent is left to the caller.
    pub async fn send(
        &self,
        kind: TelemetryKind,
        data: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        let method = kind.method();
        let Some(session) = self.shared.session.connected_snapshot() else {
            warn!(method = method.name(), "Not connected to the collector. Not calling.");
            return Err(CollectorError::NotConnected);
        };

        let raw = self
            .shared
            .methods
            .get(method)
            .invoke(
                self.shared.transport.as_ref(),
                session.run_id.clone(),
                data,
                session.request_headers,
            )
            .await?;

        let response = classify(raw.status, raw.payload);
        log_response(method, &response);

        match response.behavior {
            AgentRunBehavior::Keep => {}
            AgentRunBehavior::Shutdown => {
                if let Some(run_id) = self.shared.session.terminate() {
                    info!("Collector ended run {run_id}; no further data will be sent.");
                }
            }
            AgentRunBehavior::Restart => {
                if let Err(err) = self.restart_from(session.generation).await {
                    warn!("Failed to restart agent run: {err}");
                    return Err(CollectorError::RestartFailed(err.to_string()));
                }
                trace!("Restart succeeded.");
            }
        }
        Ok(response)
    }

    pub async fn error_data(&self, errors: Value) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::Errors, errors).await
    }

    pub async fn metric_data(&self, metrics: Value) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::Metrics, metrics).await
    }

    pub async fn transaction_sample_data(
        &self,
        traces: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::Traces, traces).await
    }

    pub async fn analytic_event_data(
        &self,
        events: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::Events, events).await
    }

    pub async fn custom_event_data(
        &self,
        events: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::CustomEvents, events).await
    }

    pub async fn sql_trace_data(
        &self,
        queries: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::Queries, queries).await
    }

    pub async fn error_event_data(
        &self,
        events: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::ErrorEvents, events).await
    }

    pub async fn span_event_data(
        &self,
        spans: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::SpanEvents, spans).await
    }

    pub async fn log_event_data(
        &self,
        log_records: Value,
    ) -> Result<CollectorResponse, CollectorError> {
        self.send(TelemetryKind::LogEvents, log_records).await
    }

    /// Sends the shutdown notice and clears the run id.
    ///
    /// A connect cycle running concurrently is aborted and resolves to
    /// [`CollectorError::Cancelled`] instead of establishing a new run. The
    /// notice is best effort: failures are logged. The run is cleared and a
    /// fatal response returned whatever the outcome.
    pub async fn shutdown(&self) -> CollectorResponse {
        info!("Shutting down collector.");
        self.shared.abort_connect_cycle();
        let session = self.shared.session.snapshot();
        let result = self
            .shared
            .methods
            .get(Method::Shutdown)
            .invoke(
                self.shared.transport.as_ref(),
                session.run_id,
                Value::Null,
                session.request_headers,
            )
            .await;

        let payload = match result {
            Ok(raw) => {
                let response = classify(raw.status, raw.payload);
                if !response.is_success() {
                    log_response(Method::Shutdown, &response);
                }
                response.payload
            }
            Err(err) => {
                dump_errors(&[CollectorError::from(err)], Method::Shutdown.name());
                None
            }
        };

        let cleared = self.shared.session.disconnect();
        info!(
            "Disconnected from the collector; clearing run ID {}.",
            cleared.as_deref().unwrap_or("<none>")
        );
        CollectorResponse::fatal(payload)
    }

    /// Stops harvesting, ends the current run, connects under a new one, and
    /// resumes harvesting without an immediate harvest.
    pub async fn restart(&self) -> Result<CollectorResponse, CollectorError> {
        let _guard = self.shared.lifecycle.lock().await;
        self.restart_locked().await
    }

    /// Restarts only if the run observed at `generation` is still current, so
    /// concurrent restart requests from the same run collapse into one.
    async fn restart_from(&self, generation: u64) -> Result<CollectorResponse, CollectorError> {
        let _guard = self.shared.lifecycle.lock().await;
        let session = &self.shared.session;
        if session.state() == SessionState::Terminated {
            return Err(CollectorError::Terminated);
        }
        if session.generation() != generation && session.is_connected() {
            debug!("Run already restarted by another request; skipping restart.");
            return Ok(CollectorResponse::success(None));
        }
        self.restart_locked().await
    }

    async fn restart_locked(&self) -> Result<CollectorResponse, CollectorError> {
        info!("Restarting collector.");
        self.shared.hooks.stop_aggregators().await;
        self.shutdown().await;

        let response = self.connect_locked().await?;
        if !response.is_success() {
            return Err(CollectorError::Terminated);
        }
        self.shared.hooks.on_connect(false).await;
        Ok(response)
    }
}

fn log_response(method: Method, response: &CollectorResponse) {
    if response.is_success() {
        return;
    }
    match response.status {
        Some(status) if is_unexpected_status(status) => {
            error!("Agent endpoint {method} returned unexpected status {status}.");
        }
        Some(status) => {
            error!(
                "Agent endpoint {method} returned {status} status. {}.",
                response.action()
            );
        }
        None => {}
    }
}

fn dump_errors(errors: &[CollectorError], name: &str) {
    for (index, error) in errors.iter().enumerate() {
        trace!("Error {} during {name}: {error}", index + 1);
    }
}

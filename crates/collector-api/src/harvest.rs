// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic handoff of aggregated telemetry to the collector.
//!
//! Each registered [`Aggregator`] is drained once per cycle and its payload
//! sent under the current run. Data comes back to the aggregator whenever the
//! send fails or the collector asks for it to be kept.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::CollectorApi;
use crate::method::TelemetryKind;
use crate::session::SessionState;

/// A buffer of one telemetry kind.
pub trait Aggregator: Send + Sync {
    fn kind(&self) -> TelemetryKind;

    /// Drains the buffer into a wire payload for `run_id`. `None` when empty.
    fn take_payload(&self, run_id: &str) -> Option<Value>;

    /// Puts back a payload that was not accepted.
    fn merge(&self, payload: Value);
}

/// Result of a harvest cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestOutcome {
    Continue,
    /// The run is over; no further cycles should run.
    Shutdown,
}

/// Cloneable switch for pausing harvests, usually held by the agent hooks
/// that the collector API calls around a restart.
#[derive(Debug, Clone, Default)]
pub struct HarvestHandle {
    paused: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl HarvestHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes harvesting. With `immediate_harvest` the next cycle starts now
    /// instead of waiting out the interval.
    pub fn resume(&self, immediate_harvest: bool) {
        self.paused.store(false, Ordering::SeqCst);
        if immediate_harvest {
            self.wake.notify_one();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

pub struct Harvester {
    api: CollectorApi,
    aggregators: Vec<Arc<dyn Aggregator>>,
    handle: HarvestHandle,
}

impl Harvester {
    pub fn new(api: CollectorApi, handle: HarvestHandle) -> Self {
        Self {
            api,
            aggregators: Vec::new(),
            handle,
        }
    }

    pub fn register(&mut self, aggregator: Arc<dyn Aggregator>) {
        self.aggregators.push(aggregator);
    }

    pub fn handle(&self) -> HarvestHandle {
        self.handle.clone()
    }

    /// Sends every aggregator's pending payload once.
    pub async fn run_cycle(&self) -> HarvestOutcome {
        for aggregator in &self.aggregators {
            if self.api.state() == SessionState::Terminated {
                return HarvestOutcome::Shutdown;
            }
            if self.handle.is_paused() {
                debug!("Harvest paused; skipping remaining aggregators.");
                return HarvestOutcome::Continue;
            }
            let Some(run_id) = self.api.run_id() else {
                debug!("Not connected; skipping harvest.");
                return HarvestOutcome::Continue;
            };

            let kind = aggregator.kind();
            let Some(payload) = aggregator.take_payload(&run_id) else {
                continue;
            };

            match self.api.send(kind, payload.clone()).await {
                Ok(response) => {
                    if response.retain_data {
                        aggregator.merge(payload);
                    }
                    if response.should_shutdown_run() {
                        info!("Collector ended the run; stopping harvest.");
                        return HarvestOutcome::Shutdown;
                    }
                }
                Err(err) => {
                    warn!(method = kind.method().name(), "Harvest send failed: {err}");
                    aggregator.merge(payload);
                }
            }
        }
        HarvestOutcome::Continue
    }

    /// Runs a cycle every `interval` until `cancel` fires or the run ends.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Harvester cancelled.");
                    return;
                }
                () = tokio::time::sleep(interval) => {}
                () = self.handle.wake.notified() => {}
            }
            if self.run_cycle().await == HarvestOutcome::Shutdown {
                return;
            }
        }
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Hooks into the rest of the agent that the collector API drives during
/// connect and restart.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Environment and system facts sent with the connect handshake.
    async fn gather_facts(&self) -> Map<String, Value>;

    /// Applies the server-side configuration returned by connect.
    fn reconfigure(&self, _server_config: &Value) {}

    /// Stops local aggregation and harvesting ahead of a restart.
    async fn stop_aggregators(&self) {}

    /// Resumes harvesting after a successful (re)connect.
    async fn on_connect(&self, _immediate_harvest: bool) {}
}

/// Hooks that gather no facts and ignore lifecycle notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAgentHooks;

#[async_trait]
impl AgentHooks for NoopAgentHooks {
    async fn gather_facts(&self) -> Map<String, Value> {
        Map::new()
    }
}

// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mapping of collector status codes to agent behavior.

use serde_json::Value;

const SUCCESS: [u16; 2] = [200, 202];
const RESTART: [u16; 2] = [401, 409];
const FAILURE_DISCARD_DATA: [u16; 11] = [400, 403, 404, 405, 407, 411, 413, 414, 415, 417, 431];
const FAILURE_SAVE_DATA: [u16; 4] = [408, 429, 500, 503];
const DISCONNECT: u16 = 410;

/// What the agent run must do after a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentRunBehavior {
    #[default]
    Keep,
    /// Tear down the session and connect again before sending anything else.
    Restart,
    /// The run is over; nothing more may be sent.
    Shutdown,
}

/// Canonical outcome of a single remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Success,
    /// Retry on the next cycle, keeping the data.
    Error,
    Restart,
    /// The payload will never be accepted.
    Discard,
    Fatal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorResponse {
    pub kind: ResponseKind,
    /// Status code that produced this outcome, if one was received.
    pub status: Option<u16>,
    pub payload: Option<Value>,
    pub behavior: AgentRunBehavior,
    pub retain_data: bool,
}

impl CollectorResponse {
    fn new(kind: ResponseKind, payload: Option<Value>) -> Self {
        let (behavior, retain_data) = match kind {
            ResponseKind::Success | ResponseKind::Discard => (AgentRunBehavior::Keep, false),
            ResponseKind::Error => (AgentRunBehavior::Keep, true),
            // Only the session is stale; the payload goes out again under the new run.
            ResponseKind::Restart => (AgentRunBehavior::Restart, true),
            ResponseKind::Fatal => (AgentRunBehavior::Shutdown, false),
        };
        Self {
            kind,
            status: None,
            payload,
            behavior,
            retain_data,
        }
    }

    pub fn success(payload: Option<Value>) -> Self {
        Self::new(ResponseKind::Success, payload)
    }

    pub fn error(payload: Option<Value>) -> Self {
        Self::new(ResponseKind::Error, payload)
    }

    pub fn reconnect(payload: Option<Value>) -> Self {
        Self::new(ResponseKind::Restart, payload)
    }

    pub fn discard(payload: Option<Value>) -> Self {
        Self::new(ResponseKind::Discard, payload)
    }

    pub fn fatal(payload: Option<Value>) -> Self {
        Self::new(ResponseKind::Fatal, payload)
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }

    pub fn should_shutdown_run(&self) -> bool {
        self.behavior == AgentRunBehavior::Shutdown
    }

    /// Short description of what the caller does with its data, for logs.
    pub fn action(&self) -> &'static str {
        match self.kind {
            ResponseKind::Success => "Sent",
            ResponseKind::Error => "Retaining data for next harvest",
            ResponseKind::Restart => "Restarting",
            ResponseKind::Discard => "Discarding harvest data",
            ResponseKind::Fatal => "Disconnecting",
        }
    }
}

pub fn is_success_status(status: u16) -> bool {
    SUCCESS.contains(&status)
}

/// True when `status` is not one of the codes the collector contract defines.
pub fn is_unexpected_status(status: u16) -> bool {
    !(SUCCESS.contains(&status)
        || RESTART.contains(&status)
        || FAILURE_DISCARD_DATA.contains(&status)
        || FAILURE_SAVE_DATA.contains(&status)
        || status == DISCONNECT)
}

/// Classifies a collector response. Unknown codes discard the data.
pub fn classify(status: u16, payload: Option<Value>) -> CollectorResponse {
    let response = if SUCCESS.contains(&status) {
        CollectorResponse::success(payload)
    } else if RESTART.contains(&status) {
        CollectorResponse::reconnect(None)
    } else if FAILURE_DISCARD_DATA.contains(&status) {
        CollectorResponse::discard(None)
    } else if FAILURE_SAVE_DATA.contains(&status) {
        CollectorResponse::error(payload)
    } else if status == DISCONNECT {
        CollectorResponse::fatal(payload)
    } else {
        CollectorResponse::discard(None)
    };
    response.with_status(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn success_preserves_payload() {
        for status in SUCCESS {
            let payload = json!({"agent_run_id": "abc", "nested": [1, 2, 3]});
            let response = classify(status, Some(payload.clone()));
            assert_eq!(response.kind, ResponseKind::Success);
            assert_eq!(response.payload, Some(payload));
            assert_eq!(response.behavior, AgentRunBehavior::Keep);
            assert!(!response.retain_data);
            assert_eq!(response.status, Some(status));
        }
    }

    #[test]
    fn restart_codes() {
        for status in RESTART {
            let response = classify(status, None);
            assert_eq!(response.kind, ResponseKind::Restart);
            assert_eq!(response.behavior, AgentRunBehavior::Restart);
            assert!(response.retain_data, "{status}");
        }
    }

    #[test]
    fn gone_is_fatal() {
        let response = classify(410, Some(json!({"message": "bye"})));
        assert_eq!(response.kind, ResponseKind::Fatal);
        assert_eq!(response.behavior, AgentRunBehavior::Shutdown);
        assert!(response.should_shutdown_run());
        assert_eq!(response.payload, Some(json!({"message": "bye"})));
    }

    #[test]
    fn discard_codes_drop_data() {
        for status in FAILURE_DISCARD_DATA {
            let response = classify(status, None);
            assert_eq!(response.kind, ResponseKind::Discard, "{status}");
            assert!(!response.retain_data);
            assert_eq!(response.behavior, AgentRunBehavior::Keep);
        }
    }

    #[test]
    fn retry_codes_keep_data() {
        for status in FAILURE_SAVE_DATA {
            let response = classify(status, None);
            assert_eq!(response.kind, ResponseKind::Error, "{status}");
            assert!(response.retain_data);
            assert_eq!(response.behavior, AgentRunBehavior::Keep);
        }
    }

    #[test]
    fn unknown_status_discards() {
        let response = classify(499, None);
        assert_eq!(response.kind, ResponseKind::Discard);
        assert!(!response.retain_data);
        assert!(is_unexpected_status(499));
        assert!(!is_unexpected_status(503));
    }

    proptest! {
        #[test]
        fn classification_is_total(status in 100u16..600) {
            let response = classify(status, None);
            prop_assert_eq!(response.status, Some(status));
            if is_unexpected_status(status) {
                prop_assert_eq!(response.kind, ResponseKind::Discard);
            }
            // The retry and restart sets ask the caller to keep data.
            prop_assert_eq!(
                response.retain_data,
                FAILURE_SAVE_DATA.contains(&status) || RESTART.contains(&status)
            );
            // Only 410 ends the run.
            prop_assert_eq!(response.should_shutdown_run(), status == DISCONNECT);
        }
    }
}

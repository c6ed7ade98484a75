// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The preconnect/connect handshake.
//!
//! One call to [`login`] makes a single attempt: preconnect to learn the
//! collector to talk to and the account's security policies, then connect
//! with the agent's facts to obtain a run id. Retrying is left to the
//! connect loop in [`crate::api`].

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::api::ApiShared;
use crate::endpoint::Endpoint;
use crate::errors::CollectorError;
use crate::method::Method;
use crate::response::{classify, is_success_status, CollectorResponse};
use crate::security::apply_security_policies;

/// Result of one handshake attempt that got responses back.
#[derive(Debug)]
pub(crate) enum LoginOutcome {
    /// A run was granted; carries the connect payload.
    Connected(CollectorResponse),
    /// The collector or local policy validation refused the attempt.
    Rejected(CollectorResponse),
}

pub(crate) async fn login(shared: &ApiShared) -> Result<LoginOutcome, CollectorError> {
    let preconnect_data = {
        let config = shared.config_snapshot();
        let mut data = Map::new();
        data.insert("high_security".to_string(), json!(config.high_security));
        if let Some(token) = &config.security_policies_token {
            data.insert("security_policies_token".to_string(), json!(token));
        }
        Value::Array(vec![Value::Object(data)])
    };

    let response = shared
        .methods
        .get(Method::Preconnect)
        .invoke(shared.transport.as_ref(), None, preconnect_data, None)
        .await?;
    if !is_success_status(response.status) {
        return Ok(LoginOutcome::Rejected(classify(
            response.status,
            response.payload,
        )));
    }

    let reply = match response.payload {
        Some(Value::Object(reply)) => reply,
        _ => Map::new(),
    };
    apply_redirect(shared, reply.get("redirect_host").and_then(Value::as_str));

    let policies = match reply.get("security_policies") {
        Some(Value::Object(policies)) => policies.clone(),
        _ => Map::new(),
    };
    let lasp = shared.update_config(|config| apply_security_policies(config, &policies));
    if lasp.should_shutdown_run() {
        return Ok(LoginOutcome::Rejected(lasp));
    }

    let environment = gather_facts(shared, lasp.payload).await;
    connect(shared, environment).await
}

fn apply_redirect(shared: &ApiShared, redirect_host: Option<&str>) {
    let configured_host = shared.config_snapshot().host;
    let Some(redirect_host) = redirect_host.filter(|host| !host.is_empty()) else {
        error!(
            "Requesting this account's collector from {configured_host} failed; trying default."
        );
        return;
    };

    match Endpoint::from_redirect_host(redirect_host) {
        Some(endpoint) => {
            debug!(
                "Requesting this account's collector from {configured_host} returned \
                 {redirect_host}; reconfiguring."
            );
            shared.methods.update_endpoints(endpoint);
        }
        None => {
            error!(
                "Requesting collector from {configured_host} returned bogus result \
                 '{redirect_host}'; trying default."
            );
        }
    }
}

/// Facts wrapped in the single-element array the collector expects.
async fn gather_facts(shared: &ApiShared, policies: Option<Value>) -> Value {
    let mut facts = shared.hooks.gather_facts().await;
    if let Some(policies) = policies {
        facts.insert("security_policies".to_string(), policies);
    }
    Value::Array(vec![Value::Object(facts)])
}

async fn connect(shared: &ApiShared, environment: Value) -> Result<LoginOutcome, CollectorError> {
    let connect = shared.methods.get(Method::Connect);
    let response = connect
        .invoke(shared.transport.as_ref(), None, environment, None)
        .await?;
    if !is_success_status(response.status) {
        return Ok(LoginOutcome::Rejected(classify(
            response.status,
            response.payload,
        )));
    }

    let payload = response.payload.unwrap_or(Value::Null);
    let Some(run_id) = granted_run_id(&payload) else {
        return Err(CollectorError::MissingRunId);
    };

    let endpoint = connect.endpoint();
    info!(
        run_id = %run_id,
        "Connected to {}:{} with agent run ID {}.",
        endpoint.host,
        endpoint.port,
        run_id
    );
    for message in server_messages(&payload) {
        info!("{message}");
    }

    shared.session.establish(run_id, request_headers(&payload));
    shared.hooks.reconfigure(&payload);

    Ok(LoginOutcome::Connected(classify(
        response.status,
        Some(payload),
    )))
}

// The connect reply is read field by field: once a run id is granted, a
// malformed optional field must not turn the reply into a failed attempt.

fn granted_run_id(reply: &Value) -> Option<String> {
    match reply.get("agent_run_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn request_headers(reply: &Value) -> Option<HashMap<String, String>> {
    let headers = reply.get("request_headers_map")?.as_object()?;
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Value::String(value) => value.clone(),
                Value::Number(_) | Value::Bool(_) => value.to_string(),
                _ => {
                    debug!("Ignoring request header {name} with a non-scalar value");
                    return None;
                }
            };
            Some((name.clone(), value))
        })
        .collect();
    Some(headers)
}

fn server_messages(reply: &Value) -> impl Iterator<Item = &str> {
    reply
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|message| message.get("message").and_then(Value::as_str))
        .filter(|message| !message.is_empty())
}

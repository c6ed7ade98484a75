// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Validation of server-issued security policies.
//!
//! Accounts with language agent security policies send a policy map during
//! preconnect. Every policy the agent knows about is applied by keeping the
//! more restrictive of the local and server values; anything the agent
//! cannot honor ends the run before connect is attempted.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::config::Config;
use crate::response::CollectorResponse;

/// How SQL is recorded in traces, from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordSql {
    Off,
    Obfuscated,
    Raw,
}

impl RecordSql {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordSql::Off => "off",
            RecordSql::Obfuscated => "obfuscated",
            RecordSql::Raw => "raw",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ServerPolicy {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownPolicy {
    RecordSql,
    AttributesInclude,
    AllowRawExceptionMessages,
    CustomEvents,
    CustomParameters,
}

impl KnownPolicy {
    const ALL: [KnownPolicy; 5] = [
        KnownPolicy::RecordSql,
        KnownPolicy::AttributesInclude,
        KnownPolicy::AllowRawExceptionMessages,
        KnownPolicy::CustomEvents,
        KnownPolicy::CustomParameters,
    ];

    fn name(self) -> &'static str {
        match self {
            KnownPolicy::RecordSql => "record_sql",
            KnownPolicy::AttributesInclude => "attributes_include",
            KnownPolicy::AllowRawExceptionMessages => "allow_raw_exception_messages",
            KnownPolicy::CustomEvents => "custom_events",
            KnownPolicy::CustomParameters => "custom_parameters",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|policy| policy.name() == name)
    }

    /// Local setting as a level where 0 is the most restrictive.
    fn local_level(self, config: &Config) -> u8 {
        match self {
            KnownPolicy::RecordSql => config.record_sql as u8,
            KnownPolicy::AttributesInclude => u8::from(config.attributes_include_enabled),
            KnownPolicy::AllowRawExceptionMessages => {
                u8::from(config.allow_raw_exception_messages)
            }
            KnownPolicy::CustomEvents => u8::from(config.custom_events_enabled),
            KnownPolicy::CustomParameters => u8::from(config.custom_parameters_enabled),
        }
    }

    fn set_level(self, config: &mut Config, level: u8) {
        match self {
            KnownPolicy::RecordSql => {
                config.record_sql = match level {
                    0 => RecordSql::Off,
                    1 => RecordSql::Obfuscated,
                    _ => RecordSql::Raw,
                }
            }
            KnownPolicy::AttributesInclude => config.attributes_include_enabled = level > 0,
            KnownPolicy::AllowRawExceptionMessages => {
                config.allow_raw_exception_messages = level > 0
            }
            KnownPolicy::CustomEvents => config.custom_events_enabled = level > 0,
            KnownPolicy::CustomParameters => config.custom_parameters_enabled = level > 0,
        }
    }
}

/// Applies the server's security policies to `config`.
///
/// Returns a success response carrying the policy map to report on connect
/// (or no payload when the account has no policies), or a fatal response
/// when the run must not continue.
pub fn apply_security_policies(
    config: &mut Config,
    policies: &Map<String, Value>,
) -> CollectorResponse {
    if config.security_policies_token.is_none() {
        if !policies.is_empty() {
            error!(
                "The agent received one or more security policies without a \
                 security_policies_token defined in the agent config."
            );
            return CollectorResponse::fatal(None);
        }
        return CollectorResponse::success(None);
    }

    let mut missing_required = Vec::new();
    let mut final_policies = Map::new();

    for (name, raw) in policies {
        let policy = match ServerPolicy::deserialize(raw) {
            Ok(policy) => policy,
            Err(err) => {
                debug!("Ignoring malformed security policy {name}: {err}");
                ServerPolicy {
                    enabled: false,
                    required: false,
                }
            }
        };

        let Some(known) = KnownPolicy::from_name(name) else {
            if policy.required {
                missing_required.push(name.clone());
            } else {
                final_policies.insert(name.clone(), json!({"enabled": false, "required": false}));
            }
            continue;
        };

        let local = known.local_level(config);
        let server = u8::from(policy.enabled);
        let level = local.min(server);
        if level != local {
            debug!("Security policy {name} lowered local setting from {local} to {level}");
            known.set_level(config, level);
        }
        final_policies.insert(
            name.clone(),
            json!({"enabled": level > 0, "required": policy.required}),
        );
    }

    let missing_known = KnownPolicy::ALL
        .into_iter()
        .filter(|known| !policies.contains_key(known.name()))
        .map(KnownPolicy::name)
        .collect::<Vec<_>>();

    if !missing_known.is_empty() {
        error!(
            "The agent did not receive one or more security policies that it expected \
             and will shut down: {}.",
            missing_known.join(", ")
        );
        return CollectorResponse::fatal(None);
    }

    if !missing_required.is_empty() {
        error!(
            "The agent received one or more required security policies that it does not \
             recognize and will shut down: {}.",
            missing_required.join(", ")
        );
        return CollectorResponse::fatal(None);
    }

    CollectorResponse::success(Some(Value::Object(final_policies)))
}

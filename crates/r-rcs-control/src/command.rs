//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Command context and aggregated command responses."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use r_rcs_fsm::{Command, FsmError};

use crate::ControlError;

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Caller-supplied context accompanying one command dispatch: per-application
/// payload overrides and the whole-dispatch deadline.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Payload overrides keyed by application name. Entries here win over
    /// the payloads declared in the subsystem configuration.
    pub payloads: IndexMap<String, Value>,
    /// Deadline for the whole dispatch, measured from dispatch start.
    pub timeout: Duration,
}

impl Default for CommandContext {
    fn default() -> Self {
        Self {
            payloads: IndexMap::new(),
            timeout: default_command_timeout(),
        }
    }
}

impl CommandContext {
    /// Context with the given deadline and no payload overrides.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Attach a payload override for one application.
    pub fn payload(mut self, node: impl Into<String>, value: Value) -> Self {
        self.payloads.insert(node.into(), value);
        self
    }

    /// The payload addressed to `node`, `Null` when none is set.
    pub fn payload_for(&self, node: &str) -> Value {
        self.payloads.get(node).cloned().unwrap_or(Value::Null)
    }
}

/// Outcome classification carried by responses and failure details.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    /// Every participating child acknowledged successfully.
    Success,
    /// At least one child failed (remote rejection or send error).
    Failed,
    /// The dispatch deadline elapsed with children still outstanding.
    Timeout,
    /// The trigger was illegal from the node's current state.
    InvalidTransition,
    /// The process manager could not launch, or liveness never came up.
    BootFailure,
}

/// Structured detail for one failed child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Name of the failed node.
    pub node: String,
    /// Command that failed.
    pub command: Command,
    /// Failure classification.
    pub code: ErrorCode,
    /// Human-readable cause.
    pub error: String,
}

impl FailureDetail {
    /// Classify a [`ControlError`] raised while driving `node`.
    pub fn from_error(node: impl Into<String>, command: Command, err: &ControlError) -> Self {
        let code = match err {
            ControlError::Timeout { .. } => ErrorCode::Timeout,
            ControlError::Fsm(FsmError::InvalidTransition { .. }) => ErrorCode::InvalidTransition,
            ControlError::BootFailure(_) | ControlError::AlreadyBooted(_) => ErrorCode::BootFailure,
            _ => ErrorCode::Failed,
        };
        Self {
            node: node.into(),
            command,
            code,
            error: err.to_string(),
        }
    }
}

/// Aggregate outcome of one command against one node, produced by every
/// multicommand dispatch and every leaf command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Originating node name.
    pub node: String,
    /// Aggregate classification.
    pub status_code: ErrorCode,
    /// Command this response answers.
    pub command: Command,
    /// Names of children that failed, empty on success.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    /// Structured detail per failed child.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error: Vec<FailureDetail>,
    /// When the response was produced.
    pub issued_at: DateTime<Utc>,
}

impl CommandResponse {
    /// A clean success for `node`.
    pub fn success(node: impl Into<String>, command: Command) -> Self {
        Self {
            node: node.into(),
            status_code: ErrorCode::Success,
            command,
            failed: Vec::new(),
            error: Vec::new(),
            issued_at: Utc::now(),
        }
    }

    /// A failure carrying the given per-child details.
    pub fn failure(
        node: impl Into<String>,
        command: Command,
        status_code: ErrorCode,
        error: Vec<FailureDetail>,
    ) -> Self {
        Self {
            node: node.into(),
            status_code,
            command,
            failed: error.iter().map(|detail| detail.node.clone()).collect(),
            error,
            issued_at: Utc::now(),
        }
    }

    /// Whether the aggregate outcome is a success.
    pub fn is_success(&self) -> bool {
        self.status_code == ErrorCode::Success
    }

    /// One-line rendering used when a response is folded into a parent's
    /// failure detail.
    pub fn summary(&self) -> String {
        if self.is_success() {
            format!("{}: {} ok", self.node, self.command)
        } else if self.failed.is_empty() {
            format!("{}: {} {}", self.node, self.command, self.status_code)
        } else {
            format!(
                "{}: {} {} (failed: {})",
                self.node,
                self.command,
                self.status_code,
                self.failed.join(", ")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_collects_child_names() {
        let detail = FailureDetail {
            node: "app3".to_owned(),
            command: Command::Boot,
            code: ErrorCode::BootFailure,
            error: "liveness check failed".to_owned(),
        };
        let response =
            CommandResponse::failure("daq", Command::Boot, ErrorCode::Failed, vec![detail]);
        assert_eq!(response.failed, vec!["app3".to_owned()]);
        assert!(!response.is_success());
        assert!(response.summary().contains("app3"));
    }

    #[test]
    fn responses_serialize_for_status_consumers() {
        let response = CommandResponse::success("np02", Command::Start);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status_code"], "success");
        assert_eq!(value["command"], "start");
        assert!(value.get("failed").is_none());
    }
}

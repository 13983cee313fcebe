//! ---
//! rcs_section: "03-configuration-logging"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Partition and subsystem configuration model."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use r_rcs_fsm::{default_fsm_config, FsmConfig};

fn default_command_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_listener_port() -> u16 {
    56789
}

/// Errors raised while loading a partition description.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("unable to read configuration {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid JSON or fails the schema.
    #[error("invalid partition configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where and how one application is launched by the process manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLaunchConfig {
    /// Host the application process runs on.
    pub host: String,
    /// Command/response port the application listens on.
    pub port: u16,
}

/// One named group of applications managed together, with its own process
/// manager and response listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemConfig {
    /// Applications launched at boot, in declaration order.
    #[serde(default)]
    pub applications: IndexMap<String, AppLaunchConfig>,
    /// Port the subsystem's response listener binds for inbound acks.
    #[serde(default = "default_listener_port")]
    pub response_listener_port: u16,
    /// State-machine description applied to the subsystem and its children.
    #[serde(default = "default_fsm_config")]
    pub fsm: FsmConfig,
    /// Per-command, per-application payload data handed to the remote side.
    /// Outer key: command name; inner key: application name.
    #[serde(default)]
    pub command_payloads: IndexMap<String, IndexMap<String, serde_json::Value>>,
}

impl SubsystemConfig {
    /// The configured payload for `command` addressed to `application`,
    /// `Null` when none is declared.
    pub fn payload_for(&self, command: &str, application: &str) -> serde_json::Value {
        self.command_payloads
            .get(command)
            .and_then(|per_app| per_app.get(application))
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

/// The whole managed partition: every subsystem under one top node.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Partition name, used as the top node's name.
    pub name: String,
    /// Subsystems in declaration order.
    #[serde(default)]
    pub subsystems: IndexMap<String, SubsystemConfig>,
    /// Default deadline applied to multicommand dispatches.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// State-machine description for the top node itself.
    #[serde(default = "default_fsm_config")]
    pub fsm: FsmConfig,
}

impl PartitionConfig {
    /// Parse a partition description from a JSON string.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load a partition description from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

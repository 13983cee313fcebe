//! ---
//! rcs_section: "02-state-machines"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Configuration-driven finite-state-machine engine."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Finite-state-machine engine used by every R-RCS control node.
//!
//! The engine is deliberately tree-agnostic: it knows nothing about
//! partitions, subsystems, or applications. Nodes own an [`Fsm`] instance
//! compiled from an [`FsmConfig`] and drive it through [`Trigger`]s; the
//! hook bodies that perform remote work live with the node kinds, not here.

mod config;
mod engine;

pub use config::{default_fsm_config, FsmConfig, TransitionConfig};
pub use engine::{Fsm, FsmDefinition, ERROR_STATE, INITIAL_STATE, WILDCARD_SOURCE};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of lifecycle commands accepted by control nodes.
///
/// Trigger strings found in a state-machine configuration must resolve to
/// one of these variants (or a derived `end_*` / `to_error` / `recover`
/// form); anything else is rejected at construction time.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    /// Launch the configured application set.
    Boot,
    /// Push configuration to running applications.
    Configure,
    /// Begin data taking.
    Start,
    /// End data taking.
    Stop,
    /// Drop configuration, returning to the booted state.
    Scrap,
    /// Tear the node (and its processes) down.
    Terminate,
}

/// A resolved trigger: either a lifecycle command, its completion marker,
/// or one of the two bookkeeping transitions shared by all nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Start a command transition (`booted -> configuring`, ...).
    Command(Command),
    /// Complete a command transition (`configuring -> configured`, ...).
    EndCommand(Command),
    /// Route the node to the designated error state.
    ToError,
    /// Explicit recovery out of the error state.
    Recover,
}

impl Trigger {
    /// Resolve a configured trigger name into the closed trigger set.
    pub fn parse(name: &str) -> Result<Self, FsmError> {
        match name {
            "to_error" => Ok(Trigger::ToError),
            "recover" => Ok(Trigger::Recover),
            other => {
                if let Some(stripped) = other.strip_prefix("end_") {
                    let command = Command::from_str(stripped)
                        .map_err(|_| FsmError::UnknownTrigger(other.to_owned()))?;
                    Ok(Trigger::EndCommand(command))
                } else {
                    let command = Command::from_str(other)
                        .map_err(|_| FsmError::UnknownTrigger(other.to_owned()))?;
                    Ok(Trigger::Command(command))
                }
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Command(command) => write!(f, "{command}"),
            Trigger::EndCommand(command) => write!(f, "end_{command}"),
            Trigger::ToError => write!(f, "to_error"),
            Trigger::Recover => write!(f, "recover"),
        }
    }
}

/// Errors raised while compiling or driving a state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsmError {
    /// The trigger is not legal from the node's current state. The fire is
    /// rejected before any mutation; the machine state is unchanged.
    #[error("trigger `{trigger}` is not legal from state `{state}`")]
    InvalidTransition {
        /// Trigger that was fired.
        trigger: String,
        /// State the machine was (and still is) in.
        state: String,
    },
    /// A configured trigger name does not resolve to the closed command set.
    #[error("unknown trigger `{0}` in state-machine configuration")]
    UnknownTrigger(String),
    /// A configured command-order key does not resolve to a known command.
    #[error("unknown command `{0}` in command_order configuration")]
    UnknownCommand(String),
    /// A transition references a state missing from the `states` list.
    #[error("transition `{trigger}` references unknown state `{state}`")]
    UnknownState {
        /// Trigger whose source/destination is at fault.
        trigger: String,
        /// The unknown state name.
        state: String,
    },
    /// The configuration is missing one of the designated states.
    #[error("state-machine configuration is missing required state `{0}`")]
    MissingState(&'static str),
    /// The same trigger appears in more than one transition.
    #[error("trigger `{0}` is configured more than once")]
    DuplicateTrigger(String),
}

//! ---
//! rcs_section: "02-state-machines"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Serde configuration format for node state machines."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One configured transition: a trigger, its legal source states, and the
/// destination state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Trigger name (`boot`, `end_boot`, `to_error`, `recover`, ...).
    pub trigger: String,
    /// States the trigger may fire from. `"*"` matches every state.
    pub source: Vec<String>,
    /// State the machine moves to when the trigger fires.
    pub dest: String,
}

impl TransitionConfig {
    /// Convenience constructor used by the stock lifecycle graph.
    pub fn new(trigger: &str, source: &[&str], dest: &str) -> Self {
        Self {
            trigger: trigger.to_owned(),
            source: source.iter().map(|s| (*s).to_owned()).collect(),
            dest: dest.to_owned(),
        }
    }
}

/// Declarative state-machine description consumed at node construction.
///
/// The optional `command_order` entries select ordered dispatch for that
/// command: children are driven strictly one at a time in the listed
/// sequence instead of the default unordered fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmConfig {
    /// All state names, including the designated `none` and `error` states.
    pub states: Vec<String>,
    /// The transition table.
    pub transitions: Vec<TransitionConfig>,
    /// Optional per-command child sequences selecting ordered dispatch.
    #[serde(default)]
    pub command_order: IndexMap<String, Vec<String>>,
}

/// The stock run-control lifecycle graph shared by every node kind.
///
/// ```text
/// none -> booting -> booted -> configuring -> configured -> starting -> running
///   running -> stopping -> configured -> scrapping -> booted
///   any -> terminating -> none        any -> error -> (recover) -> none
/// ```
pub fn default_fsm_config() -> FsmConfig {
    FsmConfig {
        states: [
            "none",
            "booting",
            "booted",
            "configuring",
            "configured",
            "starting",
            "running",
            "stopping",
            "scrapping",
            "terminating",
            "error",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect(),
        transitions: vec![
            TransitionConfig::new("boot", &["none"], "booting"),
            TransitionConfig::new("end_boot", &["booting"], "booted"),
            TransitionConfig::new("configure", &["booted"], "configuring"),
            TransitionConfig::new("end_configure", &["configuring"], "configured"),
            TransitionConfig::new("start", &["configured"], "starting"),
            TransitionConfig::new("end_start", &["starting"], "running"),
            TransitionConfig::new("stop", &["running"], "stopping"),
            TransitionConfig::new("end_stop", &["stopping"], "configured"),
            TransitionConfig::new("scrap", &["configured"], "scrapping"),
            TransitionConfig::new("end_scrap", &["scrapping"], "booted"),
            TransitionConfig::new("terminate", &["*"], "terminating"),
            TransitionConfig::new("end_terminate", &["terminating"], "none"),
            TransitionConfig::new("to_error", &["*"], "error"),
            TransitionConfig::new("recover", &["error"], "none"),
        ],
        command_order: IndexMap::new(),
    }
}

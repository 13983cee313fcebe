//! ---
//! rcs_section: "02-state-machines"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Compiled state-machine definition and per-node instance."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::config::{default_fsm_config, FsmConfig};
use crate::{Command, FsmError, Trigger};

/// Designated initial state every machine starts in.
pub const INITIAL_STATE: &str = "none";
/// Designated error state reached through the `to_error` trigger.
pub const ERROR_STATE: &str = "error";
/// Source entry matching every state.
pub const WILDCARD_SOURCE: &str = "*";

#[derive(Debug, Clone)]
struct CompiledTransition {
    source: HashSet<String>,
    wildcard: bool,
    dest: String,
}

impl CompiledTransition {
    fn accepts(&self, state: &str) -> bool {
        self.wildcard || self.source.contains(state)
    }
}

/// A validated, immutable state-machine definition shared (via `Arc`)
/// between every node instantiated from the same configuration.
#[derive(Debug)]
pub struct FsmDefinition {
    states: Vec<String>,
    transitions: HashMap<Trigger, CompiledTransition>,
    command_order: IndexMap<Command, Vec<String>>,
}

impl FsmDefinition {
    /// Compile a configuration, validating every trigger and state name.
    ///
    /// The `to_error` transition is injected (wildcard source, destination
    /// [`ERROR_STATE`]) when the configuration omits it: every node must be
    /// routable to error regardless of where it currently sits.
    pub fn from_config(config: &FsmConfig) -> Result<Self, FsmError> {
        let states: Vec<String> = config.states.clone();
        let known: HashSet<&str> = states.iter().map(String::as_str).collect();
        if !known.contains(INITIAL_STATE) {
            return Err(FsmError::MissingState(INITIAL_STATE));
        }
        if !known.contains(ERROR_STATE) {
            return Err(FsmError::MissingState(ERROR_STATE));
        }

        let mut transitions: HashMap<Trigger, CompiledTransition> = HashMap::new();
        for entry in &config.transitions {
            let trigger = Trigger::parse(&entry.trigger)?;
            if transitions.contains_key(&trigger) {
                return Err(FsmError::DuplicateTrigger(entry.trigger.clone()));
            }
            if !known.contains(entry.dest.as_str()) {
                return Err(FsmError::UnknownState {
                    trigger: entry.trigger.clone(),
                    state: entry.dest.clone(),
                });
            }
            let wildcard = entry.source.iter().any(|s| s == WILDCARD_SOURCE);
            let mut source = HashSet::new();
            for state in &entry.source {
                if state == WILDCARD_SOURCE {
                    continue;
                }
                if !known.contains(state.as_str()) {
                    return Err(FsmError::UnknownState {
                        trigger: entry.trigger.clone(),
                        state: state.clone(),
                    });
                }
                source.insert(state.clone());
            }
            transitions.insert(
                trigger,
                CompiledTransition {
                    source,
                    wildcard,
                    dest: entry.dest.clone(),
                },
            );
        }

        transitions.entry(Trigger::ToError).or_insert(CompiledTransition {
            source: HashSet::new(),
            wildcard: true,
            dest: ERROR_STATE.to_owned(),
        });

        let mut command_order = IndexMap::new();
        for (name, sequence) in &config.command_order {
            let command = Command::from_str(name)
                .map_err(|_| FsmError::UnknownCommand(name.clone()))?;
            command_order.insert(command, sequence.clone());
        }

        Ok(Self {
            states,
            transitions,
            command_order,
        })
    }

    /// The stock lifecycle definition, shared by nodes without an explicit
    /// state-machine configuration.
    pub fn standard() -> Arc<Self> {
        Arc::new(
            Self::from_config(&default_fsm_config())
                .expect("stock lifecycle configuration is valid"),
        )
    }

    /// All configured state names.
    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// The explicit child sequence configured for `command`, if any.
    /// `Some` selects ordered dispatch for that command.
    pub fn command_order(&self, command: Command) -> Option<&[String]> {
        self.command_order.get(&command).map(Vec::as_slice)
    }

    fn transition(&self, trigger: &Trigger) -> Option<&CompiledTransition> {
        self.transitions.get(trigger)
    }
}

/// A per-node machine instance: the shared definition plus the current state.
#[derive(Debug, Clone)]
pub struct Fsm {
    definition: Arc<FsmDefinition>,
    state: String,
}

impl Fsm {
    /// Create an instance in [`INITIAL_STATE`].
    pub fn new(definition: Arc<FsmDefinition>) -> Self {
        Self {
            definition,
            state: INITIAL_STATE.to_owned(),
        }
    }

    /// The current state name.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// The shared definition backing this instance.
    pub fn definition(&self) -> &Arc<FsmDefinition> {
        &self.definition
    }

    /// Whether `trigger` is legal from the current state.
    pub fn can_fire(&self, trigger: &Trigger) -> bool {
        self.definition
            .transition(trigger)
            .map(|t| t.accepts(&self.state))
            .unwrap_or(false)
    }

    /// Fire a trigger.
    ///
    /// The legality check runs before any mutation: on
    /// [`FsmError::InvalidTransition`] the machine is left exactly as it
    /// was. On success the new state name is returned.
    pub fn fire(&mut self, trigger: &Trigger) -> Result<&str, FsmError> {
        let dest = {
            let Some(transition) = self.definition.transition(trigger) else {
                return Err(FsmError::InvalidTransition {
                    trigger: trigger.to_string(),
                    state: self.state.clone(),
                });
            };
            if !transition.accepts(&self.state) {
                return Err(FsmError::InvalidTransition {
                    trigger: trigger.to_string(),
                    state: self.state.clone(),
                });
            }
            transition.dest.clone()
        };
        trace!(from = %self.state, to = %dest, trigger = %trigger, "fsm transition");
        self.state = dest;
        Ok(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransitionConfig;

    #[test]
    fn unknown_trigger_is_rejected_at_compile_time() {
        let mut config = default_fsm_config();
        config
            .transitions
            .push(TransitionConfig::new("warp", &["none"], "booted"));
        let err = FsmDefinition::from_config(&config).unwrap_err();
        assert_eq!(err, FsmError::UnknownTrigger("warp".to_owned()));
    }

    #[test]
    fn missing_error_state_is_rejected() {
        let config = FsmConfig {
            states: vec!["none".to_owned(), "booted".to_owned()],
            transitions: vec![TransitionConfig::new("boot", &["none"], "booted")],
            command_order: Default::default(),
        };
        let err = FsmDefinition::from_config(&config).unwrap_err();
        assert_eq!(err, FsmError::MissingState(ERROR_STATE));
    }

    #[test]
    fn to_error_is_injected_when_absent() {
        let config = FsmConfig {
            states: vec!["none".to_owned(), "error".to_owned()],
            transitions: Vec::new(),
            command_order: Default::default(),
        };
        let definition = Arc::new(FsmDefinition::from_config(&config).unwrap());
        let mut fsm = Fsm::new(definition);
        assert_eq!(fsm.fire(&Trigger::ToError).unwrap(), ERROR_STATE);
    }

    #[test]
    fn command_order_keys_resolve_to_commands() {
        let mut config = default_fsm_config();
        config
            .command_order
            .insert("stop".to_owned(), vec!["app2".to_owned(), "app1".to_owned()]);
        let definition = FsmDefinition::from_config(&config).unwrap();
        assert_eq!(
            definition.command_order(Command::Stop),
            Some(&["app2".to_owned(), "app1".to_owned()][..])
        );
        assert!(definition.command_order(Command::Start).is_none());

        config
            .command_order
            .insert("reticulate".to_owned(), Vec::new());
        let err = FsmDefinition::from_config(&config).unwrap_err();
        assert_eq!(err, FsmError::UnknownCommand("reticulate".to_owned()));
    }
}

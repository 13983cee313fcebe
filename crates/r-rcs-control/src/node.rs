//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Shared control-node core: identity, flags, and the FSM instance."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::sync::Arc;

use tracing::{debug, error, info};

use r_rcs_fsm::{Fsm, FsmDefinition, FsmError, Trigger};

use crate::command::CommandResponse;

/// State shared by every node kind: identity, the inclusion and sticky
/// error flags, the state-machine instance, and the last recorded response.
///
/// Concrete nodes (application, subsystem, top) keep a `NodeCore` behind a
/// mutex in their shared handle and differ only in the hook bodies they run
/// around transitions.
#[derive(Debug)]
pub struct NodeCore {
    name: String,
    fsm: Fsm,
    errored: bool,
    included: bool,
    last_response: Option<CommandResponse>,
}

impl NodeCore {
    /// Create a core in the initial state, included, not errored.
    pub fn new(name: impl Into<String>, definition: Arc<FsmDefinition>) -> Self {
        Self {
            name: name.into(),
            fsm: Fsm::new(definition),
            errored: false,
            included: true,
            last_response: None,
        }
    }

    /// Node name, unique within its parent's children.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state-machine state.
    pub fn state(&self) -> &str {
        self.fsm.state()
    }

    /// The shared state-machine definition.
    pub fn definition(&self) -> &Arc<FsmDefinition> {
        self.fsm.definition()
    }

    /// Sticky error flag, independent of the current state.
    pub fn errored(&self) -> bool {
        self.errored
    }

    /// Whether this node participates in dispatches.
    pub fn included(&self) -> bool {
        self.included
    }

    /// Toggle dispatch participation. The node's state is left untouched.
    pub fn set_included(&mut self, included: bool) {
        if self.included != included {
            info!(node = %self.name, included, "inclusion changed");
        }
        self.included = included;
    }

    /// Fire a trigger; on [`FsmError::InvalidTransition`] the state is
    /// unchanged and the error propagates to the caller.
    pub fn fire(&mut self, trigger: &Trigger) -> Result<(), FsmError> {
        let state = self.fsm.fire(trigger)?;
        debug!(node = %self.name, state, trigger = %trigger, "transition");
        Ok(())
    }

    /// Whether `trigger` is legal from the current state.
    pub fn can_fire(&self, trigger: &Trigger) -> bool {
        self.fsm.can_fire(trigger)
    }

    /// Route the node to the error state and record the response.
    ///
    /// Idempotent: on an already-errored node the detail is updated but no
    /// further transition fires.
    pub fn to_error(&mut self, response: CommandResponse) {
        error!(
            node = %self.name,
            command = %response.command,
            failed = ?response.failed,
            "node routed to error"
        );
        if !self.errored {
            // wildcard transition, legal from every state
            let _ = self.fsm.fire(&Trigger::ToError);
            self.errored = true;
        }
        self.last_response = Some(response);
    }

    /// Explicit recovery: the only path that clears the error flag.
    pub fn recover(&mut self) -> Result<(), FsmError> {
        self.fire(&Trigger::Recover)?;
        self.errored = false;
        info!(node = %self.name, "recovered from error");
        Ok(())
    }

    /// Record the outcome of the last command without touching flags.
    pub fn record_response(&mut self, response: CommandResponse) {
        self.last_response = Some(response);
    }

    /// The last recorded command response, if any.
    pub fn last_response(&self) -> Option<&CommandResponse> {
        self.last_response.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ErrorCode, FailureDetail};
    use r_rcs_fsm::{Command, ERROR_STATE};

    fn core() -> NodeCore {
        NodeCore::new("node", FsmDefinition::standard())
    }

    fn failure(command: Command) -> CommandResponse {
        CommandResponse::failure(
            "node",
            command,
            ErrorCode::Failed,
            vec![FailureDetail {
                node: "child".to_owned(),
                command,
                code: ErrorCode::Failed,
                error: "remote rejection".to_owned(),
            }],
        )
    }

    #[test]
    fn error_is_sticky_and_idempotent() {
        let mut core = core();
        core.to_error(failure(Command::Configure));
        assert!(core.errored());
        assert_eq!(core.state(), ERROR_STATE);

        // re-entry updates the detail without re-firing
        core.to_error(failure(Command::Start));
        assert!(core.errored());
        assert_eq!(core.state(), ERROR_STATE);
        assert_eq!(
            core.last_response().map(|r| r.command),
            Some(Command::Start)
        );
    }

    #[test]
    fn only_recover_clears_the_flag() {
        let mut core = core();
        core.to_error(failure(Command::Configure));
        // terminate remains legal but does not clear the flag
        core.fire(&Trigger::Command(Command::Terminate)).unwrap();
        assert!(core.errored());
        core.fire(&Trigger::EndCommand(Command::Terminate)).unwrap();
        assert!(core.errored());

        let mut core = core2_errored();
        core.recover().unwrap();
        assert!(!core.errored());
    }

    fn core2_errored() -> NodeCore {
        let mut core = core();
        core.to_error(failure(Command::Configure));
        core
    }

    #[test]
    fn exclusion_leaves_state_untouched() {
        let mut core = core();
        core.fire(&Trigger::Command(Command::Boot)).unwrap();
        core.set_included(false);
        assert_eq!(core.state(), "booting");
        assert!(!core.included());
    }
}

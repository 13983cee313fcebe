//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Read-only recursive status projection of the control tree."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use r_rcs_fsm::Command;

/// Extra fields exposed for application leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    /// Process-manager liveness view (`alive`, `dead[code]`, ...).
    pub process_state: String,
    /// Whether the application answered the reachability probe.
    pub ping: bool,
    /// Host the process runs on.
    pub host: String,
    /// Last command handed to the transport.
    pub last_sent_command: Option<Command>,
    /// Last command acknowledged successfully.
    pub last_ok_command: Option<Command>,
    /// Whether the most recent command has not (yet) been acknowledged ok.
    pub last_cmd_failed: bool,
}

/// One node of the read-only status snapshot consumed by CLI/REST
/// collaborators. Produced by a plain tree traversal; querying never
/// mutates node state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Node name.
    pub name: String,
    /// Current state-machine state.
    pub state: String,
    /// Sticky error flag, visible until an explicit recovery.
    pub errored: bool,
    /// Whether the node participates in dispatches.
    pub included: bool,
    /// Child reports, empty for leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StatusReport>,
    /// Application-only extras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppStatus>,
}

impl StatusReport {
    /// Find a descendant (or self) by name, depth-first.
    pub fn find(&self, name: &str) -> Option<&StatusReport> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}

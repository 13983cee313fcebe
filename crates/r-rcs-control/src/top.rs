//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Top node: partition-wide command entry point and status snapshot."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use r_rcs_common::PartitionConfig;
use r_rcs_fsm::{Command, FsmDefinition, Trigger};

use crate::application::ApplicationNode;
use crate::channel::ChannelFactory;
use crate::command::{CommandContext, CommandResponse, ErrorCode, FailureDetail};
use crate::dispatch::run_multicommand;
use crate::node::NodeCore;
use crate::process::ProcessManagerFactory;
use crate::status::StatusReport;
use crate::subsystem::SubsystemNode;
use crate::ControlError;

struct TopInner {
    core: Mutex<NodeCore>,
    children: Vec<SubsystemNode>,
    definition: Arc<FsmDefinition>,
    default_timeout: std::time::Duration,
}

/// Root of the control tree and the single external entry point for issuing
/// a command to the whole partition or reading its status snapshot.
///
/// Structurally a subsystem node one level up: the same multicommand
/// dispatch pattern, applied to subsystem children, with the same
/// error-escalation policy.
#[derive(Clone)]
pub struct TopNode {
    inner: Arc<TopInner>,
}

impl TopNode {
    /// Build the partition tree from its configuration. Subsystem children
    /// are created here; application leaves appear when their subsystem
    /// boots.
    pub fn from_config(
        config: &PartitionConfig,
        pm_factory: Arc<dyn ProcessManagerFactory>,
        channel_factory: Arc<dyn ChannelFactory>,
    ) -> Result<Self, ControlError> {
        let definition = Arc::new(FsmDefinition::from_config(&config.fsm)?);
        let mut children = Vec::with_capacity(config.subsystems.len());
        for (name, subsystem_config) in &config.subsystems {
            let subsystem_definition =
                Arc::new(FsmDefinition::from_config(&subsystem_config.fsm)?);
            children.push(SubsystemNode::new(
                name,
                subsystem_config.clone(),
                subsystem_definition,
                Arc::clone(&pm_factory),
                Arc::clone(&channel_factory),
            ));
        }
        Ok(Self {
            inner: Arc::new(TopInner {
                core: Mutex::new(NodeCore::new(&config.name, Arc::clone(&definition))),
                children,
                definition,
                default_timeout: config.command_timeout,
            }),
        })
    }

    /// Partition name.
    pub fn name(&self) -> String {
        self.inner.core.lock().name().to_owned()
    }

    /// Current state-machine state.
    pub fn state(&self) -> String {
        self.inner.core.lock().state().to_owned()
    }

    /// Sticky error flag.
    pub fn errored(&self) -> bool {
        self.inner.core.lock().errored()
    }

    /// Handles to the subsystem children.
    pub fn subsystems(&self) -> &[SubsystemNode] {
        &self.inner.children
    }

    /// Look a subsystem up by name.
    pub fn subsystem(&self, name: &str) -> Option<&SubsystemNode> {
        self.inner
            .children
            .iter()
            .find(|child| child.name() == name)
    }

    /// The configured default dispatch deadline.
    pub fn default_timeout(&self) -> std::time::Duration {
        self.inner.default_timeout
    }

    /// The last recorded command response, if any.
    pub fn last_response(&self) -> Option<CommandResponse> {
        self.inner.core.lock().last_response().cloned()
    }

    /// Issue one command to the whole partition and fold the per-subsystem
    /// outcomes into one aggregate response.
    pub async fn execute(&self, command: Command, ctx: &CommandContext) -> CommandResponse {
        let name = self.name();
        if let Err(err) = self.inner.core.lock().fire(&Trigger::Command(command)) {
            let response = CommandResponse::failure(
                &name,
                command,
                ErrorCode::InvalidTransition,
                vec![FailureDetail::from_error(
                    &name,
                    command,
                    &ControlError::Fsm(err),
                )],
            );
            self.inner.core.lock().record_response(response.clone());
            return response;
        }
        info!(node = %name, command = %command, "dispatching to partition");

        let order = self
            .inner
            .definition
            .command_order(command)
            .map(<[String]>::to_vec);
        let failed = run_multicommand(
            &name,
            &self.inner.children,
            command,
            ctx,
            order.as_deref(),
        )
        .await;

        let response = if failed.is_empty() {
            let mut core = self.inner.core.lock();
            if let Err(err) = core.fire(&Trigger::EndCommand(command)) {
                warn!(node = %name, command = %command, error = %err, "completion rejected by fsm");
            }
            CommandResponse::success(&name, command)
        } else {
            let response = CommandResponse::failure(&name, command, ErrorCode::Failed, failed);
            self.inner.core.lock().to_error(response.clone());
            response
        };
        self.inner.core.lock().record_response(response.clone());
        response
    }

    /// Read-only snapshot of the whole tree.
    pub async fn status(&self) -> StatusReport {
        let mut children = Vec::with_capacity(self.inner.children.len());
        for subsystem in &self.inner.children {
            children.push(subsystem.status().await);
        }
        let core = self.inner.core.lock();
        StatusReport {
            name: core.name().to_owned(),
            state: core.state().to_owned(),
            errored: core.errored(),
            included: core.included(),
            children,
            app: None,
        }
    }

    /// Toggle dispatch participation for the node at `path`
    /// (`subsystem` or `subsystem.application`).
    pub fn set_included(&self, path: &str, included: bool) -> Result<(), ControlError> {
        match self.resolve(path)? {
            TreeNode::Subsystem(subsystem) => subsystem.set_included(included),
            TreeNode::Application(application) => application.set_included(included),
        }
        Ok(())
    }

    /// Explicitly recover the node at `path` from its error state.
    pub fn recover(&self, path: &str) -> Result<(), ControlError> {
        match self.resolve(path)? {
            TreeNode::Subsystem(subsystem) => subsystem.recover(),
            TreeNode::Application(application) => application.recover(),
        }
    }

    fn resolve(&self, path: &str) -> Result<TreeNode, ControlError> {
        let mut parts = path.splitn(2, '.');
        let subsystem_name = parts.next().unwrap_or_default();
        let subsystem = self
            .subsystem(subsystem_name)
            .ok_or_else(|| ControlError::UnknownNode(path.to_owned()))?;
        match parts.next() {
            None => Ok(TreeNode::Subsystem(subsystem.clone())),
            Some(app_name) => subsystem
                .child(app_name)
                .map(TreeNode::Application)
                .ok_or_else(|| ControlError::UnknownNode(path.to_owned())),
        }
    }
}

enum TreeNode {
    Subsystem(SubsystemNode),
    Application(ApplicationNode),
}

//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Leaf control node wrapping one application supervisor."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use r_rcs_fsm::{Command, FsmDefinition, Trigger};

use crate::channel::AppSupervisor;
use crate::command::{CommandContext, CommandResponse, ErrorCode, FailureDetail};
use crate::dispatch::{AckOutcome, DispatchTarget};
use crate::node::NodeCore;
use crate::process::AppDescriptor;
use crate::status::{AppStatus, StatusReport};
use crate::ControlError;

#[derive(Debug)]
struct AppInner {
    core: Mutex<NodeCore>,
    descriptor: AppDescriptor,
    sup: AppSupervisor,
}

/// Leaf node of the control tree: one remote worker process, fronted by an
/// [`AppSupervisor`]. FSM transitions translate into remote command sends;
/// remote failures are recovered into structured responses and routed to
/// this node's error state, never thrown past the subsystem boundary.
#[derive(Debug, Clone)]
pub struct ApplicationNode {
    inner: Arc<AppInner>,
}

impl ApplicationNode {
    /// Wrap a freshly launched application. The supervisor is expected to
    /// already be registered with the subsystem's response listener.
    pub fn new(
        descriptor: AppDescriptor,
        sup: AppSupervisor,
        definition: Arc<FsmDefinition>,
    ) -> Self {
        let core = NodeCore::new(descriptor.name.clone(), definition);
        Self {
            inner: Arc::new(AppInner {
                core: Mutex::new(core),
                descriptor,
                sup,
            }),
        }
    }

    /// Application name.
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

    /// Whether this node participates in dispatches.
    pub fn included(&self) -> bool {
        self.inner.core.lock().included()
    }

    /// Toggle dispatch participation; the node's state is untouched.
    pub fn set_included(&self, included: bool) {
        self.inner.core.lock().set_included(included);
    }

    /// The launch descriptor this node fronts.
    pub fn descriptor(&self) -> &AppDescriptor {
        &self.inner.descriptor
    }

    /// The per-application supervisor.
    pub fn supervisor(&self) -> &AppSupervisor {
        &self.inner.sup
    }

    /// The last recorded command response, if any.
    pub fn last_response(&self) -> Option<CommandResponse> {
        self.inner.core.lock().last_response().cloned()
    }

    /// Reachability probe against the remote process.
    pub async fn ping(&self) -> bool {
        self.inner.sup.ping().await
    }

    /// Route the node to error with the given response. Idempotent.
    pub fn to_error(&self, response: CommandResponse) {
        self.inner.core.lock().to_error(response);
    }

    /// Explicit recovery out of the error state.
    pub fn recover(&self) -> Result<(), ControlError> {
        Ok(self.inner.core.lock().recover()?)
    }

    /// Drive the boot transition to completion once the owning subsystem
    /// has confirmed liveness. Launching itself is the process manager's
    /// work, not this node's.
    pub(crate) fn mark_booted(&self) {
        let mut core = self.inner.core.lock();
        if let Err(err) = core
            .fire(&Trigger::Command(Command::Boot))
            .and_then(|()| core.fire(&Trigger::EndCommand(Command::Boot)))
        {
            warn!(node = %core.name(), error = %err, "boot completion rejected by fsm");
            return;
        }
        let name = core.name().to_owned();
        core.record_response(CommandResponse::success(name, Command::Boot));
        info!(node = %core.name(), "application booted");
    }

    /// Record a failed liveness check at boot: straight to error, without
    /// blocking siblings.
    pub(crate) fn fail_boot(&self, detail: FailureDetail) {
        let response = CommandResponse::failure(
            self.name(),
            Command::Boot,
            ErrorCode::BootFailure,
            vec![detail],
        );
        self.to_error(response);
    }

    /// Tear the leaf down: stop the supervisor and its command channel,
    /// then complete the transition. The sticky error flag survives.
    pub async fn terminate(&self) {
        {
            let mut core = self.inner.core.lock();
            if let Err(err) = core.fire(&Trigger::Command(Command::Terminate)) {
                warn!(node = %core.name(), error = %err, "terminate rejected by fsm");
                return;
            }
        }
        self.inner.sup.terminate();
        let mut core = self.inner.core.lock();
        if let Err(err) = core.fire(&Trigger::EndCommand(Command::Terminate)) {
            warn!(node = %core.name(), error = %err, "terminate completion rejected by fsm");
        }
        let name = core.name().to_owned();
        core.record_response(CommandResponse::success(name, Command::Terminate));
    }

    /// Read-only projection of this leaf for status consumers.
    pub async fn status(&self) -> StatusReport {
        let ping = self.ping().await;
        let core = self.inner.core.lock();
        let sup = &self.inner.sup;
        let last_sent = sup.last_sent_command();
        let last_ok = sup.last_ok_command();
        StatusReport {
            name: core.name().to_owned(),
            state: core.state().to_owned(),
            errored: core.errored(),
            included: core.included(),
            children: Vec::new(),
            app: Some(AppStatus {
                process_state: self.inner.descriptor.handle.process_state(),
                ping,
                host: self.inner.descriptor.host.clone(),
                last_sent_command: last_sent,
                last_ok_command: last_ok,
                last_cmd_failed: last_sent != last_ok && last_sent.is_some(),
            }),
        }
    }
}

#[async_trait]
impl DispatchTarget for ApplicationNode {
    fn target_name(&self) -> String {
        self.name()
    }

    fn is_included(&self) -> bool {
        self.included()
    }

    async fn dispatch_send(
        &self,
        command: Command,
        ctx: &CommandContext,
    ) -> Result<(), ControlError> {
        self.inner
            .core
            .lock()
            .fire(&Trigger::Command(command))?;
        self.inner
            .sup
            .send(command, ctx.payload_for(&self.name()))
            .await
    }

    fn poll_outcome(&self, command: Command) -> Option<AckOutcome> {
        let ack = self.inner.sup.check_pending()?;
        if ack.success {
            Some(AckOutcome {
                success: true,
                code: ErrorCode::Success,
                detail: ack.detail_summary(),
            })
        } else {
            let detail = FailureDetail {
                node: self.name(),
                command,
                code: ErrorCode::Failed,
                error: ack.detail_summary(),
            };
            let response = CommandResponse::failure(
                self.name(),
                command,
                ErrorCode::Failed,
                vec![detail],
            );
            self.to_error(response);
            Some(AckOutcome {
                success: false,
                code: ErrorCode::Failed,
                detail: ack.detail_summary(),
            })
        }
    }

    async fn dispatch_send_wait(
        &self,
        command: Command,
        ctx: &CommandContext,
        deadline: Duration,
    ) -> Result<AckOutcome, ControlError> {
        self.inner
            .core
            .lock()
            .fire(&Trigger::Command(command))?;
        let ack = self
            .inner
            .sup
            .send_and_wait(command, ctx.payload_for(&self.name()), deadline)
            .await?;
        if ack.success {
            Ok(AckOutcome {
                success: true,
                code: ErrorCode::Success,
                detail: ack.detail_summary(),
            })
        } else {
            let detail = FailureDetail {
                node: self.name(),
                command,
                code: ErrorCode::Failed,
                error: ack.detail_summary(),
            };
            let response = CommandResponse::failure(
                self.name(),
                command,
                ErrorCode::Failed,
                vec![detail],
            );
            self.to_error(response);
            Ok(AckOutcome {
                success: false,
                code: ErrorCode::Failed,
                detail: ack.detail_summary(),
            })
        }
    }

    fn complete(&self, command: Command) {
        let mut core = self.inner.core.lock();
        if let Err(err) = core.fire(&Trigger::EndCommand(command)) {
            warn!(node = %core.name(), command = %command, error = %err, "completion rejected by fsm");
            return;
        }
        let name = core.name().to_owned();
        core.record_response(CommandResponse::success(name, command));
    }

    fn fail(&self, command: Command, detail: &FailureDetail) {
        let response = CommandResponse::failure(
            self.name(),
            command,
            detail.code,
            vec![detail.clone()],
        );
        self.to_error(response);
    }
}

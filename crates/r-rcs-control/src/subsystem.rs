//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Subsystem node: boot/terminate lifecycle and child multicommand dispatch."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use r_rcs_common::SubsystemConfig;
use r_rcs_fsm::{Command, FsmDefinition, Trigger};

use crate::application::ApplicationNode;
use crate::channel::{AppSupervisor, ChannelFactory, ResponseListener};
use crate::command::{CommandContext, CommandResponse, ErrorCode, FailureDetail};
use crate::dispatch::{run_multicommand, AckOutcome, DispatchTarget};
use crate::node::NodeCore;
use crate::process::{ProcessManager, ProcessManagerFactory};
use crate::status::StatusReport;
use crate::ControlError;

struct SubsystemInner {
    core: Mutex<NodeCore>,
    config: SubsystemConfig,
    definition: Arc<FsmDefinition>,
    pm_factory: Arc<dyn ProcessManagerFactory>,
    channel_factory: Arc<dyn ChannelFactory>,
    pm: Mutex<Option<Arc<dyn ProcessManager>>>,
    listener: Mutex<Option<ResponseListener>>,
    children: Mutex<Vec<ApplicationNode>>,
    // result slot read by the top node's collector loop
    pending: Mutex<Option<CommandResponse>>,
}

/// Internal node of the control tree: one named group of applications with
/// its own process manager and response listener, both created at boot and
/// destroyed at terminate.
#[derive(Clone)]
pub struct SubsystemNode {
    inner: Arc<SubsystemInner>,
}

impl SubsystemNode {
    /// Build an unbooted subsystem node from its configuration.
    pub fn new(
        name: &str,
        config: SubsystemConfig,
        definition: Arc<FsmDefinition>,
        pm_factory: Arc<dyn ProcessManagerFactory>,
        channel_factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(SubsystemInner {
                core: Mutex::new(NodeCore::new(name, Arc::clone(&definition))),
                config,
                definition,
                pm_factory,
                channel_factory,
                pm: Mutex::new(None),
                listener: Mutex::new(None),
                children: Mutex::new(Vec::new()),
                pending: Mutex::new(None),
            }),
        }
    }

    /// Subsystem name.
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

    /// Toggle dispatch participation for the whole subsystem.
    pub fn set_included(&self, included: bool) {
        self.inner.core.lock().set_included(included);
    }

    /// Handles to the current children (empty before boot).
    pub fn children(&self) -> Vec<ApplicationNode> {
        self.inner.children.lock().clone()
    }

    /// Look one child up by name.
    pub fn child(&self, name: &str) -> Option<ApplicationNode> {
        self.inner
            .children
            .lock()
            .iter()
            .find(|child| child.name() == name)
            .cloned()
    }

    /// The last recorded command response, if any.
    pub fn last_response(&self) -> Option<CommandResponse> {
        self.inner.core.lock().last_response().cloned()
    }

    /// Explicit recovery out of the error state.
    pub fn recover(&self) -> Result<(), ControlError> {
        Ok(self.inner.core.lock().recover()?)
    }

    /// Drive one lifecycle command against this subsystem and its children,
    /// returning the aggregated outcome.
    pub async fn execute(&self, command: Command, ctx: &CommandContext) -> CommandResponse {
        let response = match command {
            Command::Boot => self.boot(ctx).await,
            Command::Terminate => self.terminate().await,
            other => self.multicommand(other, ctx).await,
        };
        self.inner.core.lock().record_response(response.clone());
        response
    }

    /// Launch the configured application set and bring every child to the
    /// booted state.
    ///
    /// Single-flight: a subsystem that already owns children refuses to
    /// double-launch. All launches are issued (by the process manager)
    /// before any liveness wait; a child failing the liveness check is
    /// routed to error immediately without blocking its siblings.
    async fn boot(&self, _ctx: &CommandContext) -> CommandResponse {
        let name = self.name();
        if !self.inner.children.lock().is_empty() {
            let err = ControlError::AlreadyBooted(name.clone());
            warn!(node = %name, "boot refused: {err}");
            return CommandResponse::failure(
                &name,
                Command::Boot,
                ErrorCode::BootFailure,
                vec![FailureDetail::from_error(&name, Command::Boot, &err)],
            );
        }
        if let Err(err) = self
            .inner
            .core
            .lock()
            .fire(&Trigger::Command(Command::Boot))
        {
            return CommandResponse::failure(
                &name,
                Command::Boot,
                ErrorCode::InvalidTransition,
                vec![FailureDetail::from_error(
                    &name,
                    Command::Boot,
                    &ControlError::Fsm(err),
                )],
            );
        }
        info!(node = %name, "subsystem booting");

        let pm = self.inner.pm_factory.create(&name);
        let apps = match pm.boot(&self.inner.config).await {
            Ok(apps) => apps,
            Err(err) => {
                let response = CommandResponse::failure(
                    &name,
                    Command::Boot,
                    ErrorCode::BootFailure,
                    vec![FailureDetail::from_error(&name, Command::Boot, &err)],
                );
                self.inner.core.lock().to_error(response.clone());
                return response;
            }
        };

        let listener = ResponseListener::new();
        let mut children: Vec<ApplicationNode> = Vec::new();
        for descriptor in apps.values() {
            let sender = self.inner.channel_factory.open(descriptor, &listener);
            let sup = AppSupervisor::new(&descriptor.name, sender, &listener);
            children.push(ApplicationNode::new(
                descriptor.clone(),
                sup,
                Arc::clone(&self.inner.definition),
            ));
        }

        // every launch already issued; now confirm liveness per child
        let mut failed: Vec<FailureDetail> = Vec::new();
        for child in &children {
            let alive = child.descriptor().handle.is_alive() && child.ping().await;
            if alive {
                child.mark_booted();
            } else {
                let detail = FailureDetail {
                    node: child.name(),
                    command: Command::Boot,
                    code: ErrorCode::BootFailure,
                    error: "liveness check failed".to_owned(),
                };
                child.fail_boot(detail.clone());
                failed.push(detail);
            }
        }

        *self.inner.pm.lock() = Some(pm);
        *self.inner.listener.lock() = Some(listener);
        *self.inner.children.lock() = children;

        if failed.is_empty() {
            let mut core = self.inner.core.lock();
            if let Err(err) = core.fire(&Trigger::EndCommand(Command::Boot)) {
                warn!(node = %name, error = %err, "boot completion rejected by fsm");
            }
            info!(node = %name, "subsystem booted");
            CommandResponse::success(&name, Command::Boot)
        } else {
            let response =
                CommandResponse::failure(&name, Command::Boot, ErrorCode::Failed, failed);
            self.inner.core.lock().to_error(response.clone());
            response
        }
    }

    /// Fan a non-boot, non-terminate command out to the children and fold
    /// their outcomes into this node's own transition.
    async fn multicommand(&self, command: Command, ctx: &CommandContext) -> CommandResponse {
        let name = self.name();
        if let Err(err) = self.inner.core.lock().fire(&Trigger::Command(command)) {
            return CommandResponse::failure(
                &name,
                command,
                ErrorCode::InvalidTransition,
                vec![FailureDetail::from_error(
                    &name,
                    command,
                    &ControlError::Fsm(err),
                )],
            );
        }
        info!(node = %name, command = %command, "dispatching to subsystem children");

        let children = self.children();
        let ctx = self.resolve_context(command, ctx);
        let order = self
            .inner
            .definition
            .command_order(command)
            .map(<[String]>::to_vec);
        let failed =
            run_multicommand(&name, &children, command, &ctx, order.as_deref()).await;

        if failed.is_empty() {
            let mut core = self.inner.core.lock();
            if let Err(err) = core.fire(&Trigger::EndCommand(command)) {
                warn!(node = %name, command = %command, error = %err, "completion rejected by fsm");
            }
            CommandResponse::success(&name, command)
        } else {
            let response = CommandResponse::failure(&name, command, ErrorCode::Failed, failed);
            self.inner.core.lock().to_error(response.clone());
            response
        }
    }

    /// Cascade terminate to every child, unregister them from the response
    /// listener, detach them, then stop the listener and process manager
    /// exactly once each.
    async fn terminate(&self) -> CommandResponse {
        let name = self.name();
        if let Err(err) = self
            .inner
            .core
            .lock()
            .fire(&Trigger::Command(Command::Terminate))
        {
            return CommandResponse::failure(
                &name,
                Command::Terminate,
                ErrorCode::InvalidTransition,
                vec![FailureDetail::from_error(
                    &name,
                    Command::Terminate,
                    &ControlError::Fsm(err),
                )],
            );
        }
        info!(node = %name, "subsystem terminating");

        let children: Vec<ApplicationNode> =
            self.inner.children.lock().drain(..).collect();
        let listener = self.inner.listener.lock().take();
        for child in &children {
            child.terminate().await;
            if let Some(listener) = &listener {
                listener.unregister(&child.name());
            }
        }
        if let Some(listener) = listener {
            listener.stop();
        }
        let pm = self.inner.pm.lock().take();
        if let Some(pm) = pm {
            pm.terminate().await;
        }

        let mut core = self.inner.core.lock();
        if let Err(err) = core.fire(&Trigger::EndCommand(Command::Terminate)) {
            warn!(node = %name, error = %err, "terminate completion rejected by fsm");
        }
        info!(node = %name, "subsystem terminated");
        CommandResponse::success(&name, Command::Terminate)
    }

    /// Merge caller payload overrides with the payloads declared in the
    /// subsystem configuration.
    fn resolve_context(&self, command: Command, ctx: &CommandContext) -> CommandContext {
        let mut resolved = CommandContext::with_timeout(ctx.timeout);
        for child in self.inner.children.lock().iter() {
            let name = child.name();
            let payload = ctx
                .payloads
                .get(&name)
                .cloned()
                .unwrap_or_else(|| self.inner.config.payload_for(&command.to_string(), &name));
            if !payload.is_null() {
                resolved.payloads.insert(name, payload);
            }
        }
        resolved
    }

    /// Read-only projection of this subsystem and its children.
    pub async fn status(&self) -> StatusReport {
        let children = self.children();
        let mut reports = Vec::with_capacity(children.len());
        for child in &children {
            reports.push(child.status().await);
        }
        let core = self.inner.core.lock();
        StatusReport {
            name: core.name().to_owned(),
            state: core.state().to_owned(),
            errored: core.errored(),
            included: core.included(),
            children: reports,
            app: None,
        }
    }

    fn record_error(&self, response: CommandResponse) {
        self.inner.core.lock().to_error(response);
    }
}

#[async_trait]
impl DispatchTarget for SubsystemNode {
    fn target_name(&self) -> String {
        self.name()
    }

    fn is_included(&self) -> bool {
        self.included()
    }

    /// Begin the command by running this subsystem's own dispatch in a
    /// spawned task; its aggregate response lands in the pending slot the
    /// parent's collector polls, which is exactly the acknowledgement shape
    /// application leaves have.
    async fn dispatch_send(
        &self,
        command: Command,
        ctx: &CommandContext,
    ) -> Result<(), ControlError> {
        // legality is pre-checked so an illegal trigger is rejected
        // without spawning and without side effects
        {
            let core = self.inner.core.lock();
            if !core.can_fire(&Trigger::Command(command)) {
                return Err(ControlError::Fsm(r_rcs_fsm::FsmError::InvalidTransition {
                    trigger: command.to_string(),
                    state: core.state().to_owned(),
                }));
            }
        }
        self.inner.pending.lock().take();
        let node = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let response = node.execute(command, &ctx).await;
            *node.inner.pending.lock() = Some(response);
        });
        Ok(())
    }

    fn poll_outcome(&self, _command: Command) -> Option<AckOutcome> {
        self.inner
            .pending
            .lock()
            .take()
            .map(|response| AckOutcome::from_response(&response))
    }

    async fn dispatch_send_wait(
        &self,
        command: Command,
        ctx: &CommandContext,
        deadline: Duration,
    ) -> Result<AckOutcome, ControlError> {
        match tokio::time::timeout(deadline, self.execute(command, ctx)).await {
            Ok(response) => Ok(AckOutcome::from_response(&response)),
            Err(_) => Err(ControlError::Timeout {
                node: self.name(),
                command,
                timeout: deadline,
            }),
        }
    }

    fn complete(&self, _command: Command) {
        // the subsystem completed its own transition inside execute()
    }

    fn fail(&self, command: Command, detail: &FailureDetail) {
        let response = CommandResponse::failure(
            self.name(),
            command,
            detail.code,
            vec![detail.clone()],
        );
        self.record_error(response);
    }
}

//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Command transport contract, response listener, and per-application supervisor."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use r_rcs_fsm::Command;

use crate::process::AppDescriptor;
use crate::ControlError;

/// An inbound acknowledgement from a remote application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Application the acknowledgement originates from.
    pub node: String,
    /// Command being acknowledged.
    pub command: Command,
    /// Whether the remote side accepted the command.
    pub success: bool,
    /// Remote detail payload (status, error text, counters, ...).
    #[serde(default)]
    pub detail: Value,
}

impl Ack {
    /// One-line rendering of the remote detail for failure reports.
    pub fn detail_summary(&self) -> String {
        match &self.detail {
            Value::Null => self.command.to_string(),
            other => other.to_string(),
        }
    }
}

/// Outbound half of the per-application command channel.
///
/// Implemented by concrete transports (HTTP commander, harness double);
/// acknowledgements travel back through the subsystem's
/// [`ResponseListener`], never through this trait.
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Fire-and-forget send of one command with its payload.
    async fn send(&self, command: Command, payload: Value) -> Result<(), ControlError>;
    /// Reachability probe, distinct from command acknowledgement.
    async fn ping(&self) -> bool;
    /// Stop the transport. Called once when the owning node terminates.
    fn stop(&self) {}
}

/// Opens a [`CommandSender`] for a launched application. The listener handle
/// is provided so transports can route inbound acknowledgements back.
pub trait ChannelFactory: Send + Sync {
    /// Open the transport for `descriptor`, delivering acks to `listener`.
    fn open(
        &self,
        descriptor: &AppDescriptor,
        listener: &ResponseListener,
    ) -> Box<dyn CommandSender>;
}

#[derive(Debug, Default)]
struct ListenerInner {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<Ack>>>,
    stopped: Mutex<bool>,
}

/// Routes inbound acknowledgements to per-application delivery targets.
///
/// One listener exists per subsystem, created at boot and stopped at
/// terminate. The registration table is mutated only by the owning
/// subsystem during child creation/destruction; delivery stays safe
/// against a concurrent unregister during terminate.
#[derive(Debug, Clone, Default)]
pub struct ResponseListener {
    inner: Arc<ListenerInner>,
}

impl ResponseListener {
    /// Create an empty listener.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a delivery target for `name`, returning the receiving end.
    pub fn register(&self, name: &str) -> mpsc::UnboundedReceiver<Ack> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.inner.routes.lock().insert(name.to_owned(), tx);
        if previous.is_some() {
            warn!(node = name, "replacing existing response-listener registration");
        }
        debug!(node = name, "registered with response listener");
        rx
    }

    /// Drop the delivery target for `name`. Idempotent.
    pub fn unregister(&self, name: &str) {
        if self.inner.routes.lock().remove(name).is_some() {
            debug!(node = name, "unregistered from response listener");
        }
    }

    /// Route one inbound acknowledgement to its registered target.
    ///
    /// An ack for an unregistered name is logged loudly and dropped; it is
    /// never delivered elsewhere.
    pub fn deliver(&self, ack: Ack) {
        if *self.inner.stopped.lock() {
            warn!(node = %ack.node, command = %ack.command, "ack received after listener stop");
            return;
        }
        let target = self.inner.routes.lock().get(&ack.node).cloned();
        match target {
            Some(tx) => {
                if tx.send(ack).is_err() {
                    warn!("delivery target dropped before ack could be routed");
                }
            }
            None => {
                warn!(node = %ack.node, command = %ack.command, "ack for unregistered application");
            }
        }
    }

    /// Stop routing and clear the registration table. Idempotent.
    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        if *stopped {
            return;
        }
        *stopped = true;
        self.inner.routes.lock().clear();
        debug!("response listener stopped");
    }

    /// Number of currently registered applications.
    pub fn registered(&self) -> usize {
        self.inner.routes.lock().len()
    }
}

/// Per-application proxy mediating command send and acknowledgement receipt.
///
/// Created together with its application node, terminated with it. Tracks
/// the last command sent and the last command acknowledged successfully for
/// the status projection.
pub struct AppSupervisor {
    name: String,
    sender: Box<dyn CommandSender>,
    acks: tokio::sync::Mutex<mpsc::UnboundedReceiver<Ack>>,
    last_sent: Mutex<Option<Command>>,
    last_ok: Mutex<Option<Command>>,
}

impl AppSupervisor {
    /// Build a supervisor for `name`, registering it with the subsystem's
    /// response listener.
    pub fn new(name: &str, sender: Box<dyn CommandSender>, listener: &ResponseListener) -> Self {
        let acks = listener.register(name);
        Self {
            name: name.to_owned(),
            sender,
            acks: tokio::sync::Mutex::new(acks),
            last_sent: Mutex::new(None),
            last_ok: Mutex::new(None),
        }
    }

    /// Application name this supervisor fronts.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fire-and-forget command send; completion is checked later through
    /// [`AppSupervisor::check_pending`].
    pub async fn send(&self, command: Command, payload: Value) -> Result<(), ControlError> {
        *self.last_sent.lock() = Some(command);
        self.sender.send(command, payload).await
    }

    /// Send and block until acknowledgement or deadline.
    pub async fn send_and_wait(
        &self,
        command: Command,
        payload: Value,
        timeout: Duration,
    ) -> Result<Ack, ControlError> {
        *self.last_sent.lock() = Some(command);
        self.sender.send(command, payload).await?;
        let mut acks = self.acks.lock().await;
        match tokio::time::timeout(timeout, acks.recv()).await {
            Ok(Some(ack)) => {
                self.record_ack(&ack);
                Ok(ack)
            }
            Ok(None) => Err(ControlError::ChannelClosed(self.name.clone())),
            Err(_) => Err(ControlError::Timeout {
                node: self.name.clone(),
                command,
                timeout,
            }),
        }
    }

    /// Non-blocking check for a pending acknowledgement.
    pub fn check_pending(&self) -> Option<Ack> {
        let mut acks = self.acks.try_lock().ok()?;
        let ack = acks.try_recv().ok()?;
        self.record_ack(&ack);
        Some(ack)
    }

    /// Reachability probe against the remote side.
    pub async fn ping(&self) -> bool {
        self.sender.ping().await
    }

    /// Stop the underlying command channel.
    pub fn terminate(&self) {
        self.sender.stop();
    }

    /// Last command handed to the transport.
    pub fn last_sent_command(&self) -> Option<Command> {
        *self.last_sent.lock()
    }

    /// Last command acknowledged successfully.
    pub fn last_ok_command(&self) -> Option<Command> {
        *self.last_ok.lock()
    }

    fn record_ack(&self, ack: &Ack) {
        if ack.success {
            *self.last_ok.lock() = Some(ack.command);
        }
    }
}

impl std::fmt::Debug for AppSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSupervisor")
            .field("name", &self.name)
            .field("last_sent", &self.last_sent.lock())
            .field("last_ok", &self.last_ok.lock())
            .finish()
    }
}

//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Process-manager contract and application descriptors."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use r_rcs_common::SubsystemConfig;

use crate::ControlError;

/// Opaque liveness view of one launched process, owned by the process
/// manager and referenced (not owned) by the application node.
pub trait LivenessProbe: Send + Sync + fmt::Debug {
    /// Whether the process is currently running.
    fn is_alive(&self) -> bool;
    /// Display form for the status projection (`alive`, `dead[137]`, ...).
    fn process_state(&self) -> String;
}

/// Descriptor for one launched application, returned by
/// [`ProcessManager::boot`] and invalidated by terminate.
#[derive(Debug, Clone)]
pub struct AppDescriptor {
    /// Application name, unique within its subsystem.
    pub name: String,
    /// Host the process runs on.
    pub host: String,
    /// Command/response port.
    pub port: u16,
    /// Liveness handle for the underlying process.
    pub handle: Arc<dyn LivenessProbe>,
}

/// Abstract boot/terminate/liveness contract over the concrete launcher
/// backends (remote shell, container orchestrator, harness).
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Launch the subsystem's declared application set. All launches are
    /// issued before this returns; liveness is the caller's concern.
    /// Fails with [`ControlError::AlreadyBooted`] on a second boot.
    async fn boot(
        &self,
        config: &SubsystemConfig,
    ) -> Result<IndexMap<String, AppDescriptor>, ControlError>;

    /// Tear every launched process down. Idempotent.
    async fn terminate(&self);

    /// Whether the named application's process is currently running.
    fn is_alive(&self, name: &str) -> bool;
}

/// Creates the process manager owned by one subsystem node at boot time.
pub trait ProcessManagerFactory: Send + Sync {
    /// Build a fresh, unbooted process manager for `subsystem`.
    fn create(&self, subsystem: &str) -> Arc<dyn ProcessManager>;
}

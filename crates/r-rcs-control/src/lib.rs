//! ---
//! rcs_section: "01-core-orchestration"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Control tree, multicommand dispatch, and external contracts."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! The R-RCS orchestration core.
//!
//! A partition is managed as a three-level tree: one [`TopNode`] over
//! [`SubsystemNode`]s over [`ApplicationNode`] leaves. Commands flow
//! top-down; acknowledgements and aggregated outcomes flow bottom-up.
//! Each node carries its own state-machine instance from `r-rcs-fsm`;
//! only the hook bodies differ per node kind.
//!
//! The process-manager and command-transport backends stay behind the
//! [`ProcessManager`]/[`CommandSender`] contracts so the core never knows
//! whether applications live behind SSH, a container orchestrator, or a
//! test harness.

pub mod application;
pub mod channel;
pub mod command;
pub mod dispatch;
pub mod node;
pub mod process;
pub mod status;
pub mod subsystem;
pub mod top;

use std::time::Duration;

use r_rcs_fsm::{Command, FsmError};

/// Shared result type for control-tree operations.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Error taxonomy for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A state-machine trigger was illegal or a machine configuration did
    /// not compile. Rejected without side effects.
    #[error(transparent)]
    Fsm(#[from] FsmError),
    /// The process manager could not launch the application set.
    #[error("process manager boot failure: {0}")]
    BootFailure(String),
    /// Boot was requested on a subsystem that already owns children.
    #[error("subsystem `{0}` is already booted")]
    AlreadyBooted(String),
    /// No acknowledgement arrived within the deadline. The application may
    /// still answer late; the dispatch has already failed.
    #[error("no acknowledgement for `{command}` from `{node}` within {timeout:?}")]
    Timeout {
        /// Node that never answered.
        node: String,
        /// Command awaiting acknowledgement.
        command: Command,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The application returned a failure acknowledgement.
    #[error("application `{node}` rejected `{command}`: {detail}")]
    Remote {
        /// Node that rejected the command.
        node: String,
        /// Rejected command.
        command: Command,
        /// Remote failure detail.
        detail: String,
    },
    /// The acknowledgement channel closed before an answer arrived.
    #[error("acknowledgement channel for `{0}` is closed")]
    ChannelClosed(String),
    /// A node path did not resolve within the tree.
    #[error("unknown node path `{0}`")]
    UnknownNode(String),
}

pub use application::ApplicationNode;
pub use channel::{Ack, AppSupervisor, ChannelFactory, CommandSender, ResponseListener};
pub use command::{CommandContext, CommandResponse, ErrorCode, FailureDetail};
pub use dispatch::{run_multicommand, AckOutcome, DispatchTarget, POLL_INTERVAL};
pub use node::NodeCore;
pub use process::{AppDescriptor, LivenessProbe, ProcessManager, ProcessManagerFactory};
pub use status::{AppStatus, StatusReport};
pub use subsystem::SubsystemNode;
pub use top::TopNode;

//! ---
//! rcs_section: "03-configuration-logging"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Shared configuration model and logging bootstrap."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Shared primitives for the R-RCS run-control workspace: the partition
//! configuration model consumed when the control tree is built, and the
//! tracing bootstrap used by binaries and tests.

pub mod config;
pub mod logging;

pub use config::{AppLaunchConfig, ConfigError, PartitionConfig, SubsystemConfig};

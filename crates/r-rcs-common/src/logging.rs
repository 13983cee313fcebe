//! ---
//! rcs_section: "03-configuration-logging"
//! rcs_subsection: "module"
//! rcs_type: "source"
//! rcs_scope: "code"
//! rcs_description: "Structured logging bootstrap for binaries and tests."
//! rcs_version: "v0.0.0-prealpha"
//! rcs_owner: "tbd"
//! ---
use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

/// Initialize a baseline tracing subscriber suitable for development.
///
/// Honors `RUST_LOG`; defaults to INFO. Safe to call more than once (later
/// calls are no-ops), which keeps test binaries honest.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

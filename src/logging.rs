//! Tracing setup for host applications
//!
//! The library only emits `tracing` events; it never installs a subscriber by itself.
//! Hosts without their own setup can call [`init_tracing`].

use tracing_subscriber::EnvFilter;

use crate::{BridgeError, Result};

/// Environment variable that overrides the default filter
pub const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or by `default_directive`
/// (for example `"sysex_bridge=debug"`) when the variable is unset.
///
/// Fails if the directive is invalid or a global subscriber is already installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match std::env::var(STANDARD_ENV_VAR) {
        Ok(env) if !env.is_empty() => EnvFilter::try_new(env),
        _ => EnvFilter::try_new(default_directive),
    }
    .map_err(|e| BridgeError::config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| BridgeError::config(format!("tracing already initialised: {e}")))
}

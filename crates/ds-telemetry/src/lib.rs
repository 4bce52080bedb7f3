//! # DocSeal Telemetry
//!
//! Structured logging for DocSeal binaries. Library crates only emit
//! `tracing` events; binaries call [`init_logging`] once at startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = ds_telemetry::TelemetryConfig::from_env();
//! ds_telemetry::init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DS_LOG_LEVEL` / `RUST_LOG` | `info` | `EnvFilter` directives |
//! | `DS_JSON_LOGS` | `false` | One JSON object per line |
//! | `DS_SERVICE_NAME` | `docseal` | Recorded on the startup event |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

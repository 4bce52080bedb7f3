//! # DocSeal Runtime
//!
//! Configuration loading and component wiring shared by the `ds-sign`
//! binary and integration tests.
//!
//! - `container/` - [`SigningConfig`] and the wired [`DocSealContainer`]
//! - `cli` - command definitions and their execution
//!
//! ## Startup Sequence
//!
//! 1. Logging from `DS_LOG_LEVEL` / `RUST_LOG`, raised by `-v`
//! 2. Configuration: TOML file, then environment overrides, then validation
//! 3. Trust anchors and the TSA failover list
//! 4. HSM providers, only for commands that use them

pub mod cli;
pub mod container;

pub use container::{ConfigError, ContainerError, DocSealContainer, SigningConfig};

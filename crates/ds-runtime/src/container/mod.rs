//! # Runtime Container
//!
//! Configuration plus the wired DocSeal components.

pub mod config;
pub mod services;

pub use config::{ConfigError, ProviderSettings, SigningConfig, TsaSettings};
pub use services::{http_gateway, ContainerError, DocSealContainer};

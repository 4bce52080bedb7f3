//! Domain layer: errors, provider configuration, key-spec tables.

pub mod entities;
pub mod errors;

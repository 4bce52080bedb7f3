//! # Integration Tests
//!
//! - `flows` - local keys, timestamping and failover
//! - `hsm_flows` - manager-routed signing over emulated custodians
//! - `cli_flows` - the `ds-sign` commands against files on disk

pub mod cli_flows;
pub mod flows;
pub mod hsm_flows;

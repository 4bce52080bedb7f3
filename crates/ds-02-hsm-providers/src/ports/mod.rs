//! Ports: the provider contract and the transports adapters drive.

pub mod inbound;
pub mod outbound;

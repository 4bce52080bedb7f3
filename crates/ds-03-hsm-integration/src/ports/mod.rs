//! # Ports Layer
//!
//! - **Inbound (Driving)**: the manager API used by the runtime and CLI
//!
//! Outbound dependencies are the provider contract from DS-02 and the engine
//! API from DS-01; both are consumed as trait objects.

pub mod inbound;

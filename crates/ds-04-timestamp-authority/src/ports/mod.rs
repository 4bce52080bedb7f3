//! # Ports Layer
//!
//! Trait definitions for the hexagonal architecture.
//! - **Inbound (Driving)**: API that the signature engine and the CLI use
//! - **Outbound (Driven)**: the transport that reaches a TSA

pub mod inbound;
pub mod outbound;

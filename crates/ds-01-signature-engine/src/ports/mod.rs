//! # Ports Layer
//!
//! - **Inbound (Driving)**: the signature engine API
//! - **Outbound (Driven)**: timestamping and the document model

pub mod inbound;
pub mod outbound;

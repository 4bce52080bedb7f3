//! # Domain Layer
//!
//! Routing errors and availability snapshots. No I/O.

pub mod entities;
pub mod errors;

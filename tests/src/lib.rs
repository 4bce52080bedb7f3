//! # DocSeal Test Suite
//!
//! Cross-crate flows that no single component crate can exercise alone.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/          # Signing and validation throughput
//! └── src/
//!     ├── support.rs    # Emulated key services
//!     └── integration/  # Engine + TSA + HSM flows
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ds-tests
//! cargo test -p ds-tests integration::hsm_flows
//! cargo bench -p ds-tests
//! ```

pub mod integration;
pub mod support;

//! # HSM Integration Manager (DS-03)
//!
//! Holds one adapter per [`ProviderTag`](shared_types::ProviderTag) and
//! routes signing requests by key reference.
//!
//! ## Flow
//!
//! ```text
//! sign_with_hsm(document, key_reference, certificate)
//!   ├─ engine.prepare_signature   digest + signed attributes
//!   ├─ provider.sign              raw signature over the attribute digest
//!   └─ engine.complete_signature  CMS assembly, optional timestamp
//! ```
//!
//! Registering a tag again replaces the earlier adapter. Availability is
//! probed on every query.

pub mod domain;
pub mod ports;
pub mod service;

pub use domain::entities::ProviderStatus;
pub use domain::errors::IntegrationError;
pub use ports::inbound::HsmIntegrationApi;
pub use service::HsmIntegrationManager;

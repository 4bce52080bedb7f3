//! # HSM Provider Adapters (DS-02)
//!
//! Signs pre-computed digests with keys that never leave their custodian.
//!
//! ## Providers
//!
//! | Tag              | Backend                 | Key identifier            |
//! |------------------|-------------------------|---------------------------|
//! | `aws-kms`        | AWS KMS (JSON 1.1)      | key id, ARN or alias      |
//! | `gcp-kms`        | Cloud KMS (REST v1)     | crypto key resource name  |
//! | `azure-keyvault` | Key Vault (REST 7.4)    | key name or `kid` URL     |
//! | `pkcs11`         | local token (cryptoki)  | `CKA_LABEL`               |
//!
//! ## Architecture
//!
//! - **Domain Layer** (`domain/`): configuration, key-spec tables, the
//!   error taxonomy and fault mapping
//! - **Ports Layer** (`ports/`): [`HsmProvider`] inbound, [`KmsTransport`]
//!   and [`TokenBackend`] outbound
//! - **Adapters Layer** (`adapters/`): one provider per backend plus the
//!   shared HTTP transport
//!
//! Every adapter returns ECDSA signatures as DER `Ecdsa-Sig-Value`, whatever
//! encoding its backend produces.

pub mod adapters;
pub mod domain;
pub mod ports;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use adapters::{AwsKmsProvider, AzureKeyVaultProvider, GcpKmsProvider, HttpKmsTransport, Pkcs11Provider};
#[cfg(feature = "pkcs11")]
pub use adapters::CryptokiBackend;
pub use domain::entities::{
    AwsKmsConfig, AzureKeyVaultConfig, GcpKmsConfig, Pkcs11Config, TokenMechanism, DEFAULT_PROVIDER_TIMEOUT,
};
pub use domain::errors::{FaultKind, HsmError, Operation, ProviderFault};
pub use ports::inbound::HsmProvider;
pub use ports::outbound::{KmsRequest, KmsResponse, KmsTransport, TokenBackend, TokenInfo, TokenKey, TokenPublicKey};

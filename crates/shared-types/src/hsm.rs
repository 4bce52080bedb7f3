//! # HSM Key Model
//!
//! Opaque handles and request/result values exchanged with hardware and
//! cloud key custodians. Nothing in this module ever carries private key
//! material.

use crate::algorithms::SigningAlgorithm;
use crate::keys::KeyAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one key-custody backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderTag {
    AwsKms,
    GcpKms,
    AzureKeyVault,
    Pkcs11,
}

impl ProviderTag {
    pub const ALL: [ProviderTag; 4] = [
        Self::AwsKms,
        Self::GcpKms,
        Self::AzureKeyVault,
        Self::Pkcs11,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::AwsKms => "aws-kms",
            ProviderTag::GcpKms => "gcp-kms",
            ProviderTag::AzureKeyVault => "azure-keyvault",
            ProviderTag::Pkcs11 => "pkcs11",
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws-kms" | "aws" => Ok(ProviderTag::AwsKms),
            "gcp-kms" | "gcp" => Ok(ProviderTag::GcpKms),
            "azure-keyvault" | "azure" => Ok(ProviderTag::AzureKeyVault),
            "pkcs11" => Ok(ProviderTag::Pkcs11),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Opaque reference to a key held by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HsmKeyReference {
    pub provider: ProviderTag,
    /// Provider-specific identifier: key ARN/alias, crypto key name,
    /// vault key name, or token object label.
    pub key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault_url: Option<String>,
}

impl HsmKeyReference {
    pub fn new(provider: ProviderTag, key_id: impl Into<String>) -> Self {
        Self {
            provider,
            key_id: key_id.into(),
            key_version: None,
            region: None,
            project_id: None,
            location: None,
            key_ring: None,
            vault_url: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.key_version = Some(version.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_vault_url(mut self, vault_url: impl Into<String>) -> Self {
        self.vault_url = Some(vault_url.into());
        self
    }
}

/// What a provider allows a key to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    SignVerify,
    EncryptDecrypt,
    Other,
}

/// Key metadata as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmKeyInfo {
    pub key_id: String,
    pub provider: ProviderTag,
    pub key_algorithm: KeyAlgorithm,
    pub key_size: u32,
    pub purpose: KeyPurpose,
    pub created_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub label: Option<String>,
}

/// A digest to be signed by a provider-held key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmSigningRequest {
    pub key_reference: HsmKeyReference,
    /// Pre-computed digest. Never raw document bytes.
    pub digest: Vec<u8>,
    pub algorithm: SigningAlgorithm,
}

/// Raw signature returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsmSigningResult {
    /// RSA signature bytes, or a DER `Ecdsa-Sig-Value` for EC keys.
    pub signature: Vec<u8>,
    pub algorithm: SigningAlgorithm,
    pub key_id: String,
    pub provider: ProviderTag,
    pub signed_at: DateTime<Utc>,
}

/// Deletion is always scheduled, never immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionState {
    /// Waiting out the provider's pending window.
    PendingDeletion,
    /// Recoverable until the purge date.
    SoftDeleted,
    /// Destruction requested from a local token.
    DestroyRequested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDeletionStatus {
    pub key_id: String,
    pub state: DeletionState,
    /// When the provider will actually destroy the key, if reported.
    pub effective_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_tag_parse_roundtrip() {
        for tag in ProviderTag::ALL {
            assert_eq!(tag.as_str().parse::<ProviderTag>().unwrap(), tag);
        }
        assert_eq!("AWS".parse::<ProviderTag>().unwrap(), ProviderTag::AwsKms);
        assert!("vault".parse::<ProviderTag>().is_err());
    }

    #[test]
    fn test_key_reference_serializes_without_empty_fields() {
        let reference = HsmKeyReference::new(ProviderTag::GcpKms, "doc-signing")
            .with_version("3");
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["provider"], "gcp-kms");
        assert_eq!(json["key_version"], "3");
        assert!(json.get("vault_url").is_none());
    }
}

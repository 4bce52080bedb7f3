//! # HSM Errors
//!
//! Adapters talk to their backends in terms of [`ProviderFault`], a value
//! that never leaves this crate's adapter boundary unmapped. Every public
//! operation returns [`HsmError`].

use shared_types::ProviderTag;
use std::fmt;
use thiserror::Error;

/// Errors reported by HSM provider adapters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HsmError {
    /// Provider unreachable, or the session could not be established.
    #[error("HSM connection error ({provider}): {message}")]
    Connection {
        provider: ProviderTag,
        message: String,
    },

    /// Authenticated, but not permitted to perform this operation.
    #[error("HSM authorization error ({provider}): {message}")]
    Authentication {
        provider: ProviderTag,
        message: String,
    },

    /// The provider does not know the key identifier.
    #[error("Key {key_id} not found in {provider}")]
    KeyNotFound {
        provider: ProviderTag,
        key_id: String,
    },

    /// The provider rejected the signing operation, e.g. wrong key usage.
    #[error("HSM signing failed ({provider}): {message}")]
    Signing {
        provider: ProviderTag,
        message: String,
    },

    /// The backend library or client is not available on this host or in
    /// this build. Distinct from any runtime provider error.
    #[error("{provider} unavailable: dependency not installed ({dependency})")]
    DependencyUnavailable {
        provider: ProviderTag,
        dependency: String,
    },

    /// No supported key spec is at least as strong as the request.
    #[error("Unsupported key spec for {provider}: {message}")]
    UnsupportedKeySpec {
        provider: ProviderTag,
        message: String,
    },

    /// The provider answered with something this adapter cannot decode.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: ProviderTag,
        message: String,
    },

    /// An operational call was made before `initialize` succeeded.
    #[error("{0} provider is not initialized")]
    NotInitialized(ProviderTag),

    /// The provider rejected a key-management request.
    #[error("HSM {operation} failed ({provider}): {message}")]
    Operation {
        provider: ProviderTag,
        operation: Operation,
        message: String,
    },
}

impl HsmError {
    /// Provider that produced the error.
    pub fn provider(&self) -> ProviderTag {
        match self {
            HsmError::Connection { provider, .. }
            | HsmError::Authentication { provider, .. }
            | HsmError::KeyNotFound { provider, .. }
            | HsmError::Signing { provider, .. }
            | HsmError::DependencyUnavailable { provider, .. }
            | HsmError::UnsupportedKeySpec { provider, .. }
            | HsmError::InvalidResponse { provider, .. }
            | HsmError::Operation { provider, .. } => *provider,
            HsmError::NotInitialized(provider) => *provider,
        }
    }

    pub fn is_dependency_unavailable(&self) -> bool {
        matches!(self, HsmError::DependencyUnavailable { .. })
    }

    pub(crate) fn invalid_response(provider: ProviderTag, message: impl Into<String>) -> Self {
        HsmError::InvalidResponse {
            provider,
            message: message.into(),
        }
    }
}

/// Provider call that produced a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Initialize,
    Sign,
    GetPublicKey,
    ListKeys,
    CreateKey,
    DeleteKey,
    Probe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Initialize => "initialize",
            Operation::Sign => "sign",
            Operation::GetPublicKey => "getPublicKey",
            Operation::ListKeys => "listKeys",
            Operation::CreateKey => "createKey",
            Operation::DeleteKey => "deleteKey",
            Operation::Probe => "testConnection",
        };
        f.write_str(name)
    }
}

/// Classification of a backend failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Network failure or timeout before a response arrived.
    Transport,
    /// Credentials missing, expired or rejected.
    Unauthenticated,
    /// Credentials accepted, operation denied.
    Forbidden,
    NotFound,
    /// Any other refusal: wrong key usage, disabled key, bad argument.
    Rejected,
    Throttled,
    /// Backend reported itself unavailable (5xx or equivalent).
    Unavailable,
    /// Response could not be decoded.
    Malformed,
    /// Native library or client missing.
    DependencyMissing,
}

impl FaultKind {
    /// Default classification of an HTTP error status.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => FaultKind::Unauthenticated,
            403 => FaultKind::Forbidden,
            404 => FaultKind::NotFound,
            429 => FaultKind::Throttled,
            500..=599 => FaultKind::Unavailable,
            _ => FaultKind::Rejected,
        }
    }
}

/// A backend failure as reported by the provider, before mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFault {
    pub kind: FaultKind,
    /// Provider-native error code, e.g. `NotFoundException`.
    pub code: String,
    pub message: String,
}

impl ProviderFault {
    pub fn new(kind: FaultKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Transport, "", message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Malformed, "", message)
    }

    pub fn dependency_missing(message: impl Into<String>) -> Self {
        Self::new(FaultKind::DependencyMissing, "", message)
    }

    fn detail(&self) -> String {
        if self.code.is_empty() {
            self.message.clone()
        } else {
            format!("{}: {}", self.code, self.message)
        }
    }

    /// Map to the public taxonomy.
    ///
    /// `key_id` names the key the call addressed, if any; a not-found fault
    /// without one is reported as a failed operation.
    pub fn into_error(self, provider: ProviderTag, operation: Operation, key_id: Option<&str>) -> HsmError {
        let message = self.detail();
        match (self.kind, operation) {
            (FaultKind::DependencyMissing, _) => HsmError::DependencyUnavailable {
                provider,
                dependency: message,
            },
            (FaultKind::Malformed, _) => HsmError::InvalidResponse { provider, message },
            (FaultKind::Transport | FaultKind::Unauthenticated | FaultKind::Unavailable, _) => {
                HsmError::Connection { provider, message }
            }
            (_, Operation::Initialize | Operation::Probe) => {
                HsmError::Connection { provider, message }
            }
            (FaultKind::Forbidden, _) => HsmError::Authentication { provider, message },
            (FaultKind::NotFound, _) => match key_id {
                Some(key_id) => HsmError::KeyNotFound {
                    provider,
                    key_id: key_id.to_string(),
                },
                None => HsmError::Operation {
                    provider,
                    operation,
                    message,
                },
            },
            (FaultKind::Rejected | FaultKind::Throttled, Operation::Sign) => {
                HsmError::Signing { provider, message }
            }
            (FaultKind::Rejected | FaultKind::Throttled, _) => HsmError::Operation {
                provider,
                operation,
                message,
            },
        }
    }
}

impl fmt::Display for ProviderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail())
    }
}

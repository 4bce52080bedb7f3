//! # TSA Domain Entities
//!
//! Endpoint configuration, request/response values and the per-request
//! state machine.

use shared_types::{HashAlgorithm, MessageImprint, Timestamp};
use std::fmt;
use std::time::Duration;

/// Default per-call timeout.
pub const DEFAULT_TSA_TIMEOUT: Duration = Duration::from_secs(30);

/// One timestamp server.
#[derive(Clone, PartialEq, Eq)]
pub struct TsaConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Applies to the whole exchange: connect, send, receive.
    pub timeout: Duration,
}

impl TsaConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout: DEFAULT_TSA_TIMEOUT,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for TsaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsaConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A primary TSA followed by fallbacks, tried in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverConfig {
    pub primary: TsaConfig,
    pub fallbacks: Vec<TsaConfig>,
}

impl FailoverConfig {
    pub fn new(primary: TsaConfig) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_fallback(mut self, fallback: TsaConfig) -> Self {
        self.fallbacks.push(fallback);
        self
    }

    /// Primary first, then fallbacks in order.
    pub fn servers(&self) -> impl Iterator<Item = &TsaConfig> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }
}

/// How to build a `TimeStampReq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequestOptions {
    pub hash_algorithm: HashAlgorithm,
    /// Include a random 64-bit nonce. On by default.
    pub include_nonce: bool,
    /// Requested TSA policy, dotted OID.
    pub policy_oid: Option<String>,
    /// Ask the TSA to include its certificate. On by default.
    pub cert_req: bool,
}

impl Default for TimestampRequestOptions {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            include_nonce: true,
            policy_oid: None,
            cert_req: true,
        }
    }
}

/// An encoded `TimeStampReq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampRequest {
    pub message_imprint: MessageImprint,
    pub nonce: Option<Vec<u8>>,
    pub policy_oid: Option<String>,
    pub cert_req: bool,
    pub der: Vec<u8>,
}

/// `PKIStatus` values from RFC 3161.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkiStatus {
    Granted,
    GrantedWithMods,
    Rejection,
    Waiting,
    RevocationWarning,
    RevocationNotification,
    Unknown(u32),
}

impl PkiStatus {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Granted,
            1 => Self::GrantedWithMods,
            2 => Self::Rejection,
            3 => Self::Waiting,
            4 => Self::RevocationWarning,
            5 => Self::RevocationNotification,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Granted => 0,
            Self::GrantedWithMods => 1,
            Self::Rejection => 2,
            Self::Waiting => 3,
            Self::RevocationWarning => 4,
            Self::RevocationNotification => 5,
            Self::Unknown(code) => *code,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted | Self::GrantedWithMods)
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => f.write_str("granted"),
            Self::GrantedWithMods => f.write_str("grantedWithMods"),
            Self::Rejection => f.write_str("rejection"),
            Self::Waiting => f.write_str("waiting"),
            Self::RevocationWarning => f.write_str("revocationWarning"),
            Self::RevocationNotification => f.write_str("revocationNotification"),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// Lifecycle of one request to one TSA.
///
/// ```text
/// Building ──► Sent ──► Granted
///                  ├──► GrantedWithMods
///                  ├──► Rejected
///                  └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Building,
    Sent,
    Granted,
    GrantedWithMods,
    Rejected,
    Failed,
}

impl RequestState {
    /// `Building -> Sent`. Any other state is returned unchanged.
    pub fn send(self) -> Self {
        match self {
            Self::Building => Self::Sent,
            other => other,
        }
    }

    /// `Sent -> terminal` on a decoded response status.
    pub fn on_status(self, status: PkiStatus) -> Self {
        if self != Self::Sent {
            return self;
        }
        match status {
            PkiStatus::Granted => Self::Granted,
            PkiStatus::GrantedWithMods => Self::GrantedWithMods,
            PkiStatus::Rejection => Self::Rejected,
            _ => Self::Failed,
        }
    }

    /// `Building | Sent -> Failed` on transport or decoding failure.
    pub fn fail(self) -> Self {
        match self {
            Self::Building | Self::Sent => Self::Failed,
            other => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Building | Self::Sent)
    }

    /// Terminal states that carry a usable timestamp.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Granted | Self::GrantedWithMods)
    }
}

/// A granted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampResponse {
    pub status: PkiStatus,
    pub state: RequestState,
    pub status_text: Vec<String>,
    pub timestamp: Timestamp,
    /// Full DER `TimeStampResp`.
    pub der: Vec<u8>,
}

/// Outcome of checking a timestamp against the data it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampVerification {
    pub is_valid: bool,
    /// The recomputed imprint equals the token's imprint.
    pub imprint_valid: bool,
    /// `None` when the token carries no TSA certificate.
    pub signature_valid: Option<bool>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

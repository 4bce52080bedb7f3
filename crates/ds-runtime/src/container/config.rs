//! # Signing Configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment.
//!
//! ```toml
//! timeout_secs = 30
//! retry_attempts = 2
//! hash_algorithm = "SHA256"
//! trust_anchors = ["/etc/docseal/roots.pem"]
//!
//! [tsa]
//! url = "https://freetsa.org/tsr"
//! fallback_urls = ["http://timestamp.digicert.com"]
//!
//! [providers.pkcs11]
//! library_path = "/usr/lib/softhsm/libsofthsm2.so"
//! pin = "1234"
//! ```
//!
//! Secrets never appear in `Debug` output.

use ds_02_hsm_providers::{AwsKmsConfig, AzureKeyVaultConfig, GcpKmsConfig, Pkcs11Config};
use ds_04_timestamp_authority::{FailoverConfig, TimestampRequestOptions, TsaConfig};
use serde::Deserialize;
use shared_types::{HashAlgorithm, X509Certificate};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("invalid configuration file: {0}")]
    Parse(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("empty TSA URL")]
    EmptyTsaUrl,

    #[error("TSA fallbacks configured without a primary URL")]
    FallbacksWithoutPrimary,

    #[error("trust anchor {path}: {message}")]
    TrustAnchor { path: PathBuf, message: String },
}

/// Timestamp servers.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TsaSettings {
    pub url: Option<String>,
    /// Tried in order after `url`.
    pub fallback_urls: Vec<String>,
    /// Basic auth for `url` only.
    pub username: Option<String>,
    pub password: Option<String>,
    /// Requested policy, dotted OID.
    pub policy_oid: Option<String>,
}

impl fmt::Debug for TsaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsaSettings")
            .field("url", &self.url)
            .field("fallback_urls", &self.fallback_urls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("policy_oid", &self.policy_oid)
            .finish()
    }
}

/// Credentials per key custodian. Absent sections are not registered.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub aws: Option<AwsKmsConfig>,
    pub gcp: Option<GcpKmsConfig>,
    pub azure: Option<AzureKeyVaultConfig>,
    pub pkcs11: Option<Pkcs11Config>,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Per-call limit for TSA and provider requests.
    pub timeout_secs: u64,
    /// Attempts callers may make for idempotent operations. The engine and
    /// adapters never retry on their own.
    pub retry_attempts: u32,
    /// Digest for RSA signatures and document timestamps.
    pub hash_algorithm: HashAlgorithm,
    /// PEM files holding trusted roots.
    pub trust_anchors: Vec<PathBuf>,
    pub tsa: TsaSettings,
    pub providers: ProviderSettings,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_attempts: 0,
            hash_algorithm: HashAlgorithm::Sha256,
            trust_anchors: Vec::new(),
            tsa: TsaSettings::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl SigningConfig {
    /// File (if any), then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply environment overrides. A provider section is created from the
    /// environment only when all of its required variables are present.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(url) = lookup("DS_TSA_URL") {
            self.tsa.url = Some(url);
        }
        if let Some(urls) = lookup("DS_TSA_FALLBACK_URLS") {
            self.tsa.fallback_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(username) = lookup("DS_TSA_USERNAME") {
            self.tsa.username = Some(username);
        }
        if let Some(password) = lookup("DS_TSA_PASSWORD") {
            self.tsa.password = Some(password);
        }
        if let Some(value) = lookup("DS_TIMEOUT_SECS") {
            self.timeout_secs = parse("DS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("DS_RETRY_ATTEMPTS") {
            self.retry_attempts = parse("DS_RETRY_ATTEMPTS", &value)?;
        }

        self.apply_aws_env(&lookup);
        self.apply_gcp_env(&lookup);
        self.apply_azure_env(&lookup);
        self.apply_pkcs11_env(&lookup)
    }

    fn apply_aws_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let (region, key_id, secret) = (
            lookup("AWS_REGION"),
            lookup("AWS_ACCESS_KEY_ID"),
            lookup("AWS_SECRET_ACCESS_KEY"),
        );
        match self.providers.aws.as_mut() {
            Some(aws) => {
                override_with(&mut aws.region, region);
                override_with(&mut aws.access_key_id, key_id);
                override_with(&mut aws.secret_access_key, secret);
            }
            None => match (region, key_id, secret) {
                (Some(region), Some(key_id), Some(secret)) => {
                    self.providers.aws = Some(AwsKmsConfig::new(region, key_id, secret));
                }
                _ => return,
            },
        }
        if let (Some(aws), Some(token)) = (self.providers.aws.as_mut(), lookup("AWS_SESSION_TOKEN")) {
            aws.session_token = Some(token);
        }
    }

    fn apply_gcp_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let (project, location, key_ring, token) = (
            lookup("GCP_PROJECT_ID"),
            lookup("GCP_LOCATION"),
            lookup("GCP_KEY_RING"),
            lookup("GOOGLE_OAUTH_ACCESS_TOKEN"),
        );
        match self.providers.gcp.as_mut() {
            Some(gcp) => {
                override_with(&mut gcp.project_id, project);
                override_with(&mut gcp.location, location);
                override_with(&mut gcp.key_ring, key_ring);
                override_with(&mut gcp.access_token, token);
            }
            None => {
                if let (Some(project), Some(location), Some(key_ring), Some(token)) =
                    (project, location, key_ring, token)
                {
                    self.providers.gcp = Some(GcpKmsConfig::new(project, location, key_ring, token));
                }
            }
        }
    }

    fn apply_azure_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let (vault, tenant, client, secret) = (
            lookup("AZURE_VAULT_URL"),
            lookup("AZURE_TENANT_ID"),
            lookup("AZURE_CLIENT_ID"),
            lookup("AZURE_CLIENT_SECRET"),
        );
        match self.providers.azure.as_mut() {
            Some(azure) => {
                override_with(&mut azure.vault_url, vault);
                override_with(&mut azure.tenant_id, tenant);
                override_with(&mut azure.client_id, client);
                override_with(&mut azure.client_secret, secret);
            }
            None => {
                if let (Some(vault), Some(tenant), Some(client), Some(secret)) = (vault, tenant, client, secret) {
                    self.providers.azure = Some(AzureKeyVaultConfig::new(vault, tenant, client, secret));
                }
            }
        }
    }

    fn apply_pkcs11_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let slot = lookup("PKCS11_SLOT")
            .map(|value| parse::<u64>("PKCS11_SLOT", &value))
            .transpose()?;
        let (library, pin) = (lookup("PKCS11_LIBRARY_PATH"), lookup("PKCS11_PIN"));
        match self.providers.pkcs11.as_mut() {
            Some(pkcs11) => {
                if let Some(library) = library {
                    pkcs11.library_path = library.into();
                }
                override_with(&mut pkcs11.pin, pin);
            }
            None => match (library, pin) {
                (Some(library), Some(pin)) => {
                    self.providers.pkcs11 = Some(Pkcs11Config::new(library, pin));
                }
                _ => return Ok(()),
            },
        }
        if let (Some(pkcs11), Some(slot)) = (self.providers.pkcs11.as_mut(), slot) {
            pkcs11.slot = Some(slot);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let empty = |url: &String| url.trim().is_empty();
        if self.tsa.url.as_ref().is_some_and(empty) || self.tsa.fallback_urls.iter().any(empty) {
            return Err(ConfigError::EmptyTsaUrl);
        }
        if self.tsa.url.is_none() && !self.tsa.fallback_urls.is_empty() {
            return Err(ConfigError::FallbacksWithoutPrimary);
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Ordered TSA list, if a primary is configured.
    pub fn failover(&self) -> Option<FailoverConfig> {
        let url = self.tsa.url.as_ref()?;
        let mut primary = TsaConfig::new(url).with_timeout(self.timeout());
        if let (Some(username), Some(password)) = (&self.tsa.username, &self.tsa.password) {
            primary = primary.with_credentials(username, password);
        }
        Some(
            self.tsa
                .fallback_urls
                .iter()
                .fold(FailoverConfig::new(primary), |failover, url| {
                    failover.with_fallback(TsaConfig::new(url).with_timeout(self.timeout()))
                }),
        )
    }

    pub fn timestamp_options(&self) -> TimestampRequestOptions {
        TimestampRequestOptions {
            hash_algorithm: self.hash_algorithm,
            policy_oid: self.tsa.policy_oid.clone(),
            ..TimestampRequestOptions::default()
        }
    }

    /// Every certificate in every trust-anchor file.
    pub fn load_trust_anchors(&self) -> Result<Vec<X509Certificate>, ConfigError> {
        let mut anchors = Vec::new();
        for path in &self.trust_anchors {
            let anchor_error = |message: String| ConfigError::TrustAnchor {
                path: path.clone(),
                message,
            };
            let pem = std::fs::read_to_string(path).map_err(|e| anchor_error(e.to_string()))?;
            let certificates = X509Certificate::bundle_from_pem(&pem).map_err(|e| anchor_error(e.to_string()))?;
            if certificates.is_empty() {
                return Err(anchor_error("no certificates".into()));
            }
            anchors.extend(certificates);
        }
        Ok(anchors)
    }
}

fn override_with(field: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

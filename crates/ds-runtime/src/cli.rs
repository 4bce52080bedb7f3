//! # `ds-sign` Commands
//!
//! ```text
//! ds-sign sign contract.pdf --cert signer.pem --key signer.key -o contract.p7s
//! ds-sign sign contract.pdf --cert signer.pem --hsm aws:alias/signing -o contract.p7s --timestamp
//! ds-sign verify contract.p7s --content contract.pdf
//! ds-sign timestamp contract.pdf -o contract.tsr
//! ds-sign providers
//! ds-sign keys pkcs11
//! ```
//!
//! Results go to stdout, logs to stderr.

use crate::container::{http_gateway, DocSealContainer, SigningConfig};
use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use ds_01_signature_engine::{parse_cms, SignatureEngineApi, SignatureError, SignatureOptions};
use ds_03_hsm_integration::HsmIntegrationApi;
use ds_04_timestamp_authority::TsaError;
use shared_types::{
    HashAlgorithm, HsmKeyReference, PrivateKey, ProviderTag, SignatureValidationResult, SigningAlgorithm,
    X509Certificate,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Sign, verify and timestamp documents with local keys or HSM-held keys.
#[derive(Parser, Debug)]
#[command(name = "ds-sign", version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "DS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level; twice for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Filter override for `-v`, if given.
    pub fn log_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a CMS signature over a file
    Sign(SignArgs),
    /// Validate a CMS signature
    Verify(VerifyArgs),
    /// Obtain an RFC 3161 timestamp token for a file
    Timestamp(TimestampArgs),
    /// Probe every configured HSM provider
    Providers {
        #[arg(long)]
        json: bool,
    },
    /// List signing keys held by one provider
    Keys {
        /// aws-kms, gcp-kms, azure-keyvault or pkcs11
        provider: ProviderTag,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Document to sign
    pub input: PathBuf,

    /// Signer certificate, PEM. Further certificates in the file are bundled
    /// as intermediates.
    #[arg(long)]
    pub cert: PathBuf,

    /// PKCS#8 or PKCS#1 private key, PEM
    #[arg(long, required_unless_present = "hsm", conflicts_with = "hsm")]
    pub key: Option<PathBuf>,

    /// Provider-held key as `provider:key-id`, e.g. `pkcs11:doc-signer`
    #[arg(long, value_parser = parse_key_reference)]
    pub hsm: Option<HsmKeyReference>,

    /// Key version for providers that version keys
    #[arg(long, requires = "hsm")]
    pub key_version: Option<String>,

    /// Where to write the signature
    #[arg(short, long)]
    pub output: PathBuf,

    /// Include the document in the signature
    #[arg(long)]
    pub attached: bool,

    /// Timestamp the signature value
    #[arg(long)]
    pub timestamp: bool,

    /// Use this TSA instead of the configured list. Implies `--timestamp`.
    #[arg(long)]
    pub tsa_url: Option<String>,

    /// Digest for RSA keys: sha256, sha384 or sha512
    #[arg(long, value_parser = parse_hash)]
    pub hash: Option<HashAlgorithm>,

    /// Explicit signature algorithm, e.g. RSA_PSS_SHA256
    #[arg(long)]
    pub algorithm: Option<SigningAlgorithm>,

    /// Write PEM instead of DER
    #[arg(long)]
    pub pem: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// CMS signature, DER or PEM
    pub signature: PathBuf,

    /// Signed document, for detached signatures
    #[arg(long)]
    pub content: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TimestampArgs {
    /// Document to timestamp
    pub input: PathBuf,

    /// Where to write the DER timestamp token
    #[arg(short, long)]
    pub output: PathBuf,

    /// Use this TSA instead of the configured list
    #[arg(long)]
    pub tsa_url: Option<String>,
}

/// `provider:key-id`. Only the first colon separates, so ARNs pass intact.
pub fn parse_key_reference(value: &str) -> Result<HsmKeyReference, String> {
    let (provider, key_id) = value
        .split_once(':')
        .ok_or_else(|| format!("expected provider:key-id, got {value}"))?;
    if key_id.is_empty() {
        return Err("empty key id".to_string());
    }
    Ok(HsmKeyReference::new(provider.parse()?, key_id))
}

pub fn parse_hash(value: &str) -> Result<HashAlgorithm, String> {
    match value.to_ascii_lowercase().replace('-', "").as_str() {
        "sha256" => Ok(HashAlgorithm::Sha256),
        "sha384" => Ok(HashAlgorithm::Sha384),
        "sha512" => Ok(HashAlgorithm::Sha512),
        other => Err(format!("unsupported hash: {other}")),
    }
}

/// Execute one command. `Ok(false)` means a signature failed validation.
pub async fn run(cli: Cli) -> Result<bool> {
    let config = SigningConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let gateway = http_gateway(&config)?;
    let container = DocSealContainer::with_gateway(config, gateway)?;

    match cli.command {
        Command::Sign(args) => sign(&container, args).await,
        Command::Verify(args) => verify(&container, args),
        Command::Timestamp(args) => timestamp(&container, args).await,
        Command::Providers { json } => providers(&container, json).await,
        Command::Keys { provider, json } => keys(&container, provider, json).await,
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn read_certificates(path: &Path) -> Result<(X509Certificate, Vec<X509Certificate>)> {
    let pem = String::from_utf8(read(path)?).with_context(|| format!("{} is not PEM", path.display()))?;
    let mut certificates = X509Certificate::bundle_from_pem(&pem)?.into_iter();
    let signer = certificates
        .next()
        .ok_or_else(|| anyhow!("no certificate in {}", path.display()))?;
    Ok((signer, certificates.collect()))
}

async fn sign(container: &DocSealContainer, args: SignArgs) -> Result<bool> {
    let document = read(&args.input)?;
    let (certificate, intermediates) = read_certificates(&args.cert)?;
    let options = SignatureOptions {
        hash_algorithm: args.hash.unwrap_or(container.config.hash_algorithm),
        algorithm: args.algorithm,
        detached: !args.attached,
        extra_certificates: intermediates,
        timestamp: args.timestamp || args.tsa_url.is_some(),
        tsa_url: args.tsa_url,
        ..SignatureOptions::default()
    };

    let signature = match (args.hsm, args.key) {
        (Some(mut reference), _) => {
            if let Some(version) = args.key_version {
                reference = reference.with_version(version);
            }
            container.register_configured_providers().await;
            container
                .manager
                .sign_with_hsm(&document, &reference, &certificate, &options)
                .await?
        }
        (None, Some(key_path)) => {
            let pem = String::from_utf8(read(&key_path)?).context("private key is not PEM")?;
            let key = PrivateKey::from_pem(&pem)?;
            container
                .engine
                .create_signature(&document, &certificate, &key, &options)
                .await?
        }
        (None, None) => bail!("either --key or --hsm is required"),
    };

    if args.pem {
        write(&args.output, signature.to_pem()?.as_bytes())?;
    } else {
        write(&args.output, signature.to_der())?;
    }
    info!(
        output = %args.output.display(),
        algorithm = %signature.signer_info.signature_algorithm,
        timestamped = signature.timestamp.is_some(),
        "Signature written"
    );
    Ok(true)
}

fn verify(container: &DocSealContainer, args: VerifyArgs) -> Result<bool> {
    let signature = parse_cms(&read(&args.signature)?)?;
    let result = match &args.content {
        Some(path) => container.engine.validate_detached_signature(&signature, &read(path)?)?,
        None => container.engine.validate_signature(&signature)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_validation(&result));
    }
    Ok(result.is_valid)
}

fn render_validation(result: &SignatureValidationResult) -> String {
    let verdict = |ok: bool| if ok { "ok" } else { "FAILED" };
    let mut out = format!("signature: {}\n", if result.is_valid { "VALID" } else { "INVALID" });
    if let Some(subject) = &result.signer_subject {
        out.push_str(&format!("  signer:      {subject}\n"));
    }
    if let Some(time) = result.signing_time {
        out.push_str(&format!("  signed at:   {}\n", time.to_rfc3339()));
    }
    out.push_str(&format!("  integrity:   {}\n", verdict(result.document_integrity_valid)));
    out.push_str(&format!("  signature:   {}\n", verdict(result.signature_valid)));
    out.push_str(&format!("  certificate: {}\n", verdict(result.certificate.is_valid)));
    if let Some(valid) = result.timestamp_valid {
        let at = result.timestamp_time.map(|t| t.to_rfc3339()).unwrap_or_default();
        out.push_str(&format!("  timestamp:   {} {at}\n", verdict(valid)));
    }
    for error in &result.errors {
        out.push_str(&format!("  error: {error}\n"));
    }
    for warning in &result.warnings {
        out.push_str(&format!("  warning: {warning}\n"));
    }
    out
}

async fn timestamp(container: &DocSealContainer, args: TimestampArgs) -> Result<bool> {
    let document = read(&args.input)?;
    let tsa_url = args.tsa_url.as_deref();
    let timestamp = retry_unreachable(container.config.retry_attempts, || {
        container.engine.timestamp_document(&document, tsa_url)
    })
    .await?;

    write(&args.output, &timestamp.token_der)?;
    println!(
        "{} serial={} tsa={}",
        timestamp.issued_at.to_rfc3339(),
        timestamp.serial_hex(),
        timestamp.tsa_name
    );
    Ok(true)
}

/// Repeat `call` while the TSA is unreachable, up to `retries` extra times.
/// Protocol rejections and validation failures are returned at once.
pub async fn retry_unreachable<T, F, Fut>(retries: u32, mut call: F) -> Result<T, SignatureError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SignatureError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Err(SignatureError::TimestampServer(TsaError::Connection { url, message })) if attempt < retries => {
                attempt += 1;
                warn!(url = %url, error = %message, attempt, "TSA unreachable, retrying");
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

async fn providers(container: &DocSealContainer, json: bool) -> Result<bool> {
    container.register_configured_providers().await;
    let statuses = container.manager.provider_status().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else if statuses.is_empty() {
        println!("no providers configured");
    } else {
        for status in &statuses {
            let state = if status.available { "available" } else { "unavailable" };
            println!("{:<16} {state}", status.provider);
        }
    }
    Ok(true)
}

async fn keys(container: &DocSealContainer, provider: ProviderTag, json: bool) -> Result<bool> {
    container.register_configured_providers().await;
    let keys = container.manager.list_keys(provider).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&keys)?);
    } else {
        for key in &keys {
            println!(
                "{}\t{:?}-{}\t{}",
                key.key_id,
                key.key_algorithm,
                key.key_size,
                if key.enabled { "enabled" } else { "disabled" }
            );
        }
    }
    Ok(true)
}

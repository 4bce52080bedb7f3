//! # X.509 Certificates
//!
//! Parsed, immutable view of an X.509 certificate with the fields the
//! signature engine needs for chain building and policy checks.

use crate::errors::CertificateError;
use crate::keys::PublicKey;
use crate::oids;
use chrono::{DateTime, TimeZone, Utc};
use der::{Decode, Encode};
use sha2::{Digest, Sha256};
use std::fmt;
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage};
use x509_cert::Certificate;

/// A single certificate extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateExtension {
    /// Dotted OID string.
    pub oid: String,
    pub critical: bool,
    /// DER contents of the `extnValue` octet string.
    pub value: Vec<u8>,
}

/// Parsed X.509 certificate.
#[derive(Clone)]
pub struct X509Certificate {
    /// RFC 4514 subject distinguished name.
    pub subject: String,
    /// RFC 4514 issuer distinguished name.
    pub issuer: String,
    /// Big-endian serial number bytes.
    pub serial_number: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key: PublicKey,
    /// SHA-256 over the DER encoding.
    pub fingerprint: [u8; 32],
    pub extensions: Vec<CertificateExtension>,
    /// Key usage names (`digitalSignature`, `nonRepudiation`, ...).
    pub key_usage: Vec<String>,
    /// Basic constraints `cA` flag.
    pub is_ca: bool,
    der: Vec<u8>,
    inner: Certificate,
}

impl X509Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, CertificateError> {
        let inner = Certificate::from_der(der)?;
        let tbs = &inner.tbs_certificate;

        let spki_der = tbs.subject_public_key_info.to_der()?;
        let public_key = PublicKey::from_spki_der(&spki_der)?;

        let not_before = to_datetime(tbs.validity.not_before.to_unix_duration())?;
        let not_after = to_datetime(tbs.validity.not_after.to_unix_duration())?;

        let mut extensions = Vec::new();
        let mut key_usage = Vec::new();
        let mut is_ca = false;
        for ext in tbs.extensions.iter().flatten() {
            let value = ext.extn_value.as_bytes();
            if ext.extn_id == oids::ID_CE_KEY_USAGE {
                let usage = KeyUsage::from_der(value)?;
                key_usage = key_usage_names(&usage);
            } else if ext.extn_id == oids::ID_CE_BASIC_CONSTRAINTS {
                is_ca = BasicConstraints::from_der(value)?.ca;
            }
            extensions.push(CertificateExtension {
                oid: ext.extn_id.to_string(),
                critical: ext.critical,
                value: value.to_vec(),
            });
        }

        Ok(Self {
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial_number: tbs.serial_number.as_bytes().to_vec(),
            not_before,
            not_after,
            public_key,
            fingerprint: Sha256::digest(der).into(),
            extensions,
            key_usage,
            is_ca,
            der: der.to_vec(),
            inner,
        })
    }

    /// Parse the first `CERTIFICATE` block of a PEM document.
    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        Self::bundle_from_pem(pem)?
            .into_iter()
            .next()
            .ok_or_else(|| CertificateError::InvalidPem("no CERTIFICATE block".into()))
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle, in file order.
    pub fn bundle_from_pem(pem: &str) -> Result<Vec<Self>, CertificateError> {
        let certs = Certificate::load_pem_chain(pem.as_bytes())
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))?;
        certs
            .iter()
            .map(|cert| Self::from_der(&cert.to_der()?))
            .collect()
    }

    /// Raw DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding.
    pub fn to_pem(&self) -> Result<String, CertificateError> {
        der::pem::encode_string("CERTIFICATE", der::pem::LineEnding::LF, &self.der)
            .map_err(|e| CertificateError::InvalidPem(e.to_string()))
    }

    /// The underlying `x509-cert` structure.
    pub fn as_x509(&self) -> &Certificate {
        &self.inner
    }

    /// Whether `at` falls inside `[not_before, not_after]`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.not_before && at <= self.not_after
    }

    /// Issuer and subject names are equal.
    pub fn is_self_issued(&self) -> bool {
        self.issuer == self.subject
    }

    /// Key usage permits document signing.
    pub fn allows_signing(&self) -> bool {
        self.key_usage
            .iter()
            .any(|u| u == "digitalSignature" || u == "nonRepudiation")
    }

    /// Uppercase hex SHA-256 fingerprint.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode_upper(self.fingerprint)
    }

    /// Uppercase hex serial number.
    pub fn serial_hex(&self) -> String {
        hex::encode_upper(&self.serial_number)
    }
}

impl PartialEq for X509Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for X509Certificate {}

impl fmt::Debug for X509Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial_hex())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("public_key", &self.public_key)
            .finish()
    }
}

fn to_datetime(since_epoch: std::time::Duration) -> Result<DateTime<Utc>, CertificateError> {
    Utc.timestamp_opt(since_epoch.as_secs() as i64, 0)
        .single()
        .ok_or_else(|| CertificateError::Malformed("validity time out of range".into()))
}

fn key_usage_names(usage: &KeyUsage) -> Vec<String> {
    let flags = [
        (usage.digital_signature(), "digitalSignature"),
        (usage.non_repudiation(), "nonRepudiation"),
        (usage.key_encipherment(), "keyEncipherment"),
        (usage.data_encipherment(), "dataEncipherment"),
        (usage.key_agreement(), "keyAgreement"),
        (usage.key_cert_sign(), "keyCertSign"),
        (usage.crl_sign(), "cRLSign"),
    ];
    flags
        .into_iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| name.to_string())
        .collect()
}

//! # AWS Signature Version 4
//!
//! Request signing for the KMS JSON protocol. Only what KMS needs: a
//! single canonical path, an optional pre-encoded query, and a fully
//! buffered payload.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The parts of a request that the signature covers.
pub(crate) struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Already sorted and percent-encoded.
    pub query: &'a str,
    /// Lowercase names; values are trimmed when rendered.
    pub headers: BTreeMap<String, String>,
    pub payload: &'a [u8],
}

impl CanonicalRequest<'_> {
    pub fn signed_headers(&self) -> String {
        self.headers.keys().cloned().collect::<Vec<_>>().join(";")
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.method);
        out.push('\n');
        out.push_str(self.path);
        out.push('\n');
        out.push_str(self.query);
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push(':');
            out.push_str(value.trim());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.signed_headers());
        out.push('\n');
        out.push_str(&hex::encode(Sha256::digest(self.payload)));
        out
    }
}

/// Credential scope of one signature.
pub(crate) struct Scope<'a> {
    pub date: &'a str,
    pub region: &'a str,
    pub service: &'a str,
}

impl Scope<'_> {
    fn render(&self) -> String {
        format!("{}/{}/{}/aws4_request", self.date, self.region, self.service)
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub(crate) fn signing_key(secret: &str, scope: &Scope<'_>) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret}").as_bytes(), scope.date.as_bytes());
    let k_region = hmac(&k_date, scope.region.as_bytes());
    let k_service = hmac(&k_region, scope.service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

pub(crate) fn string_to_sign(amz_date: &str, scope: &Scope<'_>, canonical: &CanonicalRequest<'_>) -> String {
    format!(
        "{ALGORITHM}\n{amz_date}\n{}\n{}",
        scope.render(),
        hex::encode(Sha256::digest(canonical.render().as_bytes()))
    )
}

/// `Authorization` header value for a canonical request.
pub(crate) fn authorization(
    access_key_id: &str,
    secret_access_key: &str,
    amz_date: &str,
    scope: &Scope<'_>,
    canonical: &CanonicalRequest<'_>,
) -> String {
    let key = signing_key(secret_access_key, scope);
    let signature = hex::encode(hmac(&key, string_to_sign(amz_date, scope, canonical).as_bytes()));
    format!(
        "{ALGORITHM} Credential={access_key_id}/{}, SignedHeaders={}, Signature={signature}",
        scope.render(),
        canonical.signed_headers()
    )
}

/// `x-amz-date` value and the date part of the scope.
pub(crate) fn timestamps(now: DateTime<Utc>) -> (String, String) {
    (
        now.format("%Y%m%dT%H%M%SZ").to_string(),
        now.format("%Y%m%d").to_string(),
    )
}

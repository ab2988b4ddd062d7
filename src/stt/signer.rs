// src/stt/signer.rs
// Per-request authentication signature

use super::SttError;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::Credentials;

type HmacSha1 = Hmac<Sha1>;

/// Compute the request signature for a given timestamp.
///
/// The scheme: md5-hex the app id concatenated with the decimal timestamp,
/// HMAC-SHA1 that hex string (as UTF-8 bytes) keyed by the shared secret,
/// base64 the MAC. Deterministic over its inputs; a request is only valid
/// for the timestamp it was signed with.
pub fn sign(app_id: &str, secret: &str, ts: i64) -> Result<String, SttError> {
    if app_id.is_empty() {
        return Err(SttError::Config("app id is empty".to_string()));
    }
    if secret.is_empty() {
        return Err(SttError::Config("secret key is empty".to_string()));
    }

    let digest = format!("{:x}", md5::compute(format!("{}{}", app_id, ts)));

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
        .map_err(|e| SttError::Config(format!("unusable secret key: {}", e)))?;
    mac.update(digest.as_bytes());

    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Authentication fields attached to every remote call. Built fresh per
/// request; never reused, since the timestamp is part of the signature.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub app_id: String,
    pub ts: String,
    pub signa: String,
}

impl SigningContext {
    /// Sign with the current unix time.
    pub fn new(credentials: &Credentials) -> Result<Self, SttError> {
        Self::at_timestamp(credentials, Utc::now().timestamp())
    }

    /// Sign with an explicit timestamp.
    pub fn at_timestamp(credentials: &Credentials, ts: i64) -> Result<Self, SttError> {
        let signa = sign(&credentials.app_id, &credentials.secret, ts)?;
        Ok(Self {
            app_id: credentials.app_id.clone(),
            ts: ts.to_string(),
            signa,
        })
    }
}

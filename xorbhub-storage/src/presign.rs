//! Presigned download URLs
//!
//! Backends without native presigning (memory, local filesystem) hand out
//! capability URLs served by the gateway's `/objects/{key}` route:
//!
//! `{base}/objects/{key}?expires={unix}&sig={hex}[&range={start}-{end}]`
//!
//! The signature is a Blake3 keyed hash over key, expiry and range, so a URL
//! cannot be retargeted to another object or widened to another range.

use rand::RngCore;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use xorbhub_core::HttpRange;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("URL expired")]
    Expired,

    #[error("Invalid signature")]
    Invalid,

    #[error("Malformed range: {0}")]
    MalformedRange(String),
}

/// Query parameters carried by a presigned URL
#[derive(Debug, Clone, Deserialize)]
pub struct SignedQuery {
    pub expires: u64,
    pub sig: String,
    #[serde(default)]
    pub range: Option<String>,
}

/// Signs and verifies object URLs
#[derive(Clone)]
pub struct UrlSigner {
    secret: [u8; 32],
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn range_param(range: Option<HttpRange>) -> String {
    range
        .map(|r| format!("{}-{}", r.start, r.end))
        .unwrap_or_default()
}

fn parse_range(raw: &str) -> Result<HttpRange, SignatureError> {
    let (start, end) = raw
        .split_once('-')
        .ok_or_else(|| SignatureError::MalformedRange(raw.to_string()))?;
    let start = start
        .parse()
        .map_err(|_| SignatureError::MalformedRange(raw.to_string()))?;
    let end = end
        .parse()
        .map_err(|_| SignatureError::MalformedRange(raw.to_string()))?;
    if end < start {
        return Err(SignatureError::MalformedRange(raw.to_string()));
    }
    Ok(HttpRange { start, end })
}

impl UrlSigner {
    pub fn new(secret: [u8; 32], base_url: impl Into<String>) -> Self {
        Self {
            secret,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Signer with a random per-process secret. URLs die with the process.
    pub fn ephemeral(base_url: impl Into<String>) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(secret, base_url)
    }

    /// Derive the secret from a configured passphrase
    pub fn from_passphrase(passphrase: &str, base_url: impl Into<String>) -> Self {
        let secret = blake3::derive_key("xorbhub presigned url v1", passphrase.as_bytes());
        Self::new(secret, base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn signature(&self, key: &str, expires: u64, range: &str) -> blake3::Hash {
        let message = format!("{}\n{}\n{}", key, expires, range);
        blake3::keyed_hash(&self.secret, message.as_bytes())
    }

    /// Build a URL for `key` valid for `expires_in`
    pub fn sign(&self, key: &str, expires_in: Duration, range: Option<HttpRange>) -> String {
        self.sign_at(key, unix_now() + expires_in.as_secs(), range)
    }

    /// Build a URL for `key` valid until the unix timestamp `expires`
    pub fn sign_at(&self, key: &str, expires: u64, range: Option<HttpRange>) -> String {
        let range = range_param(range);
        let sig = self.signature(key, expires, &range);
        let mut url = format!(
            "{}/objects/{}?expires={}&sig={}",
            self.base_url,
            key,
            expires,
            sig.to_hex()
        );
        if !range.is_empty() {
            url.push_str("&range=");
            url.push_str(&range);
        }
        url
    }

    /// Check a presented URL. Returns the signed byte range, if any.
    pub fn verify(&self, key: &str, query: &SignedQuery) -> Result<Option<HttpRange>, SignatureError> {
        self.verify_at(key, query, unix_now())
    }

    pub fn verify_at(
        &self,
        key: &str,
        query: &SignedQuery,
        now: u64,
    ) -> Result<Option<HttpRange>, SignatureError> {
        let range = query.range.as_deref().unwrap_or("");
        let presented = hex::decode(&query.sig)
            .ok()
            .and_then(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
            .map(blake3::Hash::from)
            .ok_or(SignatureError::Invalid)?;
        // blake3::Hash equality is constant time
        if presented != self.signature(key, query.expires, range) {
            return Err(SignatureError::Invalid);
        }
        if now > query.expires {
            return Err(SignatureError::Expired);
        }
        if range.is_empty() {
            Ok(None)
        } else {
            parse_range(range).map(Some)
        }
    }
}

/// Split a presigned URL into its object key and query
pub fn parse_signed_url(url: &str) -> Option<(String, SignedQuery)> {
    let (_, rest) = url.split_once("/objects/")?;
    let (key, query) = rest.split_once('?')?;
    let mut expires = None;
    let mut sig = None;
    let mut range = None;
    for pair in query.split('&') {
        match pair.split_once('=')? {
            ("expires", v) => expires = v.parse().ok(),
            ("sig", v) => sig = Some(v.to_string()),
            ("range", v) => range = Some(v.to_string()),
            _ => {}
        }
    }
    Some((
        key.to_string(),
        SignedQuery {
            expires: expires?,
            sig: sig?,
            range,
        },
    ))
}

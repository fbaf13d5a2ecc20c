//! Stripe webhook signature verification.
//!
//! The `stripe-signature` header has the form `t=<unix secs>,v1=<hex>[,v1=<hex>...]`.
//! Each `v1` value is an HMAC-SHA256 of `"<t>.<raw body>"` keyed by the
//! endpoint's signing secret; any one of them matching is enough.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Oldest accepted timestamp, in seconds before now.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Clock skew accepted for timestamps ahead of now.
pub const FUTURE_TOLERANCE_SECS: i64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing signature header")]
    MissingHeader,

    #[error("Invalid signature format")]
    Malformed,

    #[error("Invalid timestamp in signature")]
    InvalidTimestamp,

    #[error("Signature timestamp outside tolerance")]
    OutsideTolerance,

    #[error("Signature mismatch")]
    Mismatch,

    #[error("Invalid webhook secret")]
    InvalidSecret,
}

/// Computes the hex `v1` signature for a payload signed at `timestamp`.
pub fn compute_signature(
    secret: &str,
    timestamp: impl fmt::Display,
    payload: &[u8],
) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies `header` against `payload`, with `now` in unix seconds.
pub fn verify_signature(
    secret: &str,
    header: &str,
    payload: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            signatures.push(s);
        }
    }

    let raw_timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let timestamp: i64 = raw_timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    let age = now
        .checked_sub(timestamp)
        .ok_or(SignatureError::OutsideTolerance)?;
    if age > TIMESTAMP_TOLERANCE_SECS || age < -FUTURE_TOLERANCE_SECS {
        tracing::warn!(age, "webhook timestamp outside tolerance");
        return Err(SignatureError::OutsideTolerance);
    }

    let expected = compute_signature(secret, raw_timestamp, payload)?;
    let matched = signatures.iter().any(|candidate| {
        candidate.len() == expected.len()
            && bool::from(candidate.as_bytes().ct_eq(expected.as_bytes()))
    });
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

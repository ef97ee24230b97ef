//! `t=<unix>,v1=<hex>` webhook signatures: HMAC-SHA256 over `"<t>.<payload>"`.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("timestamp outside tolerance window")]
    OutsideTolerance,
    #[error("signature mismatch")]
    Mismatch,
    #[error("unusable signing secret")]
    InvalidKey,
}

fn keyed(secret: &str, timestamp: i64, payload: &str) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Header value for `payload` signed at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, payload: &str) -> Result<String, SignatureError> {
    let mac = keyed(secret, timestamp, payload)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Split a header into its timestamp and first `v1` signature.
pub fn parse_header(header: &str) -> Result<(i64, &str), SignatureError> {
    let mut timestamp = None;
    let mut v1 = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) if v1.is_none() => v1 = Some(value),
            _ => {}
        }
    }
    match (timestamp, v1) {
        (Some(t), Some(sig)) if !sig.is_empty() => Ok((t, sig)),
        _ => Err(SignatureError::MalformedHeader),
    }
}

/// Check `header` against `payload`. The timestamp must lie within
/// `tolerance` of `now` in either direction; the digest comparison is
/// constant-time.
pub fn verify(
    secret: &str,
    payload: &str,
    header: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), SignatureError> {
    let (timestamp, signature) = parse_header(header)?;
    if now.timestamp().abs_diff(timestamp) > tolerance.num_seconds().unsigned_abs() {
        return Err(SignatureError::OutsideTolerance);
    }
    let expected = hex::decode(signature).map_err(|_| SignatureError::Mismatch)?;
    keyed(secret, timestamp, payload)?
        .verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

// Webhook signatures: header `t=<unix>,v1=<hex hmac-sha256 of "t.payload">`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing webhook secret")]
    MissingSecret,
    #[error("malformed signature header: {0}")]
    MalformedHeader(String),
    #[error("timestamp {timestamp} outside tolerance of {tolerance}s")]
    TimestampTolerance { timestamp: i64, tolerance: i64 },
    #[error("signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::MalformedHeader(format!("HMAC init error: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produces the signature header value for `payload` at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Checks `header` against `payload`. `now` is unix seconds.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::MissingSecret);
    }

    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::MalformedHeader("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader(
            "no v1 signature found".to_string(),
        ));
    }

    let skew = now.checked_sub(timestamp).and_then(i64::checked_abs);
    if skew.is_none_or(|skew| skew > tolerance_seconds) {
        return Err(SignatureError::TimestampTolerance {
            timestamp,
            tolerance: tolerance_seconds,
        });
    }

    let valid = signatures.iter().any(|sig| {
        let Ok(bytes) = hex::decode(sig) else {
            return false;
        };
        // verify_slice compares in constant time
        mac_for(secret, timestamp, payload)
            .map(|mac| mac.verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if valid {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn test_sign_then_verify() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign(payload, SECRET, 1_700_000_000).unwrap();
        assert!(verify(payload, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_modified_payload_rejected() {
        let header = sign(b"original", SECRET, 1_700_000_000).unwrap();
        assert_eq!(
            verify(b"tampered", &header, SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = sign(b"payload", "other_secret", 1_700_000_000).unwrap();
        assert_eq!(
            verify(b"payload", &header, SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = sign(b"payload", SECRET, 1_000).unwrap();
        assert!(matches!(
            verify(b"payload", &header, SECRET, 300, 1_700_000_000),
            Err(SignatureError::TimestampTolerance { .. })
        ));
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert!(matches!(
                verify(b"p", header, SECRET, 300, 1_700_000_000),
                Err(SignatureError::TimestampTolerance { .. })
            ));
        }
        assert!(matches!(
            verify(b"p", "t=-9223372036854775808,v1=00", SECRET, 300, 0),
            Err(SignatureError::TimestampTolerance { .. })
        ));
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            verify(b"p", "v1=abcd", SECRET, 300, 0),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert!(matches!(
            verify(b"p", "t=0", SECRET, 300, 0),
            Err(SignatureError::MalformedHeader(_))
        ));
        assert_eq!(
            verify(b"p", "t=0,v1=not-hex", SECRET, 300, 0),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_missing_secret() {
        assert_eq!(sign(b"p", "", 0), Err(SignatureError::MissingSecret));
        assert_eq!(
            verify(b"p", "t=0,v1=00", "", 300, 0),
            Err(SignatureError::MissingSecret)
        );
    }
}

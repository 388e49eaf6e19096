// Unverified JWT claim reading
//
// Only used as a client-side expiry hint. The signature is never checked,
// so nothing decoded here may be treated as a trust decision.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered claims the client cares about
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Decode the payload segment of a compact JWT without verifying it
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| tracing::debug!(error = %e, "Token payload is not base64url"))
        .ok()?;

    serde_json::from_slice(&bytes)
        .map_err(|e| tracing::debug!(error = %e, "Token payload is not JSON claims"))
        .ok()
}

/// `exp` claim as a timestamp, if the token carries one
pub fn expiry(token: &str) -> Option<DateTime<Utc>> {
    decode_claims(token)
        .and_then(|c| c.exp)
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
}

/// Build an unsigned-style compact token (`header.payload.signature`)
///
/// The demo backend issues these; the signature segment is a fixed marker.
pub fn encode_unsigned(claims: &Claims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
    format!("{}.{}.demo", header, payload)
}

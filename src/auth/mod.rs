//! Request signing for the marketplace REST API.
//!
//! Every request carries the API key, a unix timestamp and an
//! HMAC-SHA256 signature over `timestamp + METHOD + path + body`, keyed
//! with the account's private key and encoded as base64. The upstream
//! answers 401/403 when the key pair is unknown or the signature is stale.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const HEADER_API_KEY: &str = "X-API-KEY";
const HEADER_SIGNATURE: &str = "X-SIGNATURE";
const HEADER_TIMESTAMP: &str = "X-TIMESTAMP";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing API credentials")]
    MissingCredentials,
    #[error("HMAC key error: {0}")]
    HmacKey(String),
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),
}

#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub private_key: String,
}

// Keeps the private key out of logs.
impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ApiCredentials {
    pub fn from_config(api_key: &str, private_key: &str) -> Option<Self> {
        if api_key.is_empty() || private_key.is_empty() {
            return None;
        }
        Some(Self {
            api_key: api_key.to_string(),
            private_key: private_key.to_string(),
        })
    }
}

pub fn sign(private_key: &str, message: &str) -> Result<String, AuthError> {
    let mut mac = HmacSha256::new_from_slice(private_key.as_bytes())
        .map_err(|e| AuthError::HmacKey(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, AuthError> {
    HeaderValue::from_str(value).map_err(|_| AuthError::InvalidHeader(name))
}

/// Build auth headers for a marketplace request.
pub fn build_auth_headers(
    creds: &ApiCredentials,
    method: &str,
    path: &str,
    body: &str,
) -> Result<HeaderMap, AuthError> {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    build_auth_headers_at(creds, &timestamp, method, path, body)
}

pub(crate) fn build_auth_headers_at(
    creds: &ApiCredentials,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<HeaderMap, AuthError> {
    if creds.api_key.is_empty() || creds.private_key.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);
    let signature = sign(&creds.private_key, &message)?;

    debug!(
        method = method,
        path = path,
        timestamp = %timestamp,
        "built marketplace auth headers"
    );

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_API_KEY, header_value(HEADER_API_KEY, &creds.api_key)?);
    headers.insert(HEADER_SIGNATURE, header_value(HEADER_SIGNATURE, &signature)?);
    headers.insert(HEADER_TIMESTAMP, header_value(HEADER_TIMESTAMP, timestamp)?);

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials::from_config("key-1", "secret").unwrap()
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(ApiCredentials::from_config("", "secret").is_none());
        assert!(ApiCredentials::from_config("key", "").is_none());
    }

    #[test]
    fn test_signature_is_deterministic_per_message() {
        let a = sign("secret", "1700000000GET/rfqs").unwrap();
        let b = sign("secret", "1700000000GET/rfqs").unwrap();
        let c = sign("secret", "1700000001GET/rfqs").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 32-byte MAC, base64 encoded
        assert_eq!(BASE64.decode(&a).unwrap().len(), 32);
    }

    #[test]
    fn test_headers_carry_key_timestamp_and_signature() {
        let headers =
            build_auth_headers_at(&creds(), "1700000000", "get", "/rfqs", "").unwrap();
        assert_eq!(headers.get(HEADER_API_KEY).unwrap(), "key-1");
        assert_eq!(headers.get(HEADER_TIMESTAMP).unwrap(), "1700000000");
        let expected = sign("secret", "1700000000GET/rfqs").unwrap();
        assert_eq!(headers.get(HEADER_SIGNATURE).unwrap(), expected.as_str());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let rendered = format!("{:?}", creds());
        assert!(rendered.contains("key-1"));
        assert!(!rendered.contains("secret"));
    }
}

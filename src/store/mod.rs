//! Marketplace document store client.
//!
//! Endpoints (relative to the configured API base):
//!   GET  /validatorMarketplace/sellers/rfqs[?status=active]  → { success, documents }
//!   POST /validatorMarketplace/sellers/rfqs                   → created document
//!   POST /validatorMarketplace/sellers/rfqs/{id}/quotes/{q}/accept → { success }
//!   POST /validatorMarketplace/sellers/rfqs/{id}/quotes/{q}/reject → { success }
//!
//! Validators, linked wallets and the account live in `account`.
//!
//! `DocumentStore` is the seam the poller and the settlement coordinator
//! depend on; `MarketplaceClient` is the HTTP implementation.

pub mod account;

pub use account::{AccountInfo, AddLinkedWalletRequest, LinkedWallet, ValidatorInfo};

use crate::auth::{build_auth_headers, ApiCredentials, AuthError};
use crate::rfq::{RfqDocument, RfqStatus, Snapshot};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const RFQS_PATH: &str = "/validatorMarketplace/sellers/rfqs";

#[derive(Error, Debug)]
pub enum StoreError {
    /// Network or HTTP-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// Upstream rejected our credentials.
    #[error("credentials rejected ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("request signing failed: {0}")]
    Signing(#[from] AuthError),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Transport(e.to_string())
        }
    }
}

impl StoreError {
    pub fn is_auth(&self) -> bool {
        matches!(self, StoreError::Auth { .. } | StoreError::Signing(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteDecision {
    Accept,
    Reject,
}

impl QuoteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteDecision::Accept => "accept",
            QuoteDecision::Reject => "reject",
        }
    }
}

impl std::fmt::Display for QuoteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRfqRequest {
    pub validator_indices: Vec<u64>,
    /// Linked wallet the buyer pays into.
    pub payment_wallet_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteActionBody<'a> {
    rfq_id: &'a str,
    quote_id: &'a str,
}

/// `{ success }` acknowledgement from the quote endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteAck {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current set of RFQ documents, ordered into a snapshot.
    async fn fetch_documents(&self) -> Result<Snapshot, StoreError>;

    async fn quote_action(
        &self,
        decision: QuoteDecision,
        rfq_id: &str,
        quote_id: &str,
    ) -> Result<QuoteAck, StoreError>;

    async fn accept_quote(&self, rfq_id: &str, quote_id: &str) -> Result<QuoteAck, StoreError> {
        self.quote_action(QuoteDecision::Accept, rfq_id, quote_id).await
    }

    async fn reject_quote(&self, rfq_id: &str, quote_id: &str) -> Result<QuoteAck, StoreError> {
        self.quote_action(QuoteDecision::Reject, rfq_id, quote_id).await
    }
}

fn upstream_error(map: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    map.get(key)
        .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Decodes a list response. Accepts `{ success, <key> }`, `{ success: false, error }`
/// or a bare array. Items that fail to decode are skipped.
pub fn decode_list<T: DeserializeOwned>(
    body: serde_json::Value,
    key: &str,
) -> Result<Vec<T>, StoreError> {
    let raw = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => {
            let success = map
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);
            if !success {
                return Err(StoreError::Api {
                    status: 200,
                    body: upstream_error(&map, "error"),
                });
            }
            match map.remove(key) {
                Some(serde_json::Value::Array(items)) => items,
                _ => return Err(StoreError::Decode(format!("missing {key} array"))),
            }
        }
        other => {
            return Err(StoreError::Decode(format!(
                "expected object or array, got {}",
                other
            )))
        }
    };

    let total = raw.len();
    let items: Vec<T> = raw
        .into_iter()
        .filter_map(|v| {
            let id = v
                .get("id")
                .map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string()))
                .unwrap_or_else(|| "?".to_string());
            match serde_json::from_value::<T>(v) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(kind = key, id = %id, error = %e, "skipping malformed item");
                    None
                }
            }
        })
        .collect();

    debug!(kind = key, total, decoded = items.len(), "decoded list");
    Ok(items)
}

/// RFQ documents from a list response.
pub fn decode_documents(body: serde_json::Value) -> Result<Vec<RfqDocument>, StoreError> {
    decode_list(body, "documents")
}

/// Decodes a create response: the document itself or `{ success, result }`.
/// A `result` carrying `message` and no `id` is an upstream refusal.
pub fn decode_created_rfq(body: serde_json::Value) -> Result<RfqDocument, StoreError> {
    let doc = match body {
        serde_json::Value::Object(mut map) if map.contains_key("result") => {
            map.remove("result").unwrap_or_default()
        }
        other => other,
    };
    if let serde_json::Value::Object(map) = &doc {
        if map.contains_key("message") && !map.contains_key("id") {
            return Err(StoreError::Api {
                status: 200,
                body: upstream_error(map, "message"),
            });
        }
    }
    serde_json::from_value(doc).map_err(|e| StoreError::Decode(e.to_string()))
}

/// Authenticated HTTP client for the marketplace REST API.
pub struct MarketplaceClient {
    client: reqwest::Client,
    base_url: String,
    /// Path prefix of `base_url` (e.g. "/v1"), included in signatures.
    base_path: String,
    creds: ApiCredentials,
}

impl MarketplaceClient {
    pub fn new(base_url: String, creds: ApiCredentials, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let base_path = reqwest::Url::parse(&base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .map_err(|e| StoreError::Transport(format!("invalid base url {base_url}: {e}")))?;
        Ok(Self {
            client,
            base_url,
            base_path,
            creds,
        })
    }

    async fn check(resp: reqwest::Response) -> Result<serde_json::Value, StoreError> {
        let status = resp.status().as_u16();
        if status == 401 || status == 403 {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Auth { status, body });
        }
        if status >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api { status, body });
        }
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// GET with auth headers. Only the path is signed, not the query.
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, StoreError> {
        let signed_path = format!("{}{}", self.base_path, path);
        let headers = build_auth_headers(&self.creds, "GET", &signed_path, "")?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.get(&url).query(query).headers(headers).send().await?;
        Self::check(resp).await
    }

    /// POST with auth headers and JSON body.
    pub async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, StoreError> {
        let body_str =
            serde_json::to_string(body).map_err(|e| StoreError::Decode(e.to_string()))?;
        let signed_path = format!("{}{}", self.base_path, path);
        let headers = build_auth_headers(&self.creds, "POST", &signed_path, &body_str)?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?;
        Self::check(resp).await
    }

    /// DELETE with auth headers.
    pub async fn delete(&self, path: &str) -> Result<serde_json::Value, StoreError> {
        let signed_path = format!("{}{}", self.base_path, path);
        let headers = build_auth_headers(&self.creds, "DELETE", &signed_path, "")?;
        let url = format!("{}{}", self.base_url, path);

        let resp = self.client.delete(&url).headers(headers).send().await?;
        Self::check(resp).await
    }

    /// Documents, optionally restricted to one status upstream.
    pub async fn fetch_documents_with_status(
        &self,
        status: Option<RfqStatus>,
    ) -> Result<Snapshot, StoreError> {
        let query: Vec<(&str, &str)> = status.iter().map(|s| ("status", s.as_str())).collect();
        let body = self.get(RFQS_PATH, &query).await?;
        Ok(Snapshot::from_documents(decode_documents(body)?))
    }

    pub async fn create_rfq(&self, request: &CreateRfqRequest) -> Result<RfqDocument, StoreError> {
        let body = serde_json::to_value(request).map_err(|e| StoreError::Decode(e.to_string()))?;
        let resp = self.post(RFQS_PATH, &body).await?;
        let doc = decode_created_rfq(resp)?;
        info!(rfq = %doc.id, validators = request.validator_indices.len(), "RFQ created");
        Ok(doc)
    }
}

#[async_trait]
impl DocumentStore for MarketplaceClient {
    async fn fetch_documents(&self) -> Result<Snapshot, StoreError> {
        self.fetch_documents_with_status(None).await
    }

    async fn quote_action(
        &self,
        decision: QuoteDecision,
        rfq_id: &str,
        quote_id: &str,
    ) -> Result<QuoteAck, StoreError> {
        let path = format!("{}/{}/quotes/{}/{}", RFQS_PATH, rfq_id, quote_id, decision.as_str());
        let body = serde_json::to_value(QuoteActionBody { rfq_id, quote_id })
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let resp = self.post(&path, &body).await?;

        // Some deployments answer 200 with an empty object.
        let ack = if resp.is_null() || resp.as_object().map_or(false, |m| m.is_empty()) {
            QuoteAck { success: true, error: None }
        } else {
            serde_json::from_value(resp).map_err(|e| StoreError::Decode(e.to_string()))?
        };
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_wrapped_documents_skips_malformed() {
        let docs = decode_documents(json!({
            "success": true,
            "documents": [
                { "id": "r1", "status": "active" },
                { "id": "r2", "status": "bogus" },
                { "status": "active" },
                { "id": "r3", "status": "Expired" }
            ]
        }))
        .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
    }

    #[test]
    fn test_decode_bare_array() {
        let docs = decode_documents(json!([{ "id": "r1", "status": "finished" }])).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, RfqStatus::Finished);
    }

    #[test]
    fn test_decode_unsuccessful_response() {
        match decode_documents(json!({ "success": false, "error": "boom" })) {
            Err(StoreError::Api { body, .. }) => assert_eq!(body, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decode_missing_documents() {
        assert!(matches!(
            decode_documents(json!({ "success": true })),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(decode_documents(json!("nope")), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_create_request_carries_payment_wallet() {
        let body = serde_json::to_value(CreateRfqRequest {
            validator_indices: vec![1, 2],
            payment_wallet_id: "w1".into(),
        })
        .unwrap();
        assert_eq!(body, json!({ "validator_indices": [1, 2], "payment_wallet_id": "w1" }));
    }

    #[test]
    fn test_created_rfq_decodes_wrapped_or_bare() {
        let wrapped = decode_created_rfq(json!({
            "success": true,
            "result": { "id": "r9", "status": "active" }
        }))
        .unwrap();
        assert_eq!(wrapped.id, "r9");
        let bare = decode_created_rfq(json!({ "id": "r8", "status": "active" })).unwrap();
        assert_eq!(bare.id, "r8");
    }

    #[test]
    fn test_created_rfq_message_is_api_error() {
        let err = decode_created_rfq(json!({
            "success": true,
            "result": { "message": "Validator 7 is already in an RFQ" }
        }))
        .unwrap_err();
        match err {
            StoreError::Api { status, body } => {
                assert_eq!(status, 200);
                assert_eq!(body, "Validator 7 is already in an RFQ");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_quote_body_is_camel_case() {
        let body = serde_json::to_value(QuoteActionBody { rfq_id: "r1", quote_id: "q1" }).unwrap();
        assert_eq!(body, json!({ "rfqId": "r1", "quoteId": "q1" }));
    }

    #[test]
    fn test_client_derives_signed_base_path() {
        let creds = ApiCredentials::from_config("k", "s").unwrap();
        let client = MarketplaceClient::new(
            "https://test.api.northstake.dk/v1/".to_string(),
            creds,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url, "https://test.api.northstake.dk/v1");
        assert_eq!(client.base_path, "/v1");
    }

    #[test]
    fn test_auth_classification() {
        assert!(StoreError::Auth { status: 401, body: String::new() }.is_auth());
        assert!(!StoreError::Transport("reset".into()).is_auth());
    }
}

//! nodeos HTTP client
//!
//! Talks to the `/v1/chain/*` API of a single endpoint and signs the oracle's
//! transactions locally.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::keys::AntelopeKey;
use super::transaction::{parse_chain_id, Action, TaposHeader, Transaction, EXPIRE_SECONDS};
use super::{parse_block_time, AccountChainApi, ChainInfo, TableQuery, TableRows};
use crate::endpoints::{Connector, NetworkProbe};
use crate::error::{OracleError, Result};

/// Error names nodeos uses when the provided authority does not satisfy the
/// action's requirements.
const AUTH_ERROR_NAMES: &[&str] = &[
    "missing_auth_exception",
    "unsatisfied_authorization",
    "irrelevant_auth_exception",
    "invalid_signature_exception",
];

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    name: String,
    #[serde(default)]
    what: String,
    #[serde(default)]
    details: Vec<ApiErrorMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    timestamp: String,
}

/// Translate a nodeos error response into an `OracleError`.
///
/// Authorization failures are recognised by HTTP status or error name.
/// Contract assertions become `Rejected` carrying the assertion text; their
/// meaning is decided by `rejection::classify_rejection`.
pub fn map_api_error(endpoint: &str, status: u16, body: &str) -> OracleError {
    let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
    let Some(parsed) = parsed else {
        return OracleError::EndpointUnavailable {
            endpoint: endpoint.to_string(),
            reason: format!("HTTP {}: {}", status, truncate(body, 200)),
        };
    };

    let detail_text = parsed
        .error
        .as_ref()
        .map(|e| {
            let details: Vec<&str> = e
                .details
                .iter()
                .map(|d| d.message.as_str())
                .filter(|m| !m.is_empty())
                .collect();
            if details.is_empty() {
                e.what.clone()
            } else {
                format!("{}: {}", e.what, details.join("; "))
            }
        })
        .unwrap_or_else(|| parsed.message.clone());

    if status == 401 || parsed.code == Some(401) {
        return OracleError::Unauthorized(detail_text);
    }

    match &parsed.error {
        Some(e) if AUTH_ERROR_NAMES.contains(&e.name.as_str()) => {
            OracleError::Unauthorized(detail_text)
        }
        Some(_) => OracleError::Rejected(detail_text),
        None => OracleError::EndpointUnavailable {
            endpoint: endpoint.to_string(),
            reason: format!("HTTP {}: {}", status, detail_text),
        },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Client bound to one nodeos endpoint.
pub struct AntelopeClient {
    url: String,
    http: Client,
    chain_id: [u8; 32],
    key: Option<Arc<AntelopeKey>>,
}

impl AntelopeClient {
    pub fn new(
        url: &str,
        chain_id: &str,
        key: Option<Arc<AntelopeKey>>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: crate::endpoints::normalize_url(url),
            http,
            chain_id: parse_chain_id(chain_id)?,
            key,
        })
    }

    /// Connector for an `EndpointPool` of account chain endpoints.
    pub fn connector(
        chain_id: String,
        key: Option<Arc<AntelopeKey>>,
        timeout: Duration,
    ) -> Connector<AntelopeClient> {
        Arc::new(move |url: &str| AntelopeClient::new(url, &chain_id, key.clone(), timeout))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{}", self.url, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::EndpointUnavailable {
                endpoint: self.url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| OracleError::EndpointUnavailable {
            endpoint: self.url.clone(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(map_api_error(&self.url, status.as_u16(), &text));
        }

        serde_json::from_str(&text).map_err(|e| OracleError::EndpointUnavailable {
            endpoint: self.url.clone(),
            reason: format!("Malformed response from {}: {}", path, e),
        })
    }
}

#[async_trait]
impl NetworkProbe for AntelopeClient {
    async fn network_id(&self) -> Result<String> {
        Ok(self.get_info().await?.chain_id)
    }
}

#[async_trait]
impl AccountChainApi for AntelopeClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_info(&self) -> Result<ChainInfo> {
        self.post("/v1/chain/get_info", json!({})).await
    }

    async fn get_block_timestamp(&self, block_num: u32) -> Result<String> {
        let block: BlockResponse = self
            .post("/v1/chain/get_block", json!({ "block_num_or_id": block_num }))
            .await?;
        Ok(block.timestamp)
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TableRows> {
        self.post("/v1/chain/get_table_rows", serde_json::to_value(query)?)
            .await
    }

    async fn push_action(&self, action: Action) -> Result<String> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| OracleError::Key("No signing key configured".into()))?;

        let info = self.get_info().await?;
        let head_time = parse_block_time(&info.head_block_time)?;
        let expiration = u32::try_from(head_time.timestamp())
            .map_err(|_| OracleError::Serialization("Head block time out of range".into()))?
            + EXPIRE_SECONDS;
        let header = TaposHeader::from_block(
            info.last_irreversible_block_num,
            &info.last_irreversible_block_id,
            expiration,
        )?;

        let packed = Transaction::new(header, vec![action]).pack()?;
        let digest = Transaction::signing_digest(&self.chain_id, &packed);
        let signature = key.sign_digest(&digest)?;

        debug!(endpoint = %self.url, txid = %Transaction::id(&packed), "Pushing transaction");
        let response: PushResponse = self
            .post(
                "/v1/chain/push_transaction",
                json!({
                    "signatures": [signature],
                    "compression": "none",
                    "packed_context_free_data": "",
                    "packed_trx": hex::encode(&packed),
                }),
            )
            .await?;
        Ok(response.transaction_id)
    }
}

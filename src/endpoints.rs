//! Round-robin endpoint pool with network id validation
//!
//! Each chain gets its own pool. An endpoint is probed for its self-reported
//! network id the first time the rotation lands on it; endpoints that serve a
//! different network are removed for the rest of the process lifetime, while
//! unreachable endpoints stay in the rotation and are probed again later.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OracleError, Result};
use crate::metrics;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drops a single trailing slash so request paths can be appended directly.
pub fn normalize_url(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}

/// A client that can report which network it is connected to.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Self-reported network identifier (chain id hex on Antelope, decimal
    /// chain id on EVM).
    async fn network_id(&self) -> Result<String>;
}

/// Builds a protocol client bound to one endpoint URL.
pub type Connector<C> = Arc<dyn Fn(&str) -> Result<C> + Send + Sync>;

/// A configured RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    /// Set once the endpoint has reported the expected network id
    pub last_known_good: bool,
    pub last_observed_network_id: Option<String>,
}

/// Outcome of probing one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// Provably serves another network; removed from the pool
    Mismatch(String),
    /// Could not be reached; kept and retried on a later rotation
    Unreachable(String),
}

pub struct EndpointPool<C> {
    chain: String,
    expected_network_id: String,
    endpoints: Vec<Endpoint>,
    /// Index of the current endpoint; `None` until the first advance
    cursor: Option<usize>,
    connector: Connector<C>,
    cached: Option<(String, Arc<C>)>,
}

impl<C: NetworkProbe> EndpointPool<C> {
    pub fn new(
        chain: &str,
        expected_network_id: &str,
        urls: &[String],
        connector: Connector<C>,
    ) -> Result<Self> {
        if urls.is_empty() {
            return Err(OracleError::InvalidConfig(format!(
                "No list of {} endpoints defined",
                chain
            )));
        }
        let endpoints = urls
            .iter()
            .map(|url| Endpoint {
                url: normalize_url(url),
                last_known_good: false,
                last_observed_network_id: None,
            })
            .collect();

        Ok(Self {
            chain: chain.to_string(),
            expected_network_id: expected_network_id.to_lowercase(),
            endpoints,
            cursor: None,
            connector,
            cached: None,
        })
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Number of endpoints still in the rotation.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The endpoint the pool currently points at.
    ///
    /// Before the first `advance()` this is the first configured endpoint,
    /// not yet validated.
    pub fn current(&self) -> Result<&Endpoint> {
        self.endpoints
            .get(self.cursor.unwrap_or(0))
            .ok_or_else(|| OracleError::NoUsableEndpoints {
                chain: self.chain.clone(),
            })
    }

    /// URL of the current endpoint, or an empty string if none are left.
    pub fn current_url(&self) -> String {
        self.current().map(|e| e.url.clone()).unwrap_or_default()
    }

    /// Client bound to the current endpoint, built on first use and rebuilt
    /// whenever the current endpoint changes.
    pub fn client(&mut self) -> Result<Arc<C>> {
        let url = self.current()?.url.clone();
        if let Some((cached_url, client)) = &self.cached {
            if *cached_url == url {
                return Ok(client.clone());
            }
        }
        let client = Arc::new((self.connector)(&url)?);
        self.cached = Some((url, client.clone()));
        Ok(client)
    }

    /// The current endpoint, validating the first one on first use.
    pub async fn ensure_current(&mut self) -> Result<Endpoint> {
        match self.cursor {
            Some(_) => self.current().cloned(),
            None => self.advance().await,
        }
    }

    /// Move to the next endpoint in round-robin order and return it once it
    /// is known to serve the expected network.
    ///
    /// Mismatching endpoints are removed during the rotation without counting
    /// as a step. Fails with `NoUsableEndpoints` if a whole rotation produced
    /// no valid endpoint.
    pub async fn advance(&mut self) -> Result<Endpoint> {
        let mut steps = 0;
        while steps < self.endpoints.len() {
            let next = match self.cursor {
                Some(c) => (c + 1) % self.endpoints.len(),
                None => 0,
            };
            self.cursor = Some(next);

            if self.endpoints[next].last_known_good {
                debug!(chain = %self.chain, endpoint = %self.endpoints[next].url, "Using next endpoint");
                return Ok(self.endpoints[next].clone());
            }

            match self.validate_current().await {
                Validation::Valid => {
                    info!(chain = %self.chain, endpoint = %self.endpoints[next].url, "Endpoint validated");
                    return Ok(self.endpoints[next].clone());
                }
                Validation::Mismatch(actual) => {
                    let removed = self.endpoints.remove(next);
                    self.cached = None;
                    metrics::record_endpoint_removed(&self.chain);
                    warn!(
                        chain = %self.chain,
                        endpoint = %removed.url,
                        expected = %self.expected_network_id,
                        actual = %actual,
                        "Removing endpoint serving another network"
                    );
                    // Step back so the endpoint that slid into this slot is tried next
                    self.cursor = next.checked_sub(1);
                    if self.cursor.is_none() && !self.endpoints.is_empty() {
                        self.cursor = Some(self.endpoints.len() - 1);
                    }
                }
                Validation::Unreachable(reason) => {
                    warn!(
                        chain = %self.chain,
                        endpoint = %self.endpoints[next].url,
                        error = %reason,
                        "Can not connect to endpoint"
                    );
                    steps += 1;
                }
            }
        }

        Err(OracleError::NoUsableEndpoints {
            chain: self.chain.clone(),
        })
    }

    /// Probe the current endpoint's network id without moving the cursor.
    pub async fn validate_current(&mut self) -> Validation {
        let client = match self.client() {
            Ok(c) => c,
            Err(e) => return Validation::Unreachable(e.to_string()),
        };
        let idx = self.cursor.unwrap_or(0);
        match client.network_id().await {
            Ok(actual) => {
                let actual = actual.to_lowercase();
                self.endpoints[idx].last_observed_network_id = Some(actual.clone());
                if actual == self.expected_network_id {
                    self.endpoints[idx].last_known_good = true;
                    Validation::Valid
                } else {
                    Validation::Mismatch(actual)
                }
            }
            Err(e) => Validation::Unreachable(e.to_string()),
        }
    }
}

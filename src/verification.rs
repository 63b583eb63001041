//! Cross validation of account chain table reads
//!
//! The primary read returns decoded rows from the current endpoint. Every
//! additional verification round rotates to another endpoint and reads the
//! same range as raw row bytes. A teleport is only signed if its serialized
//! prefix matches the raw row of every verification round.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::antelope::serializer::raw_row_matches;
use crate::antelope::{AccountChainApi, TableQuery, TableRows};
use crate::endpoints::EndpointPool;
use crate::error::{OracleError, Result};
use crate::types::TransferEvent;

/// Attempts per table read before the read fails.
pub const TABLE_READ_ATTEMPTS: usize = 10;

/// Read table rows, rotating to the next endpoint after each failure.
pub async fn read_table_rows<C: AccountChainApi>(
    pool: &mut EndpointPool<C>,
    query: &TableQuery,
) -> Result<TableRows> {
    pool.ensure_current().await?;
    let mut last_error = None;
    for attempt in 1..=TABLE_READ_ATTEMPTS {
        let client = pool.client()?;
        match client.get_table_rows(query).await {
            Ok(rows) => return Ok(rows),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    endpoint = %client.endpoint(),
                    table = %query.table,
                    attempt,
                    error = %e,
                    "Table read failed, trying next endpoint"
                );
                last_error = Some(e);
                pool.advance().await?;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        OracleError::Transport(format!(
            "Failed to read {} after {} attempts",
            query.table, TABLE_READ_ATTEMPTS
        ))
    }))
}

/// Raw rows come back as hex strings, or as `{"data": "<hex>"}` when the
/// node also reports the payer.
fn raw_hex(row: serde_json::Value) -> String {
    match row {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::String(s)) => s,
            _ => String::new(),
        },
        _ => String::new(),
    }
}

/// A batch of teleports read from one endpoint and checked against others.
#[derive(Debug, Clone, Default)]
pub struct VerifiedBatch {
    /// Decoded rows, cut to the length every endpoint returned
    pub events: Vec<TransferEvent>,
    /// Raw row hex per verification round, aligned with `events`
    pub raw_rows: Vec<Vec<String>>,
    /// More rows exist beyond this batch
    pub more: bool,
    /// Endpoints that served the batch, primary first
    pub endpoints: Vec<String>,
}

impl VerifiedBatch {
    /// True if `serialized` matches the raw row at `index` in every
    /// verification round.
    pub fn verify(&self, index: usize, serialized: &[u8]) -> bool {
        self.raw_rows.iter().all(|round| {
            round
                .get(index)
                .is_some_and(|raw| raw_row_matches(serialized, raw))
        })
    }
}

#[derive(Debug, Clone)]
pub struct CrossValidator {
    contract: String,
    table: String,
    verifications: usize,
}

impl CrossValidator {
    pub fn new(contract: &str, verifications: usize) -> Self {
        Self {
            contract: contract.to_string(),
            table: "teleports".to_string(),
            verifications: verifications.max(1),
        }
    }

    pub fn verifications(&self) -> usize {
        self.verifications
    }

    /// Fetch up to `limit` teleports starting at id `start_id`.
    ///
    /// Fails with `NotEnoughEndpoints` if a verification round would reuse an
    /// endpoint already read from.
    pub async fn fetch<C: AccountChainApi>(
        &self,
        pool: &mut EndpointPool<C>,
        start_id: u64,
        limit: u32,
    ) -> Result<VerifiedBatch> {
        let json_query = TableQuery::primary(&self.contract, &self.table, start_id, limit, true);
        let primary = read_table_rows(pool, &json_query).await?;
        let mut used: HashSet<String> = HashSet::from([pool.current_url()]);
        let mut endpoints = vec![pool.current_url()];

        let primary_len = primary.rows.len();
        let mut usable = primary_len;
        let raw_query = TableQuery::primary(&self.contract, &self.table, start_id, limit, false);
        let mut raw_rows = Vec::with_capacity(self.verifications - 1);

        for round in 1..self.verifications {
            let rows = self.read_raw_round(pool, &raw_query, &mut used).await?;
            debug!(
                round,
                endpoint = %pool.current_url(),
                rows = rows.len(),
                "Verification rows"
            );
            endpoints.push(pool.current_url());
            usable = usable.min(rows.len());
            raw_rows.push(rows);
        }

        let mut events = Vec::with_capacity(usable);
        for row in primary.rows.into_iter().take(usable) {
            events.push(serde_json::from_value::<TransferEvent>(row).map_err(|e| {
                OracleError::Serialization(format!("Malformed teleport row: {}", e))
            })?);
        }
        for round in raw_rows.iter_mut() {
            round.truncate(usable);
        }

        let more = primary.more || usable < primary_len;
        Ok(VerifiedBatch {
            events,
            raw_rows,
            more,
            endpoints,
        })
    }

    /// One raw read on a fresh endpoint, retrying on other fresh endpoints.
    async fn read_raw_round<C: AccountChainApi>(
        &self,
        pool: &mut EndpointPool<C>,
        query: &TableQuery,
        used: &mut HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut last_error = None;
        for _ in 0..TABLE_READ_ATTEMPTS {
            let next = pool.advance().await?;
            if used.contains(&next.url) {
                break;
            }
            let client = pool.client()?;
            match client.get_table_rows(query).await {
                Ok(rows) => {
                    used.insert(next.url);
                    return Ok(rows.rows.into_iter().map(raw_hex).collect());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(endpoint = %next.url, error = %e, "Verification read failed");
                    used.insert(next.url);
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            warn!(error = %e, "Ran out of endpoints for verification");
        }
        Err(OracleError::NotEnoughEndpoints {
            required: self.verifications,
        })
    }
}

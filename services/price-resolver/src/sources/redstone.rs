use crate::fallback::first_success;
use crate::normalizers::{normalize_payload, RawPayload};
use crate::types::*;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Public RedStone price gateways, tried in order
pub const REDSTONE_PRICE_ENDPOINTS: &[&str] = &[
    "https://api.redstone.finance/prices",                // facade
    "https://oracle-gateway-1.a.redstone.finance/prices", // gateway #1
    "https://oracle-gateway-2.a.redstone.finance/prices", // gateway #2
];

const USER_AGENT: &str = "price-resolver/0.1 (+redstone)";

/// Raw HTTP answer from a price gateway
#[derive(Debug, Clone)]
pub struct FeedResponse {
    pub status: u16,
    pub body: String,
}

/// Transport used by [`PriceFetcher`] to reach a gateway
#[async_trait::async_trait]
pub trait FeedTransport: Send + Sync {
    /// GET `endpoint` with the given query parameters, bounded by `timeout`
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<FeedResponse>;
}

/// reqwest-backed feed transport
pub struct HttpFeedTransport {
    client: Client,
}

impl HttpFeedTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ResolverError::ApiError(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl FeedTransport for HttpFeedTransport {
    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<FeedResponse> {
        let response = self
            .client
            .get(endpoint)
            .query(query)
            .header("Accept", "application/json,text/plain,*/*")
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ResolverError::ApiError(format!("{}: {}", endpoint, e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ResolverError::ApiError(format!("{}: {}", endpoint, e)))?;

        Ok(FeedResponse { status, body })
    }
}

/// Endpoint list plus retry/backoff settings for one fetch
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub endpoints: Vec<String>,
    /// Bound on each individual HTTP request
    pub timeout: Duration,
    /// Number of full passes over `endpoints`
    pub retries: u32,
    /// Sleep after failed pass `n` is `base_delay * 2^n`
    pub base_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            endpoints: REDSTONE_PRICE_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
            timeout: Duration::from_secs(4),
            retries: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl FetchPolicy {
    /// Delay slept after failed attempt `attempt` (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1_u32 << attempt.min(31))
    }

    /// Time spent sleeping before a fetch gives up: one delay per failed attempt
    pub fn worst_case_backoff(&self) -> Duration {
        (0..self.retries)
            .map(|attempt| self.backoff_delay(attempt))
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

/// Multi-endpoint price fetcher with query-shape fallback and exponential backoff
pub struct PriceFetcher {
    transport: Arc<dyn FeedTransport>,
}

impl PriceFetcher {
    pub fn new(transport: Arc<dyn FeedTransport>) -> Self {
        Self { transport }
    }

    /// Fetcher over plain HTTP
    pub fn http() -> Result<Self> {
        Ok(Self::new(Arc::new(HttpFeedTransport::new()?)))
    }

    /// Fetch the latest quotes for `symbols`, keyed by upper-cased symbol.
    ///
    /// Each attempt walks `policy.endpoints` in order and returns as soon as one
    /// endpoint yields any record. After every failed attempt, the last one included,
    /// the fetcher sleeps `base_delay * 2^attempt`, so a caller can block for up to
    /// `retries * endpoints * (symbols + 1) * timeout + worst_case_backoff()`.
    pub async fn fetch(
        &self,
        symbols: &[&str],
        policy: &FetchPolicy,
    ) -> Result<HashMap<String, PriceRecord>> {
        let wanted = normalize_symbols(symbols);
        if wanted.is_empty() {
            return Ok(HashMap::new());
        }

        let mut last_error = None;

        for attempt in 0..policy.retries {
            let pass = first_success(policy.endpoints.iter(), |endpoint| {
                self.try_endpoint(endpoint, &wanted, policy.timeout)
            })
            .await;

            match pass {
                Ok(records) => {
                    debug!(
                        "Fetched {} of {} symbols on attempt {}",
                        records.len(),
                        wanted.len(),
                        attempt + 1
                    );
                    return Ok(records);
                }
                Err(exhausted) => {
                    if exhausted.last_error.is_some() {
                        last_error = exhausted.last_error;
                    }
                }
            }

            let delay = policy.backoff_delay(attempt);
            warn!(
                "No price endpoint answered (attempt {}/{}), backing off {:?}",
                attempt + 1,
                policy.retries,
                delay
            );
            tokio::time::sleep(delay).await;
        }

        Err(ResolverError::ExhaustedRetries {
            attempts: policy.retries,
            last_error: last_error.map(Box::new),
        })
    }

    /// One endpoint: batch query first, then one request per symbol
    async fn try_endpoint(
        &self,
        endpoint: &str,
        wanted: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, PriceRecord>> {
        let batch_query = [("symbols", wanted.join(",")), ("_", cache_buster())];
        match self.request_records(endpoint, &batch_query, timeout).await {
            Ok(records) => {
                let mut out = HashMap::new();
                for record in records {
                    if wanted.contains(&record.symbol) {
                        out.entry(record.symbol.clone()).or_insert(record);
                    }
                }
                if !out.is_empty() {
                    return Ok(out);
                }
                debug!("Batch query on {} returned no usable records", endpoint);
            }
            Err(e) => debug!("Batch query on {} failed: {}", endpoint, e),
        }

        // Some gateways only accept `symbol=`
        let mut out = HashMap::new();
        for symbol in wanted {
            let query = [("symbol", symbol.clone()), ("_", cache_buster())];
            match self.request_records(endpoint, &query, timeout).await {
                Ok(records) => {
                    if let Some(record) = records.into_iter().find(|r| &r.symbol == symbol) {
                        out.insert(symbol.clone(), record);
                    }
                }
                Err(e) => debug!("Query for {} on {} failed: {}", symbol, endpoint, e),
            }
        }

        if out.is_empty() {
            return Err(ResolverError::NoUsableData {
                endpoint: endpoint.to_string(),
            });
        }

        info!("Recovered {}/{} symbols from {} one at a time", out.len(), wanted.len(), endpoint);
        Ok(out)
    }

    async fn request_records(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Vec<PriceRecord>> {
        let response = self.transport.get(endpoint, query, timeout).await?;
        if response.status != 200 {
            return Err(ResolverError::ApiError(format!(
                "{} answered HTTP {}",
                endpoint, response.status
            )));
        }

        normalize_payload(RawPayload::from_body(&response.body)?)
    }
}

fn normalize_symbols(symbols: &[&str]) -> Vec<String> {
    let mut wanted: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() && !wanted.contains(&symbol) {
            wanted.push(symbol);
        }
    }
    wanted
}

fn cache_buster() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

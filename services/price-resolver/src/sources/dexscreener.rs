use crate::types::*;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEXSCREENER_API: &str = "https://api.dexscreener.com";

/// Source of DEX pools that reference a token
#[async_trait::async_trait]
pub trait DexPoolSource: Send + Sync {
    async fn pools_for_token(&self, token_address: &str) -> Result<Vec<DexPool>>;
}

/// DexScreener token-pairs client
pub struct DexScreenerClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TokenPairsResponse {
    pairs: Option<Vec<RawPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
    base_token: Option<RawToken>,
    quote_token: Option<RawToken>,
    price_native: Option<Value>,
    price: Option<Value>,
    liquidity: Option<RawLiquidity>,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLiquidity {
    usd: Option<Value>,
}

impl RawPair {
    fn into_pool(self) -> Option<DexPool> {
        let base_address = self.base_token?.address.filter(|a| !a.is_empty())?;
        let quote_address = self.quote_token?.address.filter(|a| !a.is_empty())?;

        // both field names are common
        let price = self
            .price_native
            .as_ref()
            .filter(|v| !v.is_null())
            .or(self.price.as_ref())
            .and_then(parse_decimal);

        let liquidity_usd = self
            .liquidity
            .and_then(|l| l.usd)
            .as_ref()
            .and_then(parse_decimal)
            .unwrap_or_default();

        Some(DexPool {
            base_address,
            quote_address,
            price,
            liquidity_usd,
        })
    }
}

impl DexScreenerClient {
    const REQUEST_TIMEOUT_SECS: u64 = 5;

    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ResolverError::ApiError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait::async_trait]
impl DexPoolSource for DexScreenerClient {
    async fn pools_for_token(&self, token_address: &str) -> Result<Vec<DexPool>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, token_address);
        debug!("Fetching DEX pools from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolverError::ApiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResolverError::ApiError(format!(
                "DexScreener API error ({}): {}",
                status, text
            )));
        }

        let data: TokenPairsResponse = response
            .json()
            .await
            .map_err(|e| ResolverError::InvalidResponse(e.to_string()))?;

        Ok(data
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawPair::into_pool)
            .collect())
    }
}

/// Resolves a token/token price from DEX pools
pub struct DexAggregatorResolver {
    source: Arc<dyn DexPoolSource>,
}

impl DexAggregatorResolver {
    pub fn new(source: Arc<dyn DexPoolSource>) -> Self {
        Self { source }
    }

    /// Price of `token_a` in `token_b` units (how many B per 1 A).
    ///
    /// A pool quoting A/B is used as is and a pool quoting B/A is inverted. Without
    /// either, the deepest pool's raw price is returned; its orientation is not
    /// checked, so that value is only an approximation.
    pub async fn resolve_pair_price(&self, token_a: &str, token_b: &str) -> Result<Decimal> {
        let pools = self.source.pools_for_token(token_a).await?;
        let a = token_a.to_lowercase();
        let b = token_b.to_lowercase();

        let mut best: Option<(Decimal, Decimal)> = None; // (liquidity, price)

        for pool in &pools {
            let base = pool.base_address.to_lowercase();
            let quote = pool.quote_address.to_lowercase();

            if base == a && quote == b {
                if let Some(price) = pool.price.filter(|p| *p > Decimal::ZERO) {
                    return Ok(price);
                }
                continue;
            }

            if base == b && quote == a {
                match pool
                    .price
                    .filter(|p| *p > Decimal::ZERO)
                    .and_then(|price| Decimal::ONE.checked_div(price))
                {
                    Some(inverted) => return Ok(inverted),
                    None => continue,
                }
            }

            if let Some(price) = pool.price.filter(|p| *p > Decimal::ZERO) {
                if best.map_or(true, |(liquidity, _)| pool.liquidity_usd > liquidity) {
                    best = Some((pool.liquidity_usd, price));
                }
            }
        }

        match best {
            Some((liquidity, price)) => {
                warn!(
                    "No {}/{} pool in either orientation, using deepest pool (${} liquidity)",
                    token_a, token_b, liquidity
                );
                Ok(price)
            }
            None => Err(ResolverError::NoPoolFound {
                token_a: token_a.to_string(),
                token_b: token_b.to_string(),
            }),
        }
    }
}

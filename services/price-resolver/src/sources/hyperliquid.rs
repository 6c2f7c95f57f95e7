use crate::fallback::first_success;
use crate::types::*;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const HYPERLIQUID_MAINNET_API: &str = "https://api.hyperliquid.xyz";
pub const HYPERLIQUID_TESTNET_API: &str = "https://api.hyperliquid-testnet.xyz";

/// Spot asset id = pair index + this offset
pub const SPOT_ASSET_OFFSET: u32 = 10_000;

/// Local stables surveyed by [`SpotMidResolver::stable_usd_factors`], in priority order
pub const STABLE_SURVEY_PAIRS: &[(&str, &str)] = &[
    ("feUSD", "USDT0"),
    ("feUSD", "USDC"),
    ("USDHL", "USDT0"),
    ("USDHL", "USDC"),
    ("USDT0", "USDC"),
];

/// On-chain spot venue exposing a token/pair catalog and L2 books
#[async_trait::async_trait]
pub trait SpotVenue: Send + Sync {
    /// Current token and pair catalog
    async fn spot_meta(&self) -> Result<SpotMeta>;

    /// Best-first book for a spot asset id
    async fn l2_book(&self, asset_id: u32) -> Result<OrderBookSnapshot>;
}

/// Hyperliquid `/info` client
pub struct HyperliquidInfoClient {
    client: Client,
    base_url: String,
}

impl HyperliquidInfoClient {
    /// Per-request timeout
    const REQUEST_TIMEOUT_SECS: u64 = 10;

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

    async fn post_info(&self, body: Value) -> Result<Value> {
        let url = format!("{}/info", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ResolverError::ApiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResolverError::ApiError(format!(
                "Hyperliquid info error ({}): {}",
                status, text
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ResolverError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SpotVenue for HyperliquidInfoClient {
    async fn spot_meta(&self) -> Result<SpotMeta> {
        let value = self.post_info(json!({"type": "spotMeta"})).await?;
        serde_json::from_value(value).map_err(|e| ResolverError::InvalidResponse(e.to_string()))
    }

    async fn l2_book(&self, asset_id: u32) -> Result<OrderBookSnapshot> {
        let value = self
            .post_info(json!({"type": "l2Book", "asset": asset_id}))
            .await?;
        OrderBookSnapshot::from_l2_response(&value)
    }
}

/// Token name -> venue index, valid only for the catalog it was built from
struct TokenCatalog(HashMap<String, u32>);

impl TokenCatalog {
    fn from_meta(meta: &SpotMeta) -> Self {
        let names = meta
            .tokens
            .iter()
            .filter_map(|t| Some((t.name.clone()?, t.index?)))
            .collect();
        Self(names)
    }

    fn index(&self, name: &str) -> Option<u32> {
        self.0.get(name).copied()
    }

    fn name(&self, index: u32) -> Option<&str> {
        self.0
            .iter()
            .find(|(_, idx)| **idx == index)
            .map(|(name, _)| name.as_str())
    }
}

/// Resolves order-book mid prices for spot pairs.
///
/// Every call reads a fresh catalog from the venue; nothing is cached between calls.
pub struct SpotMidResolver {
    venue: Arc<dyn SpotVenue>,
}

impl SpotMidResolver {
    pub fn new(venue: Arc<dyn SpotVenue>) -> Self {
        Self { venue }
    }

    /// Mid price of `base` in `quote` units: `(best bid + best ask) / 2`.
    ///
    /// The pair must exist exactly as base/quote; the reversed pair does not count.
    pub async fn resolve_mid(&self, base: &str, quote: &str) -> Result<Decimal> {
        let meta = self.venue.spot_meta().await?;
        let pair_index = find_pair_index(&meta, base, quote)?;
        let asset_id = SPOT_ASSET_OFFSET.checked_add(pair_index).ok_or_else(|| {
            ResolverError::InvalidResponse(format!(
                "Pair index {} for {}/{} is out of range",
                pair_index, base, quote
            ))
        })?;

        let book = self.venue.l2_book(asset_id).await?;
        let mid = book.mid().ok_or_else(|| ResolverError::NoLiquidity {
            base: base.to_string(),
            quote: quote.to_string(),
        })?;

        debug!("Spot mid {}/{} (asset {}): {}", base, quote, asset_id, mid);
        Ok(mid)
    }

    /// Mid of `base` against the first quote in `quotes` that resolves
    pub async fn resolve_mid_any(&self, base: &str, quotes: &[&str]) -> Result<Decimal> {
        first_success(quotes.iter().copied(), |quote| self.resolve_mid(base, quote))
            .await
            .map_err(|exhausted| ResolverError::NoQuoteAvailable {
                base: base.to_string(),
                quotes: quotes.iter().map(|q| q.to_string()).collect(),
                last_error: exhausted.boxed_last_error(),
            })
    }

    /// Every catalog pair where `token` is base or quote, as (base, quote, pair index)
    pub async fn pairs_for_token(&self, token: &str) -> Result<Vec<(String, String, u32)>> {
        let meta = self.venue.spot_meta().await?;
        let catalog = TokenCatalog::from_meta(&meta);
        if catalog.index(token).is_none() {
            return Err(ResolverError::UnknownToken(token.to_string()));
        }

        let pairs = meta
            .universe
            .iter()
            .filter_map(|pair| {
                let (base_idx, quote_idx) = pair.token_indices()?;
                let base = catalog.name(base_idx)?;
                let quote = catalog.name(quote_idx)?;
                if base != token && quote != token {
                    return None;
                }
                Some((base.to_string(), quote.to_string(), pair.index?))
            })
            .collect();

        Ok(pairs)
    }

    /// Approximate USD factors for the venue's local stables.
    ///
    /// Walks [`STABLE_SURVEY_PAIRS`]; the first pair that resolves for a base wins.
    pub async fn stable_usd_factors(&self) -> Result<HashMap<String, Decimal>> {
        let mut factors: HashMap<String, Decimal> = HashMap::new();
        let mut last_error = None;

        for (base, quote) in STABLE_SURVEY_PAIRS {
            if factors.contains_key(*base) {
                continue;
            }
            match self.resolve_mid(base, quote).await {
                Ok(mid) => {
                    factors.insert(base.to_string(), mid);
                }
                Err(e) => last_error = Some(Box::new(e)),
            }
        }

        if factors.is_empty() {
            return Err(ResolverError::NoQuoteAvailable {
                base: "local stables".to_string(),
                quotes: STABLE_SURVEY_PAIRS.iter().map(|(_, q)| q.to_string()).collect(),
                last_error,
            });
        }

        info!("Resolved spot USD factors for {} stables", factors.len());
        Ok(factors)
    }
}

/// Exact-order (base, quote) lookup in the pair catalog
fn find_pair_index(meta: &SpotMeta, base: &str, quote: &str) -> Result<u32> {
    let catalog = TokenCatalog::from_meta(meta);
    let (Some(base_idx), Some(quote_idx)) = (catalog.index(base), catalog.index(quote)) else {
        let missing: Vec<&str> = [base, quote]
            .into_iter()
            .filter(|name| catalog.index(name).is_none())
            .collect();
        return Err(ResolverError::UnknownToken(missing.join(", ")));
    };

    meta.universe
        .iter()
        .find(|pair| pair.token_indices() == Some((base_idx, quote_idx)))
        .and_then(|pair| pair.index)
        .ok_or_else(|| ResolverError::PairNotFound {
            base: base.to_string(),
            quote: quote.to_string(),
        })
}

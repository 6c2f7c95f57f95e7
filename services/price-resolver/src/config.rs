//! Service configuration loaded from the environment

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::sources::dexscreener::DEXSCREENER_API;
use crate::sources::hyperliquid::HYPERLIQUID_TESTNET_API;
use crate::sources::redstone::{FetchPolicy, REDSTONE_PRICE_ENDPOINTS};

/// Everything the service needs to resolve one derived price
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub hyperliquid_api_url: String,
    pub dexscreener_api_url: String,
    pub fetch_policy: FetchPolicy,
    /// Spot quotes tried for the stable, in order
    pub preferred_quotes: Vec<String>,
    /// Symbol -> EVM token address, for DEX lookups
    pub token_addresses: HashMap<String, String>,
    /// Reference token for DEX lookups (usually USDC)
    pub usd_reference: String,
    pub base_symbol: String,
    pub stable_symbol: String,
    pub price_id: String,
}

impl Settings {
    /// Load from process environment, after reading `.env` if present.
    ///
    /// Environment variables:
    /// - `PORT` (default 8080)
    /// - `HYPERLIQUID_API_URL`, `DEXSCREENER_API_URL`
    /// - `REDSTONE_ENDPOINTS` - comma separated
    /// - `FETCH_TIMEOUT_SECS`, `FETCH_RETRIES`, `FETCH_BASE_DELAY_MS`
    /// - `PREFERRED_QUOTES` - comma separated (default USDT0,USDHL)
    /// - `EVM_TOKEN_ADDRESSES` - `SYM=0x..,SYM=0x..`
    /// - `EVM_USD_REFERENCE` (default USDC)
    /// - `DERIVED_BASE_SYMBOL` (BTC), `DERIVED_STABLE_SYMBOL` (FEUSD), `DERIVED_PRICE_ID`
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(p) => p.trim().parse().with_context(|| format!("Invalid PORT: {}", p))?,
            None => 8080,
        };

        let hyperliquid_api_url =
            checked_url(get("HYPERLIQUID_API_URL").unwrap_or_else(|| HYPERLIQUID_TESTNET_API.to_string()))?;
        let dexscreener_api_url =
            checked_url(get("DEXSCREENER_API_URL").unwrap_or_else(|| DEXSCREENER_API.to_string()))?;

        let defaults = FetchPolicy::default();
        let endpoints = match get("REDSTONE_ENDPOINTS") {
            Some(list) => split_list(&list)
                .into_iter()
                .map(checked_url)
                .collect::<Result<Vec<_>>>()?,
            None => REDSTONE_PRICE_ENDPOINTS.iter().map(|e| e.to_string()).collect(),
        };
        if endpoints.is_empty() {
            return Err(anyhow!("REDSTONE_ENDPOINTS must list at least one endpoint"));
        }

        let timeout = match get("FETCH_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs_f64(
                v.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|secs| secs.is_finite() && *secs > 0.0)
                    .ok_or_else(|| anyhow!("Invalid FETCH_TIMEOUT_SECS: {}", v))?,
            ),
            None => defaults.timeout,
        };
        let retries = match get("FETCH_RETRIES") {
            Some(v) => v.trim().parse().with_context(|| format!("Invalid FETCH_RETRIES: {}", v))?,
            None => defaults.retries,
        };
        let base_delay = match get("FETCH_BASE_DELAY_MS") {
            Some(v) => Duration::from_millis(
                v.trim()
                    .parse()
                    .with_context(|| format!("Invalid FETCH_BASE_DELAY_MS: {}", v))?,
            ),
            None => defaults.base_delay,
        };

        let preferred_quotes = get("PREFERRED_QUOTES")
            .map(|list| split_list(&list))
            .unwrap_or_else(|| vec!["USDT0".to_string(), "USDHL".to_string()]);

        let token_addresses = match get("EVM_TOKEN_ADDRESSES") {
            Some(list) => parse_address_map(&list)?,
            None => HashMap::new(),
        };

        let usd_reference = get("EVM_USD_REFERENCE").unwrap_or_else(|| "USDC".to_string());
        let base_symbol = get("DERIVED_BASE_SYMBOL").unwrap_or_else(|| "BTC".to_string());
        let stable_symbol = get("DERIVED_STABLE_SYMBOL").unwrap_or_else(|| "FEUSD".to_string());
        let price_id =
            get("DERIVED_PRICE_ID").unwrap_or_else(|| format!("{}-{}", base_symbol, stable_symbol));

        Ok(Self {
            port,
            hyperliquid_api_url,
            dexscreener_api_url,
            fetch_policy: FetchPolicy {
                endpoints,
                timeout,
                retries,
                base_delay,
            },
            preferred_quotes,
            token_addresses,
            usd_reference,
            base_symbol,
            stable_symbol,
            price_id,
        })
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn checked_url(raw: String) -> Result<String> {
    let url = Url::parse(raw.trim()).with_context(|| format!("Invalid URL: {}", raw))?;
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// `FEUSD=0x..,USDC=0x..` -> map
fn parse_address_map(list: &str) -> Result<HashMap<String, String>> {
    split_list(list)
        .into_iter()
        .map(|entry| {
            let (symbol, address) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected SYMBOL=ADDRESS, got: {}", entry))?;
            let (symbol, address) = (symbol.trim(), address.trim());
            if symbol.is_empty() || !address.starts_with("0x") {
                return Err(anyhow!("Invalid token address entry: {}", entry));
            }
            Ok((symbol.to_string(), address.to_string()))
        })
        .collect()
}

pub mod types;
pub mod sources {
    pub mod redstone;
    pub mod hyperliquid;
    pub mod dexscreener;
}
pub mod normalizers;
pub mod aggregators;
pub mod fallback;
pub mod config;

pub use types::*;
pub use aggregators::{ConversionFactor, FactorSource, StableFactorResolver};
pub use config::Settings;
pub use sources::dexscreener::{DexAggregatorResolver, DexScreenerClient};
pub use sources::hyperliquid::{HyperliquidInfoClient, SpotMidResolver};
pub use sources::redstone::{FetchPolicy, PriceFetcher};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A base asset priced in a stable's units
#[derive(Debug, Clone, Serialize)]
pub struct DerivedPrice {
    pub id: String,
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub factor: ConversionFactor,
}

/// Computes `<base>/<stable>` as `base USD price / stable USD factor`
pub struct DerivedPriceService {
    fetcher: PriceFetcher,
    stable: StableFactorResolver,
    settings: Settings,
}

impl DerivedPriceService {
    pub fn new(fetcher: PriceFetcher, stable: StableFactorResolver, settings: Settings) -> Self {
        Self {
            fetcher,
            stable,
            settings,
        }
    }

    /// Wire up the HTTP clients named in `settings`
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let venue = Arc::new(HyperliquidInfoClient::new(&settings.hyperliquid_api_url)?);
        let pools = Arc::new(DexScreenerClient::new(&settings.dexscreener_api_url)?);

        let stable = StableFactorResolver::new(
            Arc::new(SpotMidResolver::new(venue)),
            Arc::new(DexAggregatorResolver::new(pools)),
        );

        Ok(Self::new(PriceFetcher::http()?, stable, settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve the configured derived price.
    ///
    /// The base price must come from the feed. The reference token's feed price,
    /// when present, scales DEX-sourced factors; otherwise they are taken as USD.
    pub async fn derive(&self) -> Result<DerivedPrice> {
        let s = &self.settings;
        let base_symbol = s.base_symbol.to_uppercase();
        let reference_symbol = s.usd_reference.to_uppercase();

        let prices = self
            .fetcher
            .fetch(&[base_symbol.as_str(), reference_symbol.as_str()], &s.fetch_policy)
            .await?;

        let base = prices.get(&base_symbol).ok_or_else(|| {
            ResolverError::InvalidResponse(format!("No {} price in feed response", base_symbol))
        })?;

        let quotes: Vec<&str> = s.preferred_quotes.iter().map(String::as_str).collect();
        let addresses = Some(&s.token_addresses).filter(|m| !m.is_empty());

        let factor = match prices.get(&reference_symbol) {
            Some(reference) => {
                self.stable
                    .resolve_usd_factor_bridged(
                        &s.stable_symbol,
                        &quotes,
                        addresses,
                        &s.usd_reference,
                        reference.value,
                    )
                    .await
            }
            None => {
                self.stable
                    .resolve_usd_factor(&s.stable_symbol, &quotes, addresses, &s.usd_reference)
                    .await
            }
        };

        if factor.is_peg() {
            warn!("{} priced against an assumed 1:1 {} peg", s.price_id, s.stable_symbol);
        }

        let value = base.value.checked_div(factor.value).ok_or_else(|| {
            ResolverError::InvalidResponse(format!(
                "Cannot divide {} by factor {}",
                base.value, factor.value
            ))
        })?;

        info!("{} = {} ({} / {})", s.price_id, value, base.value, factor.value);

        Ok(DerivedPrice {
            id: s.price_id.clone(),
            value,
            timestamp: Utc::now(),
            factor,
        })
    }
}

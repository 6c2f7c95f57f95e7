// Tiered stable -> USD factor resolution
use crate::fallback::first_success;
use crate::sources::dexscreener::DexAggregatorResolver;
use crate::sources::hyperliquid::SpotMidResolver;
use crate::types::*;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a conversion factor came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactorSource {
    /// Order-book mid against this quote on the spot venue
    SpotMid { quote: String },
    /// DEX pool price against this reference token
    DexPool { reference: String },
    /// Nothing resolved; 1:1 assumed
    Peg,
}

/// USD-like units per 1 unit of a stable symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionFactor {
    pub value: Decimal,
    pub source: FactorSource,
}

impl ConversionFactor {
    pub fn peg() -> Self {
        Self {
            value: Decimal::ONE,
            source: FactorSource::Peg,
        }
    }

    /// True when no data source answered. Callers should treat the value as unverified.
    pub fn is_peg(&self) -> bool {
        self.source == FactorSource::Peg
    }
}

/// Resolution tiers, highest trust first
#[derive(Debug, Clone)]
enum Tier<'a> {
    SpotMid { quote: &'a str },
    DexPool { token: &'a str, reference: &'a str },
}

/// Resolves a stable's USD factor: spot mid, then DEX pool, then peg.
///
/// Never fails. Tiers run one after another, so worst-case latency is the sum of
/// every tier's own worst case.
pub struct StableFactorResolver {
    spot: Arc<SpotMidResolver>,
    dex: Arc<DexAggregatorResolver>,
}

impl StableFactorResolver {
    pub fn new(spot: Arc<SpotMidResolver>, dex: Arc<DexAggregatorResolver>) -> Self {
        Self { spot, dex }
    }

    /// Factor for `symbol`.
    ///
    /// 1. spot mid of `symbol` against each of `preferred_quotes`, in order
    /// 2. DEX price of `symbol` against `usd_reference`, when both have addresses
    /// 3. 1.0
    pub async fn resolve_usd_factor(
        &self,
        symbol: &str,
        preferred_quotes: &[&str],
        token_addresses: Option<&HashMap<String, String>>,
        usd_reference: &str,
    ) -> ConversionFactor {
        self.resolve(symbol, preferred_quotes, token_addresses, usd_reference, Decimal::ONE)
            .await
    }

    /// Like [`Self::resolve_usd_factor`], for a DEX reference token that isn't USD itself.
    ///
    /// The DEX tier yields `symbol/reference`; it is multiplied by `reference_usd_rate`
    /// (obtained independently) to give `symbol/USD`. Spot mids are used as is.
    pub async fn resolve_usd_factor_bridged(
        &self,
        symbol: &str,
        preferred_quotes: &[&str],
        token_addresses: Option<&HashMap<String, String>>,
        usd_reference: &str,
        reference_usd_rate: Decimal,
    ) -> ConversionFactor {
        self.resolve(symbol, preferred_quotes, token_addresses, usd_reference, reference_usd_rate)
            .await
    }

    async fn resolve(
        &self,
        symbol: &str,
        preferred_quotes: &[&str],
        token_addresses: Option<&HashMap<String, String>>,
        usd_reference: &str,
        reference_usd_rate: Decimal,
    ) -> ConversionFactor {
        let mut tiers: Vec<Tier> = preferred_quotes
            .iter()
            .map(|&quote| Tier::SpotMid { quote })
            .collect();

        if let Some(addresses) = token_addresses {
            if let (Some(token), Some(reference)) =
                (addresses.get(symbol), addresses.get(usd_reference))
            {
                tiers.push(Tier::DexPool {
                    token: token.as_str(),
                    reference: reference.as_str(),
                });
            }
        }

        let resolved = first_success(tiers, |tier| {
            self.try_tier(symbol, usd_reference, reference_usd_rate, tier)
        })
        .await;

        match resolved {
            Ok(factor) => {
                info!("{} USD factor {} via {:?}", symbol, factor.value, factor.source);
                factor
            }
            Err(exhausted) => {
                warn!(
                    "No price source for {} after {} tiers (last error: {}), assuming 1.0 peg",
                    symbol,
                    exhausted.attempts,
                    exhausted
                        .last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "none".to_string())
                );
                ConversionFactor::peg()
            }
        }
    }

    async fn try_tier(
        &self,
        symbol: &str,
        usd_reference: &str,
        reference_usd_rate: Decimal,
        tier: Tier<'_>,
    ) -> Result<ConversionFactor> {
        debug!("Trying {:?} for {}", tier, symbol);
        match tier {
            Tier::SpotMid { quote } => {
                let value = self.spot.resolve_mid(symbol, quote).await?;
                Ok(ConversionFactor {
                    value,
                    source: FactorSource::SpotMid {
                        quote: quote.to_string(),
                    },
                })
            }
            Tier::DexPool { token, reference } => {
                let price = self.dex.resolve_pair_price(token, reference).await?;
                let value = price.checked_mul(reference_usd_rate).ok_or_else(|| {
                    ResolverError::InvalidResponse(format!(
                        "{} * {} overflows",
                        price, reference_usd_rate
                    ))
                })?;
                Ok(ConversionFactor {
                    value,
                    source: FactorSource::DexPool {
                        reference: usd_reference.to_string(),
                    },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::dexscreener::DexPoolSource;
    use crate::sources::hyperliquid::SpotVenue;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const FEUSD_ADDR: &str = "0x88102bea0bbad5f301f6e9e4dacdf979";
    const USDC_ADDR: &str = "0xb88339cb7199b77e23db6e890353e22632ba630f";

    /// Venue where each quote either has a mid or fails
    struct ScriptedVenue {
        mids: HashMap<&'static str, Option<Decimal>>,
        quotes: Vec<&'static str>,
        last_asset: Mutex<Option<u32>>,
        meta_calls: AtomicUsize,
    }

    impl ScriptedVenue {
        /// Base token "FEUSD" at index 0, quote i at index i+1, pair i -> quote i
        fn new(mids: &[(&'static str, Option<Decimal>)]) -> Self {
            Self {
                mids: mids.iter().cloned().collect(),
                quotes: mids.iter().map(|(q, _)| *q).collect(),
                last_asset: Mutex::new(None),
                meta_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SpotVenue for ScriptedVenue {
        async fn spot_meta(&self) -> Result<SpotMeta> {
            self.meta_calls.fetch_add(1, Ordering::SeqCst);
            let mut tokens = vec![json!({"name": "FEUSD", "index": 0})];
            let mut universe = Vec::new();
            for (i, quote) in self.quotes.iter().enumerate() {
                tokens.push(json!({"name": quote, "index": i + 1}));
                universe.push(json!({
                    "baseTokenIndex": 0, "quoteTokenIndex": i + 1, "index": i
                }));
            }
            Ok(serde_json::from_value(json!({"tokens": tokens, "universe": universe})).unwrap())
        }

        async fn l2_book(&self, asset_id: u32) -> Result<OrderBookSnapshot> {
            *self.last_asset.lock().unwrap() = Some(asset_id);
            let quote = self.quotes[(asset_id - 10_000) as usize];
            match self.mids[quote] {
                Some(mid) => Ok(OrderBookSnapshot {
                    bids: vec![BookLevel { price: mid, size: Decimal::ONE }],
                    asks: vec![BookLevel { price: mid, size: Decimal::ONE }],
                }),
                None => Ok(OrderBookSnapshot::default()),
            }
        }
    }

    struct CountingPools {
        pools: Vec<DexPool>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DexPoolSource for CountingPools {
        async fn pools_for_token(&self, _token_address: &str) -> Result<Vec<DexPool>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pools.clone())
        }
    }

    fn setup(
        mids: &[(&'static str, Option<Decimal>)],
        pools: Vec<DexPool>,
    ) -> (StableFactorResolver, Arc<ScriptedVenue>, Arc<CountingPools>) {
        let venue = Arc::new(ScriptedVenue::new(mids));
        let dex_source = Arc::new(CountingPools {
            pools,
            calls: AtomicUsize::new(0),
        });
        let resolver = StableFactorResolver::new(
            Arc::new(SpotMidResolver::new(venue.clone())),
            Arc::new(DexAggregatorResolver::new(dex_source.clone())),
        );
        (resolver, venue, dex_source)
    }

    fn addresses() -> HashMap<String, String> {
        HashMap::from([
            ("FEUSD".to_string(), FEUSD_ADDR.to_string()),
            ("USDC".to_string(), USDC_ADDR.to_string()),
        ])
    }

    fn usdc_pool(price: Decimal) -> DexPool {
        DexPool {
            base_address: FEUSD_ADDR.to_string(),
            quote_address: USDC_ADDR.to_string(),
            price: Some(price),
            liquidity_usd: dec!(250000),
        }
    }

    #[tokio::test]
    async fn test_first_quote_short_circuits() {
        let (resolver, venue, dex) = setup(
            &[("USDT0", Some(dec!(0.9997))), ("USDHL", Some(dec!(1.0002)))],
            vec![usdc_pool(dec!(0.99))],
        );

        let factor = resolver
            .resolve_usd_factor("FEUSD", &["USDT0", "USDHL"], Some(&addresses()), "USDC")
            .await;

        assert_eq!(factor.value, dec!(0.9997));
        assert_eq!(factor.source, FactorSource::SpotMid { quote: "USDT0".to_string() });
        assert_eq!(venue.meta_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*venue.last_asset.lock().unwrap(), Some(10_000));
        assert_eq!(dex.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_quote_after_first_fails() {
        let (resolver, _, dex) = setup(
            &[("USDT0", None), ("USDHL", Some(dec!(1.0002)))],
            vec![],
        );

        let factor = resolver
            .resolve_usd_factor("FEUSD", &["USDT0", "USDHL"], Some(&HashMap::new()), "USDC")
            .await;

        assert_eq!(factor.value, dec!(1.0002));
        assert!(!factor.is_peg());
        assert_eq!(dex.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dex_tier_when_spot_fails() {
        let (resolver, _, dex) = setup(&[("USDT0", None)], vec![usdc_pool(dec!(0.9993))]);

        let factor = resolver
            .resolve_usd_factor("FEUSD", &["USDT0", "NOPE"], Some(&addresses()), "USDC")
            .await;

        assert_eq!(factor.value, dec!(0.9993));
        assert_eq!(factor.source, FactorSource::DexPool { reference: "USDC".to_string() });
        assert_eq!(dex.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bridged_dex_tier_applies_reference_rate() {
        let (resolver, _, _) = setup(&[], vec![usdc_pool(dec!(0.99993))]);

        let factor = resolver
            .resolve_usd_factor_bridged("FEUSD", &[], Some(&addresses()), "USDC", dec!(1.002))
            .await;

        assert_eq!(factor.value, dec!(1.00192986));
    }

    #[tokio::test]
    async fn test_bridged_spot_tier_is_not_scaled() {
        let (resolver, _, _) = setup(&[("USDT0", Some(dec!(1.0001)))], vec![]);

        let factor = resolver
            .resolve_usd_factor_bridged("FEUSD", &["USDT0"], None, "USDC", dec!(1.5))
            .await;

        assert_eq!(factor.value, dec!(1.0001));
    }

    #[tokio::test]
    async fn test_missing_address_skips_dex() {
        let (resolver, _, dex) = setup(&[], vec![usdc_pool(dec!(0.98))]);
        let mut partial = addresses();
        partial.remove("USDC");

        let factor = resolver
            .resolve_usd_factor("FEUSD", &[], Some(&partial), "USDC")
            .await;

        assert!(factor.is_peg());
        assert_eq!(dex.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_total_exhaustion_is_exact_peg() {
        let (resolver, _, dex) = setup(&[("USDT0", None), ("USDHL", None)], vec![]);

        let factor = resolver
            .resolve_usd_factor("FEUSD", &["USDT0", "USDHL", "USDC"], Some(&addresses()), "USDC")
            .await;

        assert_eq!(factor, ConversionFactor::peg());
        assert_eq!(factor.value, Decimal::ONE);
        assert_eq!(dex.calls.load(Ordering::SeqCst), 1);
    }

    /// Venue answering with raw JSON, parsed the way the HTTP client parses it
    struct RawVenue {
        meta: Value,
        book: Value,
    }

    #[async_trait::async_trait]
    impl SpotVenue for RawVenue {
        async fn spot_meta(&self) -> Result<SpotMeta> {
            serde_json::from_value(self.meta.clone())
                .map_err(|e| ResolverError::InvalidResponse(e.to_string()))
        }

        async fn l2_book(&self, _asset_id: u32) -> Result<OrderBookSnapshot> {
            OrderBookSnapshot::from_l2_response(&self.book)
        }
    }

    fn raw_resolver(pair_index: u32, book: Value, pools: Vec<DexPool>) -> StableFactorResolver {
        let venue = Arc::new(RawVenue {
            meta: json!({
                "tokens": [{"name": "FEUSD", "index": 0}, {"name": "USDT0", "index": 1}],
                "universe": [{"baseTokenIndex": 0, "quoteTokenIndex": 1, "index": pair_index}]
            }),
            book,
        });
        let pools = Arc::new(CountingPools {
            pools,
            calls: AtomicUsize::new(0),
        });
        StableFactorResolver::new(
            Arc::new(SpotMidResolver::new(venue)),
            Arc::new(DexAggregatorResolver::new(pools)),
        )
    }

    #[tokio::test]
    async fn test_broken_venue_data_falls_through_to_dex() {
        let max = "79228162514264337593543950335";
        let cases = [
            (u32::MAX, json!({"levels": [[{"px": "1"}], [{"px": "1"}]]})),
            (4, json!({"levels": [[{"px": max}], [{"px": max}]]})),
            (4, json!({"levels": [[{"px": "0"}], [{"px": "0"}]]})),
            (4, json!({"levels": [[{"px": "-2"}], [{"px": "1"}]]})),
            (4, json!({"levels": [[{"px": "0.999"}], []]})),
        ];

        for (pair_index, book) in cases {
            let resolver = raw_resolver(pair_index, book.clone(), vec![usdc_pool(dec!(0.998))]);
            let factor = resolver
                .resolve_usd_factor("FEUSD", &["USDT0"], Some(&addresses()), "USDC")
                .await;

            assert_eq!(factor.value, dec!(0.998), "book {}", book);
            assert_eq!(
                factor.source,
                FactorSource::DexPool {
                    reference: "USDC".to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn test_non_positive_dex_prices_end_at_peg() {
        let resolver = raw_resolver(
            4,
            json!({"levels": [[{"px": "0"}], [{"px": "0"}]]}),
            vec![usdc_pool(Decimal::ZERO), usdc_pool(dec!(-1))],
        );

        let factor = resolver
            .resolve_usd_factor("FEUSD", &["USDT0"], Some(&addresses()), "USDC")
            .await;

        assert_eq!(factor, ConversionFactor::peg());
    }

    #[tokio::test]
    async fn test_unknown_symbol_with_no_tiers() {
        let (resolver, _, _) = setup(&[], vec![]);

        let factor = resolver.resolve_usd_factor("", &[], None, "").await;
        assert!(factor.is_peg());
    }
}

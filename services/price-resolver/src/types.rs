use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Default provider label for feed records that don't name one
pub const DEFAULT_PROVIDER: &str = "redstone";

/// Single quote returned by a price feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub symbol: String,          // upper-cased
    pub value: Decimal,          // always > 0
    pub timestamp: Option<i64>,  // epoch time as reported by the provider
    pub provider: String,
}

/// One side-level of an order book
#[derive(Debug, Clone, PartialEq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Best-first bids and asks for one spot asset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBookSnapshot {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    /// Parse an l2Book response.
    ///
    /// Accepts either `{"levels": [[bids..], [asks..]]}` or
    /// `{"bids": [..], "asks": [..]}`. Each level carries `px` and optionally `sz`.
    pub fn from_l2_response(value: &Value) -> Result<Self> {
        let (bids, asks) = match value.get("levels").and_then(Value::as_array) {
            Some(sides) if sides.len() == 2 => (&sides[0], &sides[1]),
            _ => (
                value.get("bids").unwrap_or(&Value::Null),
                value.get("asks").unwrap_or(&Value::Null),
            ),
        };

        Ok(Self {
            bids: parse_levels(bids)?,
            asks: parse_levels(asks)?,
        })
    }

    /// Mid of best bid and best ask.
    ///
    /// `None` if either side is empty, the sum overflows, or the mid is not positive.
    pub fn mid(&self) -> Option<Decimal> {
        let best_bid = self.bids.first()?.price;
        let best_ask = self.asks.first()?.price;
        best_bid
            .checked_add(best_ask)?
            .checked_div(Decimal::TWO)
            .filter(|mid| *mid > Decimal::ZERO)
    }
}

fn parse_levels(side: &Value) -> Result<Vec<BookLevel>> {
    let Some(levels) = side.as_array() else {
        return Ok(Vec::new());
    };

    levels
        .iter()
        .map(|level| {
            let price = level
                .get("px")
                .and_then(parse_decimal)
                .filter(|px| *px > Decimal::ZERO)
                .ok_or_else(|| {
                    ResolverError::InvalidResponse(format!("Book level without a positive px: {}", level))
                })?;
            let size = level.get("sz").and_then(parse_decimal).unwrap_or_default();
            Ok(BookLevel { price, size })
        })
        .collect()
}

/// Token entry of the venue's spot catalog
#[derive(Debug, Clone, Deserialize)]
pub struct SpotToken {
    pub name: Option<String>,
    pub index: Option<u32>,
}

/// Pair entry of the venue's spot catalog
///
/// Some responses name the pair's tokens through `baseTokenIndex`/`quoteTokenIndex`,
/// others through a two-element `tokens` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotPair {
    pub base_token_index: Option<u32>,
    pub quote_token_index: Option<u32>,
    #[serde(default)]
    pub tokens: Vec<u32>,
    pub index: Option<u32>,
}

impl SpotPair {
    /// (base, quote) token indices, if the entry carries them
    pub fn token_indices(&self) -> Option<(u32, u32)> {
        match (self.base_token_index, self.quote_token_index) {
            (Some(base), Some(quote)) => Some((base, quote)),
            _ => match self.tokens.as_slice() {
                [base, quote] => Some((*base, *quote)),
                _ => None,
            },
        }
    }
}

/// Spot catalog snapshot: tokens plus tradable pairs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SpotMeta {
    #[serde(default)]
    pub tokens: Vec<SpotToken>,
    #[serde(default)]
    pub universe: Vec<SpotPair>,
}

/// Liquidity pool reported by the DEX aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct DexPool {
    pub base_address: String,
    pub quote_address: String,
    pub price: Option<Decimal>,  // None when the upstream price doesn't parse
    pub liquidity_usd: Decimal,
}

/// Parse a JSON number or numeric string into a Decimal
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        Value::String(s) => parse_decimal_str(s.trim()),
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    if s.is_empty() {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Error types for price resolution
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Unrecognized payload shape: {0}")]
    UnrecognizedPayload(String),

    #[error("No usable data from {endpoint}")]
    NoUsableData { endpoint: String },

    #[error("Token not in spot catalog: {0}")]
    UnknownToken(String),

    #[error("Spot pair not found: {base}/{quote}")]
    PairNotFound { base: String, quote: String },

    #[error("No liquidity on book for {base}/{quote}")]
    NoLiquidity { base: String, quote: String },

    #[error("No available spot mid for {base} against {quotes:?}: {}", describe(.last_error))]
    NoQuoteAvailable {
        base: String,
        quotes: Vec<String>,
        last_error: Option<Box<ResolverError>>,
    },

    #[error("No suitable pool for {token_a} vs {token_b}")]
    NoPoolFound { token_a: String, token_b: String },

    #[error("Failed to fetch prices after {attempts} attempts: {}", describe(.last_error))]
    ExhaustedRetries {
        attempts: u32,
        last_error: Option<Box<ResolverError>>,
    },
}

fn describe(err: &Option<Box<ResolverError>>) -> String {
    match err {
        Some(e) => e.to_string(),
        None => "no attempt made".to_string(),
    }
}

/// Result type for resolution operations
pub type Result<T> = std::result::Result<T, ResolverError>;

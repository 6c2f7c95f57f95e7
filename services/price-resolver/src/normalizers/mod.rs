// Normalization of loosely-typed price feed payloads into PriceRecords
use crate::types::*;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

/// Response body shapes a price gateway is known to return
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// `[{"symbol": "BTC", "value": 65000, ...}, ...]`
    List(Vec<Value>),
    /// `{"BTC": {"value": 65000, ...}, ...}`
    Mapping(Map<String, Value>),
    /// Text that may hold one of the other shapes, JSON-encoded once more
    Text(String),
}

impl RawPayload {
    /// Classify a raw HTTP body. Bodies that aren't JSON are kept as text.
    pub fn from_body(body: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_value(value),
            Err(_) => Ok(RawPayload::Text(body.to_string())),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => Ok(RawPayload::List(items)),
            Value::Object(map) => Ok(RawPayload::Mapping(map)),
            Value::String(text) => Ok(RawPayload::Text(text)),
            other => Err(ResolverError::UnrecognizedPayload(json_type(&other).to_string())),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Normalize any payload shape into canonical records
pub fn normalize_payload(payload: RawPayload) -> Result<Vec<PriceRecord>> {
    match payload {
        RawPayload::List(items) => Ok(normalize_list(&items)),
        RawPayload::Mapping(map) => Ok(normalize_mapping(&map)),
        RawPayload::Text(text) => normalize_text(&text),
    }
}

/// Records from a list payload. Malformed entries are skipped.
pub fn normalize_list(items: &[Value]) -> Vec<PriceRecord> {
    items
        .iter()
        .filter_map(|item| {
            let symbol = item.get("symbol")?.as_str()?;
            record_from_fields(symbol, item)
        })
        .collect()
}

/// Records from a mapping keyed by symbol. Malformed entries are skipped.
pub fn normalize_mapping(map: &Map<String, Value>) -> Vec<PriceRecord> {
    map.iter()
        .filter_map(|(symbol, fields)| {
            if !fields.is_object() {
                return None;
            }
            record_from_fields(symbol, fields)
        })
        .collect()
}

/// Text must hold a JSON list or mapping; it is decoded once and normalized as such
pub fn normalize_text(text: &str) -> Result<Vec<PriceRecord>> {
    let trimmed = text.trim();
    let bracketed = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if !bracketed {
        return Err(ResolverError::UnrecognizedPayload(format!(
            "text body is not JSON: {:.64}",
            trimmed
        )));
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| ResolverError::UnrecognizedPayload(format!("text body failed to decode: {}", e)))?;

    match value {
        Value::Array(items) => Ok(normalize_list(&items)),
        Value::Object(map) => Ok(normalize_mapping(&map)),
        other => Err(ResolverError::UnrecognizedPayload(json_type(&other).to_string())),
    }
}

fn record_from_fields(symbol: &str, fields: &Value) -> Option<PriceRecord> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return None;
    }

    let value = fields.get("value").and_then(parse_decimal)?;
    if value <= Decimal::ZERO {
        return None;
    }

    let timestamp = fields.get("timestamp").and_then(|ts| {
        ts.as_i64().or_else(|| ts.as_f64().map(|f| f as i64))
    });

    let provider = fields
        .get("provider")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROVIDER)
        .to_string();

    Some(PriceRecord {
        symbol,
        value,
        timestamp,
        provider,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_list_payload() {
        let payload = RawPayload::from_body(
            r#"[{"symbol":"btc","value":65000.5,"timestamp":1726000000000,"provider":"rs-main"}]"#,
        )
        .unwrap();

        let records = normalize_payload(payload).unwrap();
        assert_eq!(
            records,
            vec![PriceRecord {
                symbol: "BTC".to_string(),
                value: dec!(65000.5),
                timestamp: Some(1726000000000),
                provider: "rs-main".to_string(),
            }]
        );
    }

    #[test]
    fn test_mapping_payload_defaults_provider() {
        let payload = RawPayload::from_value(json!({
            "ETH": {"value": "3200.25"},
            "junk": 12,
        }))
        .unwrap();

        let records = normalize_payload(payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "ETH");
        assert_eq!(records[0].value, dec!(3200.25));
        assert_eq!(records[0].timestamp, None);
        assert_eq!(records[0].provider, DEFAULT_PROVIDER);
    }

    #[test]
    fn test_double_encoded_text() {
        let inner = r#"{"BTC": {"value": 65000, "timestamp": 123, "provider": "x"}}"#;
        let body = serde_json::to_string(inner).unwrap();

        let payload = RawPayload::from_body(&body).unwrap();
        assert!(matches!(payload, RawPayload::Text(_)));

        let records = normalize_payload(payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].value, dec!(65000));
        assert_eq!(records[0].timestamp, Some(123));
        assert_eq!(records[0].provider, "x");
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let records = normalize_list(&[
            json!({"symbol": "BTC", "value": 1}),
            json!({"symbol": "ETH"}),
            json!({"value": 3}),
            json!({"symbol": "SOL", "value": "n/a"}),
            json!({"symbol": "DOGE", "value": 0}),
            json!("garbage"),
        ]);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "BTC");
    }

    #[test]
    fn test_unrecognized_shapes() {
        assert!(matches!(
            RawPayload::from_body("42"),
            Err(ResolverError::UnrecognizedPayload(_))
        ));
        assert!(matches!(
            normalize_text("<html>bad gateway</html>"),
            Err(ResolverError::UnrecognizedPayload(_))
        ));
        assert!(matches!(
            normalize_text("[not json]"),
            Err(ResolverError::UnrecognizedPayload(_))
        ));
    }

    #[test]
    fn test_plain_text_body_is_kept_as_text() {
        let payload = RawPayload::from_body("Service Unavailable").unwrap();
        assert_eq!(payload, RawPayload::Text("Service Unavailable".to_string()));
    }
}

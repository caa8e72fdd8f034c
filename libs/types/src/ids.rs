//! Unique identifier types for stream entities
//!
//! Symbols identify the market a channel is bound to; request IDs use
//! UUID v7 so worker traffic can be correlated and sorted chronologically.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Market symbol identifier (exchange ticker)
///
/// Format: uppercase base+quote ticker (e.g., "BTCUSDT", "ETHUSDT").
/// Deserialization validates and normalizes, so a wire payload cannot
/// carry a symbol violating the format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct SymbolId(String);

/// Rejected symbol format.
#[derive(Debug, Clone, thiserror::Error)]
#[error("symbol must be a non-empty alphanumeric ticker")]
pub struct InvalidSymbol;

impl TryFrom<String> for SymbolId {
    type Error = InvalidSymbol;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::try_new(s).ok_or(InvalidSymbol)
    }
}

impl SymbolId {
    /// Create a new SymbolId, normalizing to uppercase.
    ///
    /// # Panics
    /// Panics if the symbol is empty or contains non-alphanumeric characters.
    pub fn new(symbol: impl Into<String>) -> Self {
        let s: String = symbol.into();
        assert!(
            !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()),
            "SymbolId must be a non-empty alphanumeric ticker"
        );
        Self(s.to_ascii_uppercase())
    }

    /// Try to create a SymbolId, returning None if invalid.
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s: String = symbol.into();
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(Self(s.to_ascii_uppercase()))
        } else {
            None
        }
    }

    /// Get the ticker string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in stream endpoint paths.
    pub fn to_lowercase(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SymbolId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for a compute request
///
/// Uses UUID v7 for time-based sorting, so worker request/response pairs
/// can be correlated and replayed in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Create a new RequestId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_id_creation() {
        let symbol = SymbolId::new("btcusdt");
        assert_eq!(symbol.as_str(), "BTCUSDT");
        assert_eq!(symbol.to_lowercase(), "btcusdt");
    }

    #[test]
    fn test_symbol_id_try_new() {
        assert!(SymbolId::try_new("ETHUSDT").is_some());
        assert!(SymbolId::try_new("").is_none());
        assert!(SymbolId::try_new("BTC/USDT").is_none());
    }

    #[test]
    #[should_panic(expected = "SymbolId must be a non-empty alphanumeric ticker")]
    fn test_symbol_id_invalid_format() {
        SymbolId::new("BTC-USDT");
    }

    #[test]
    fn test_symbol_id_serialization() {
        let symbol = SymbolId::new("BTCUSDT");
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"BTCUSDT\"");

        let deserialized: SymbolId = serde_json::from_str(&json).unwrap();
        assert_eq!(symbol, deserialized);
    }

    #[test]
    fn test_symbol_id_deserialization_validates() {
        // Malformed wire symbols are rejected, not smuggled in
        assert!(serde_json::from_str::<SymbolId>("\"BTC/USDT\"").is_err());
        assert!(serde_json::from_str::<SymbolId>("\"\"").is_err());

        // Lowercase input normalizes on the way in
        let symbol: SymbolId = serde_json::from_str("\"ethusdt\"").unwrap();
        assert_eq!(symbol.as_str(), "ETHUSDT");
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2, "RequestIds should be unique");
    }

    #[test]
    fn test_request_id_serialization() {
        let id = RequestId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: RequestId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }
}

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price reply from the quote feed. Never persisted by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub stock: String,
    pub username: String,
    pub price: Decimal,
    // seconds, as reported by the feed
    pub timestamp: i64,
    pub crypto_key: String,
}

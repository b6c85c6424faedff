use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which half of the trigger book a request lives in.
///
/// A BUY trigger is a limit buy: it fires once the quote falls to or below
/// the waiting price. A SELL trigger is a limit sell and fires once the quote
/// rises to or above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Buy, Side::Sell];

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// True when a quote at `quote` satisfies a trigger waiting at `level`.
    pub fn is_crossed(self, level: Decimal, quote: Decimal) -> bool {
        match self {
            Side::Buy => quote <= level,
            Side::Sell => quote >= level,
        }
    }

    /// Orders price levels from the one a falling (BUY) or rising (SELL)
    /// quote reaches first: descending for BUY, ascending for SELL.
    pub fn level_order(self, a: Decimal, b: Decimal) -> Ordering {
        match self {
            Side::Buy => b.cmp(&a),
            Side::Sell => a.cmp(&b),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

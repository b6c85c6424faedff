use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::Side;

/// Failures of a single command. The `Display` text is what ends up in the
/// `Error` field of the response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    /// Missing or malformed command fields. Never retried.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },

    #[error("insufficient stock {stock}: owned {owned}, required {required}")]
    InsufficientStock {
        stock: String,
        owned: Decimal,
        required: Decimal,
    },

    /// Commit with no staged trade, or one older than the commit window.
    #[error("no recent {0} order to act on, or it has expired")]
    StaleOrMissingOrder(Side),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("no {side} amount reserved for {stock}")]
    NothingReserved { side: Side, stock: String },

    #[error("set a {side} amount for {stock} before setting a trigger")]
    TriggerWithoutReservation { side: Side, stock: String },

    /// A balance or position would leave the representable range.
    #[error("amount out of range: {0}")]
    AmountOutOfRange(String),

    #[error("ledger store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("quote feed unavailable: {0}")]
    FeedUnavailable(String),
}

/// Errors from a `LedgerStore` / `EventStore` backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

impl From<StoreError> for TradeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(user) => TradeError::AccountNotFound(user),
            other => TradeError::StoreUnavailable(other.to_string()),
        }
    }
}

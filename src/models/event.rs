use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fields shared by user commands and system-initiated trades.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandEvent {
    pub timestamp: i64,
    pub server: String,
    pub transaction_num: i64,
    pub command: String,
    pub username: String,
    pub stock_symbol: String,
    pub filename: String,
    pub funds: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuoteEvent {
    pub timestamp: i64,
    pub server: String,
    pub transaction_num: i64,
    pub price: Decimal,
    pub stock_symbol: String,
    pub username: String,
    pub quote_server_time: i64,
    pub cryptokey: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccountTransactionEvent {
    pub timestamp: i64,
    pub server: String,
    pub transaction_num: i64,
    // "add" | "remove"
    pub action: String,
    pub username: String,
    pub funds: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub command: CommandEvent,
    pub message: String,
}

/// One entry of the audit trail, stored as `{eventType, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data", rename_all = "camelCase")]
pub enum AuditEvent {
    UserCommand(CommandEvent),
    QuoteServer(QuoteEvent),
    AccountTransaction(AccountTransactionEvent),
    SystemEvent(CommandEvent),
    ErrorEvent(MessageEvent),
    DebugEvent(MessageEvent),
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::UserCommand(_) => "userCommand",
            AuditEvent::QuoteServer(_) => "quoteServer",
            AuditEvent::AccountTransaction(_) => "accountTransaction",
            AuditEvent::SystemEvent(_) => "systemEvent",
            AuditEvent::ErrorEvent(_) => "errorEvent",
            AuditEvent::DebugEvent(_) => "debugEvent",
        }
    }

    pub fn username(&self) -> &str {
        match self {
            AuditEvent::UserCommand(e) | AuditEvent::SystemEvent(e) => &e.username,
            AuditEvent::QuoteServer(e) => &e.username,
            AuditEvent::AccountTransaction(e) => &e.username,
            AuditEvent::ErrorEvent(e) | AuditEvent::DebugEvent(e) => &e.command.username,
        }
    }

    pub fn transaction_num(&self) -> i64 {
        match self {
            AuditEvent::UserCommand(e) | AuditEvent::SystemEvent(e) => e.transaction_num,
            AuditEvent::QuoteServer(e) => e.transaction_num,
            AuditEvent::AccountTransaction(e) => e.transaction_num,
            AuditEvent::ErrorEvent(e) | AuditEvent::DebugEvent(e) => e.command.transaction_num,
        }
    }
}

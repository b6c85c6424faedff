use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;

use crate::errors::StoreError;
use crate::models::event::{AccountTransactionEvent, CommandEvent, MessageEvent, QuoteEvent};
use crate::models::{AuditEvent, Command, Quote};
use crate::now_ms;

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    /// Events in insertion order, optionally only those of one user.
    async fn list_events(&self, username: Option<&str>) -> Result<Vec<AuditEvent>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.events.write().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, username: Option<&str>) -> Result<Vec<AuditEvent>, StoreError> {
        let events = self.events.read();
        Ok(events
            .iter()
            .filter(|e| username.map_or(true, |u| e.username() == u))
            .cloned()
            .collect())
    }
}

/// Fire-and-forget writer for the audit trail.
///
/// `record` never blocks the caller: each event is written on its own task,
/// retried with doubling backoff, and dropped with an error log once
/// `max_attempts` is exhausted.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn EventStore>,
    server: String,
    max_attempts: u32,
    backoff: Duration,
}

impl AuditLog {
    pub fn new(store: Arc<dyn EventStore>, server: &str, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            store,
            server: server.to_string(),
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn command_event(&self, tx: i64, cmd: &Command) -> CommandEvent {
        CommandEvent {
            timestamp: now_ms(),
            server: self.server.clone(),
            transaction_num: tx,
            command: cmd.kind.to_string(),
            username: cmd.username.clone(),
            stock_symbol: cmd.stock.clone(),
            filename: cmd.filename.clone(),
            funds: cmd.amount,
        }
    }

    pub fn user_command(&self, tx: i64, cmd: &Command) -> JoinHandle<()> {
        self.record(AuditEvent::UserCommand(self.command_event(tx, cmd)))
    }

    /// Trade executed by the system on a user's behalf.
    pub fn system_event(&self, tx: i64, cmd: &Command) -> JoinHandle<()> {
        self.record(AuditEvent::SystemEvent(self.command_event(tx, cmd)))
    }

    pub fn quote_fetched(&self, tx: i64, quote: &Quote) -> JoinHandle<()> {
        self.record(AuditEvent::QuoteServer(QuoteEvent {
            timestamp: now_ms(),
            server: self.server.clone(),
            transaction_num: tx,
            price: quote.price,
            stock_symbol: quote.stock.clone(),
            username: quote.username.clone(),
            quote_server_time: quote.timestamp,
            cryptokey: quote.crypto_key.clone(),
        }))
    }

    /// `action` is "add" or "remove".
    pub fn account_transaction(&self, tx: i64, username: &str, action: &str, funds: Decimal) -> JoinHandle<()> {
        self.record(AuditEvent::AccountTransaction(AccountTransactionEvent {
            timestamp: now_ms(),
            server: self.server.clone(),
            transaction_num: tx,
            action: action.to_string(),
            username: username.to_string(),
            funds,
        }))
    }

    pub fn error_event(&self, tx: i64, cmd: &Command, message: &str) -> JoinHandle<()> {
        self.record(AuditEvent::ErrorEvent(MessageEvent {
            command: self.command_event(tx, cmd),
            message: message.to_string(),
        }))
    }

    pub fn debug_event(&self, tx: i64, cmd: &Command, message: &str) -> JoinHandle<()> {
        self.record(AuditEvent::DebugEvent(MessageEvent {
            command: self.command_event(tx, cmd),
            message: message.to_string(),
        }))
    }

    pub fn record(&self, event: AuditEvent) -> JoinHandle<()> {
        let store = self.store.clone();
        let max_attempts = self.max_attempts;
        let backoff = self.backoff;

        tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                match store.insert_event(&event).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(
                            "audit write failed (attempt {attempt}/{max_attempts}, {}): {e}",
                            event.kind()
                        );
                    }
                }

                if attempt < max_attempts {
                    let factor = 1u32 << (attempt - 1).min(16);
                    tokio::time::sleep(backoff.saturating_mul(factor)).await;
                }
            }

            tracing::error!(
                "dropping {} event for transaction {} after {max_attempts} attempts",
                event.kind(),
                event.transaction_num()
            );
        })
    }

    pub async fn dump(&self, username: Option<&str>) -> Result<Vec<AuditEvent>, StoreError> {
        self.store.list_events(username).await
    }
}

//! Library entrypoint for DayTrader.
//!
//! Integration tests under `tests/` build an [`AppState`] over the in-memory
//! stores and drive the router, the command handler and the pollers directly.

use std::sync::Arc;

use tokio::task::JoinHandle;

pub mod config;
pub mod errors;
pub mod models;
pub mod services;

pub mod controllers;
pub mod routes;

use models::Side;
use services::{
    AuditLog, CommandHandler, EventStore, Ledger, LedgerStore, QuoteSource, TransactionCounter,
    TriggerRegistry,
};

/// Wall clock in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone)]
pub struct AppState {
    pub settings: config::Settings,
    pub handler: Arc<CommandHandler>,
}

impl AppState {
    pub fn new(
        settings: config::Settings,
        store: Arc<dyn LedgerStore>,
        events: Arc<dyn EventStore>,
        quotes: Arc<dyn QuoteSource>,
    ) -> Self {
        let registry = Arc::new(TriggerRegistry::new());
        let ledger = Arc::new(Ledger::new(store, registry, settings.staged_trade_window));
        let audit = AuditLog::new(
            events,
            &settings.server_name,
            settings.audit_max_attempts,
            settings.audit_backoff,
        );
        let handler = CommandHandler::new(ledger, quotes, audit, Arc::new(TransactionCounter::new()));

        Self {
            settings,
            handler: Arc::new(handler),
        }
    }

    /// Starts the BUY and SELL trigger pollers.
    pub fn spawn_pollers(&self) -> Vec<JoinHandle<()>> {
        Side::ALL
            .iter()
            .map(|&side| {
                self.handler
                    .poller(side, self.settings.trigger_poll_interval)
                    .spawn()
            })
            .collect()
    }
}

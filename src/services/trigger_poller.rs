use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;

use crate::errors::TradeError;
use crate::models::{Command, CommandKind, Side};

use super::audit::AuditLog;
use super::command_handler::TransactionCounter;
use super::ledger::Ledger;
use super::quote_feed::QuoteSource;
use super::trigger_registry::TriggerRegistry;

/// Background task serving one side of the trigger book.
///
/// Sleeps on the book's change signal while it is empty. Otherwise it walks
/// the registered stocks, one quote per stock, fulfills every crossed price
/// level, and waits for either the next change or `interval`.
#[derive(Clone)]
pub struct TriggerPoller {
    side: Side,
    registry: Arc<TriggerRegistry>,
    ledger: Arc<Ledger>,
    quotes: Arc<dyn QuoteSource>,
    audit: AuditLog,
    counter: Arc<TransactionCounter>,
    interval: Duration,
    // stocks whose last poll panicked
    faulted: Arc<Mutex<HashSet<String>>>,
}

impl TriggerPoller {
    pub fn new(
        side: Side,
        ledger: Arc<Ledger>,
        quotes: Arc<dyn QuoteSource>,
        audit: AuditLog,
        counter: Arc<TransactionCounter>,
        interval: Duration,
    ) -> Self {
        Self {
            side,
            registry: ledger.registry().clone(),
            ledger,
            quotes,
            audit,
            counter,
            interval,
            faulted: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("{} trigger poller started", self.side);
            let book = self.registry.book(self.side);

            loop {
                if book.is_empty() {
                    book.changed().await;
                    continue;
                }

                // fulfillments run detached
                drop(self.run_pass().await);

                tokio::select! {
                    _ = book.changed() => {}
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        })
    }

    /// One sweep over every stock in the book. Returns the handles of the
    /// fulfillment tasks it started.
    pub async fn run_pass(&self) -> Vec<JoinHandle<()>> {
        let mut fulfillments = Vec::new();

        for stock in self.registry.book(self.side).stocks() {
            let this = self.clone();
            let sym = stock.clone();
            // a panic while polling one stock must not end the loop
            match tokio::spawn(async move { this.poll_stock(&sym).await }).await {
                Ok(handles) => {
                    if self.faulted.lock().remove(&stock) {
                        tracing::info!("{} poll of {stock} recovered", self.side);
                    }
                    fulfillments.extend(handles);
                }
                Err(e) => {
                    if self.faulted.lock().insert(stock.clone()) {
                        tracing::warn!("{} poll of {stock} aborted: {e}", self.side);
                    } else {
                        tracing::debug!("{} poll of {stock} aborted again: {e}", self.side);
                    }
                }
            }
        }

        fulfillments
    }

    /// Stocks whose most recent poll panicked, sorted.
    pub fn faulted_stocks(&self) -> Vec<String> {
        let mut stocks: Vec<String> = self.faulted.lock().iter().cloned().collect();
        stocks.sort();
        stocks
    }

    async fn poll_stock(&self, stock: &str) -> Vec<JoinHandle<()>> {
        let quote = match self.quotes.quote(stock, self.audit.server()).await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!("{} poller skipping {stock} this pass: {e}", self.side);
                return Vec::new();
            }
        };
        self.audit.quote_fetched(self.counter.next(), &quote);

        // registry lock is held only inside take_crossed
        let crossed = self.registry.take_crossed(self.side, stock, quote.price);

        let mut handles = Vec::new();
        for (price, users) in crossed {
            tracing::info!(
                "{} {stock} @ {price} crossed by quote {}: {} waiting",
                self.side,
                quote.price,
                users.len()
            );
            for user in users {
                let this = self.clone();
                let stock = stock.to_string();
                handles.push(tokio::spawn(async move {
                    this.fulfill(&stock, &user, price).await;
                }));
            }
        }
        handles
    }

    async fn fulfill(&self, stock: &str, username: &str, price: Decimal) {
        let tx = self.counter.next();
        let kind = match self.side {
            Side::Buy => CommandKind::SetBuyTrigger,
            Side::Sell => CommandKind::SetSellTrigger,
        };
        let cmd = Command::new(kind, username)
            .with_stock(stock)
            .with_amount(price);

        match self.ledger.fulfill_trigger(self.side, username, stock, price, tx).await {
            Ok(Some(credited)) => {
                tracing::info!("{} trigger for {username} on {stock} @ {price} executed: +{credited}", self.side);
                self.audit.system_event(tx, &cmd);
                if self.side == Side::Sell {
                    self.audit.account_transaction(tx, username, "add", credited);
                }
            }
            Ok(None) => {
                tracing::debug!("{} trigger for {username} on {stock} @ {price} no longer reserved", self.side);
                self.audit.debug_event(tx, &cmd, "trigger no longer reserved at this price");
            }
            Err(e @ TradeError::StoreUnavailable(_)) => {
                tracing::error!("{} trigger for {username} on {stock} failed, requeued: {e}", self.side);
                self.audit.error_event(tx, &cmd, &e.to_string());
            }
            Err(e) => {
                tracing::error!("{} trigger for {username} on {stock} failed: {e}", self.side);
                self.audit.error_event(tx, &cmd, &e.to_string());
            }
        }
    }
}

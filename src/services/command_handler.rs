use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::json;

use crate::errors::TradeError;
use crate::models::event::{CommandEvent, MessageEvent};
use crate::models::{AuditEvent, Command, CommandKind, CommandRequest, CommandResponse, Quote, Side, UserAccount};
use crate::now_ms;

use super::audit::AuditLog;
use super::ledger::Ledger;
use super::quote_feed::QuoteSource;
use super::trigger_poller::TriggerPoller;

/// Process-wide transaction numbers, strictly increasing from 1.
#[derive(Debug, Default)]
pub struct TransactionCounter(AtomicI64);

impl TransactionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Entry point for parsed commands. Stateless between commands apart from
/// the transaction counter.
pub struct CommandHandler {
    ledger: Arc<Ledger>,
    quotes: Arc<dyn QuoteSource>,
    audit: AuditLog,
    counter: Arc<TransactionCounter>,
}

fn trade_side(cmd: &Command) -> Result<Side, TradeError> {
    cmd.side()
        .ok_or_else(|| TradeError::InvalidCommand(format!("{} has no side", cmd.kind)))
}

fn summary(acc: &UserAccount) -> serde_json::Value {
    let pending = |side: Side| {
        let staged = acc.staged(side);
        if staged.is_empty() { None } else { Some(staged.clone()) }
    };

    json!({
        "username": acc.username,
        "balance": acc.balance,
        "stocks": acc.stocks,
        "reserved": { "buy": acc.buy_amounts, "sell": acc.sell_amounts },
        "triggers": { "buy": acc.buy_triggers, "sell": acc.sell_triggers },
        "pendingBuy": pending(Side::Buy),
        "pendingSell": pending(Side::Sell),
        "transactions": acc.transactions,
    })
}

impl CommandHandler {
    pub fn new(
        ledger: Arc<Ledger>,
        quotes: Arc<dyn QuoteSource>,
        audit: AuditLog,
        counter: Arc<TransactionCounter>,
    ) -> Self {
        Self {
            ledger,
            quotes,
            audit,
            counter,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Poller for one side, sharing this handler's ledger, feed and audit log.
    pub fn poller(&self, side: Side, interval: Duration) -> TriggerPoller {
        TriggerPoller::new(
            side,
            self.ledger.clone(),
            self.quotes.clone(),
            self.audit.clone(),
            self.counter.clone(),
            interval,
        )
    }

    /// Raw gateway request in, response out. Requests that fail validation
    /// are still audited.
    pub async fn handle_request(&self, req: CommandRequest) -> CommandResponse {
        let name = req.command.trim().to_uppercase();
        let username = req.username.clone();
        let stock = req.stock.clone();
        let filename = req.filename.clone();

        match Command::try_from(req) {
            Ok(cmd) => self.handle(cmd).await,
            Err(e) => {
                let tx = self.counter.next();
                tracing::warn!("rejected {name:?} for {username:?}: {e}");
                self.audit.record(AuditEvent::ErrorEvent(MessageEvent {
                    command: CommandEvent {
                        timestamp: now_ms(),
                        server: self.audit.server().to_string(),
                        transaction_num: tx,
                        command: name.clone(),
                        username,
                        stock_symbol: stock,
                        filename,
                        funds: None,
                    },
                    message: e.to_string(),
                }));
                CommandResponse::err(&name, &e)
            }
        }
    }

    pub async fn handle(&self, cmd: Command) -> CommandResponse {
        let tx = self.counter.next();
        self.audit.user_command(tx, &cmd);

        match self.dispatch(tx, &cmd).await {
            Ok(payload) => CommandResponse::ok(cmd.kind.as_str(), payload.to_string().into_bytes()),
            Err(e) => {
                match &e {
                    TradeError::StoreUnavailable(_) => tracing::error!("tx {tx} {} for {}: {e}", cmd.kind, cmd.username),
                    _ => tracing::info!("tx {tx} {} for {} rejected: {e}", cmd.kind, cmd.username),
                }
                self.audit.error_event(tx, &cmd, &e.to_string());
                CommandResponse::err(cmd.kind.as_str(), &e)
            }
        }
    }

    async fn fetch_quote(&self, tx: i64, stock: &str, username: &str) -> Result<Quote, TradeError> {
        let quote = self.quotes.quote(stock, username).await?;
        self.audit.quote_fetched(tx, &quote);
        Ok(quote)
    }

    async fn dispatch(&self, tx: i64, cmd: &Command) -> Result<serde_json::Value, TradeError> {
        cmd.validate()?;
        let user = cmd.username.as_str();
        let stock = cmd.stock.as_str();

        let payload = match cmd.kind {
            CommandKind::Add => {
                let amount = cmd.positive_amount()?;
                let balance = self.ledger.deposit(user, amount, tx).await?;
                self.audit.account_transaction(tx, user, "add", amount);
                json!({ "username": user, "balance": balance })
            }

            CommandKind::Buy | CommandKind::Sell => {
                let side = trade_side(cmd)?;
                let amount = cmd.positive_amount()?;
                // unknown users never reach the feed
                self.ledger.account(user).await?;
                let quote = self.fetch_quote(tx, stock, user).await?;
                let staged = self.ledger.stage(side, user, stock, amount, quote.price).await?;
                json!({ "side": side, "staged": staged })
            }

            CommandKind::CommitBuy | CommandKind::CommitSell => {
                let side = trade_side(cmd)?;
                let (trade, acc) = self.ledger.commit(side, user, tx).await?;
                match side {
                    Side::Buy => self.audit.account_transaction(tx, user, "remove", trade.amount),
                    Side::Sell => self.audit.account_transaction(tx, user, "add", trade.amount * trade.price),
                };
                json!({
                    "side": side,
                    "stock": trade.stock,
                    "amount": trade.amount,
                    "price": trade.price,
                    "balance": acc.balance,
                    "shares": acc.shares(&trade.stock),
                })
            }

            CommandKind::CancelBuy | CommandKind::CancelSell => {
                let side = trade_side(cmd)?;
                self.ledger.cancel_staged(side, user).await?;
                json!({ "side": side, "cancelled": true })
            }

            CommandKind::SetBuyAmount | CommandKind::SetSellAmount => {
                let side = trade_side(cmd)?;
                let amount = cmd.positive_amount()?;
                let acc = self.ledger.reserve(side, user, stock, amount).await?;
                if side == Side::Buy {
                    self.audit.account_transaction(tx, user, "remove", amount);
                }
                json!({
                    "side": side,
                    "stock": stock,
                    "reserved": amount,
                    "balance": acc.balance,
                    "shares": acc.shares(stock),
                })
            }

            CommandKind::SetBuyTrigger | CommandKind::SetSellTrigger => {
                let side = trade_side(cmd)?;
                let price = cmd.positive_amount()?;
                let previous = self.ledger.set_trigger(side, user, stock, price).await?;
                json!({ "side": side, "stock": stock, "price": price, "previous": previous })
            }

            CommandKind::CancelSetBuy | CommandKind::CancelSetSell => {
                let side = trade_side(cmd)?;
                let refunded = self.ledger.cancel_reserved(side, user, stock).await?;
                if side == Side::Buy {
                    self.audit.account_transaction(tx, user, "add", refunded);
                }
                json!({ "side": side, "stock": stock, "refunded": refunded })
            }

            CommandKind::DisplaySummary => summary(&self.ledger.account(user).await?),

            CommandKind::Dumplog => {
                let scope = if user.is_empty() { None } else { Some(user) };
                let events = self.audit.dump(scope).await?;
                json!({ "filename": cmd.filename, "events": events })
            }

            CommandKind::Quote => json!(self.fetch_quote(tx, stock, user).await?),
        };

        Ok(payload)
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::errors::{StoreError, TradeError};
use crate::models::{AccountUpdate, Side, StagedTrade, Transaction, UserAccount};
use crate::now_ms;

use super::store::LedgerStore;
use super::trigger_registry::TriggerRegistry;

/// Account operations. Every read-modify-write for one username runs under
/// that user's lock, so staged commits, reservations and trigger fulfillment
/// for the same account never interleave.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    registry: Arc<TriggerRegistry>,
    commit_window: Duration,
    user_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Holds one user's lock. The map entry goes away with the last holder or
/// waiter, so the map only ever contains users with work in flight.
struct UserGuard<'a> {
    locks: &'a Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    username: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        // waiters clone the Arc under this same map lock
        if locks.get(&self.username).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.username);
        }
    }
}

fn tx_record(id: i64, now: i64, kind: &str, amount: Decimal, stock: &str) -> Transaction {
    Transaction {
        id,
        timestamp: now,
        transaction_type: kind.to_string(),
        amount,
        stock: stock.to_string(),
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, registry: Arc<TriggerRegistry>, commit_window: Duration) -> Self {
        Self {
            store,
            registry,
            commit_window,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    async fn lock_user(&self, username: &str) -> UserGuard<'_> {
        let lock = self
            .user_locks
            .lock()
            .entry(username.to_string())
            .or_default()
            .clone();
        UserGuard {
            locks: &self.user_locks,
            username: username.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Users with a lock held or awaited right now.
    pub fn locked_users(&self) -> usize {
        self.user_locks.lock().len()
    }

    async fn modify<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserAccount, i64) -> Result<(T, AccountUpdate), TradeError>,
    ) -> Result<T, TradeError> {
        let _guard = self.lock_user(username).await;
        self.modify_locked(username, f).await
    }

    // caller holds the user's lock
    async fn modify_locked<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserAccount, i64) -> Result<(T, AccountUpdate), TradeError>,
    ) -> Result<T, TradeError> {
        let mut account = self.store.find_account(username).await?;
        let (out, update) = f(&mut account, now_ms())?;
        self.store.update_account(username, &update).await?;
        Ok(out)
    }

    pub async fn account(&self, username: &str) -> Result<UserAccount, TradeError> {
        Ok(self.store.find_account(username).await?)
    }

    /// Adds funds, opening the account on first use. Returns the new balance.
    pub async fn deposit(&self, username: &str, amount: Decimal, tx: i64) -> Result<Decimal, TradeError> {
        let _guard = self.lock_user(username).await;
        let now = now_ms();

        let mut account = match self.store.find_account(username).await {
            Ok(acc) => acc,
            Err(StoreError::NotFound(_)) => {
                tracing::info!("opening account for {username}");
                match self.store.create_account(&UserAccount::new(username, now)).await {
                    Ok(acc) => acc,
                    Err(StoreError::AlreadyExists(_)) => self.store.find_account(username).await?,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        account.deposit(amount)?;
        let update = AccountUpdate::new(now)
            .balance(&account)
            .transaction(tx_record(tx, now, "add", amount, ""));
        self.store.update_account(username, &update).await?;

        Ok(account.balance)
    }

    /// SET_BUY_AMOUNT / SET_SELL_AMOUNT.
    pub async fn reserve(&self, side: Side, username: &str, stock: &str, amount: Decimal) -> Result<UserAccount, TradeError> {
        self.modify(username, |acc, now| {
            acc.reserve(side, stock, amount)?;
            let update = AccountUpdate::new(now).amounts(side, acc);
            let update = match side {
                Side::Buy => update.balance(acc),
                Side::Sell => update.stocks(acc),
            };
            Ok((acc.clone(), update))
        })
        .await
    }

    /// BUY / SELL: records the order against `price` without moving anything.
    pub async fn stage(
        &self,
        side: Side,
        username: &str,
        stock: &str,
        amount: Decimal,
        price: Decimal,
    ) -> Result<StagedTrade, TradeError> {
        self.modify(username, |acc, now| {
            acc.stage(side, stock, amount, price, now)?;
            Ok((acc.staged(side).clone(), AccountUpdate::new(now).staged(side, acc)))
        })
        .await
    }

    /// COMMIT_BUY / COMMIT_SELL. Returns the executed trade and the account
    /// after it.
    pub async fn commit(&self, side: Side, username: &str, tx: i64) -> Result<(StagedTrade, UserAccount), TradeError> {
        let window = self.commit_window;
        self.modify(username, |acc, now| {
            let trade = acc.commit(side, now, window)?;
            let kind = match side {
                Side::Buy => "buy",
                Side::Sell => "sell",
            };
            let update = AccountUpdate::new(now)
                .balance(acc)
                .stocks(acc)
                .staged(side, acc)
                .transaction(tx_record(tx, now, kind, trade.amount, &trade.stock));
            Ok(((trade, acc.clone()), update))
        })
        .await
    }

    /// CANCEL_BUY / CANCEL_SELL. Idempotent.
    pub async fn cancel_staged(&self, side: Side, username: &str) -> Result<(), TradeError> {
        self.modify(username, |acc, now| {
            acc.cancel_staged(side);
            Ok(((), AccountUpdate::new(now).staged(side, acc)))
        })
        .await
    }

    /// CANCEL_SET_BUY / CANCEL_SET_SELL: refunds the reservation and pulls
    /// the user out of the trigger book. Returns the refunded amount.
    pub async fn cancel_reserved(&self, side: Side, username: &str, stock: &str) -> Result<Decimal, TradeError> {
        let _guard = self.lock_user(username).await;

        let mut account = self.store.find_account(username).await?;
        let now = now_ms();
        let refunded = account.cancel_reserved(side, stock)?;
        let update = AccountUpdate::new(now)
            .amounts(side, &account)
            .triggers(side, &account)
            .balance(&account)
            .stocks(&account);
        self.store.update_account(username, &update).await?;

        self.registry.remove_trigger(side, stock, username);
        Ok(refunded)
    }

    /// SET_BUY_TRIGGER / SET_SELL_TRIGGER: records the price on the account
    /// and registers it with the book. Returns the replaced price, if any.
    pub async fn set_trigger(&self, side: Side, username: &str, stock: &str, price: Decimal) -> Result<Option<Decimal>, TradeError> {
        let _guard = self.lock_user(username).await;

        let mut account = self.store.find_account(username).await?;
        let now = now_ms();
        let previous = account.set_trigger(side, stock, price)?;
        self.store
            .update_account(username, &AccountUpdate::new(now).triggers(side, &account))
            .await?;

        self.registry.set_trigger(side, stock, username, price);
        Ok(previous)
    }

    /// Executes a trigger the poller pulled out of the book. `Ok(None)` when
    /// the reservation was cancelled or re-priced in the meantime.
    ///
    /// If the store fails, the user goes back into the book at `price` so a
    /// later pass retries. Any other error leaves the reservation on the
    /// account for the user to cancel.
    pub async fn fulfill_trigger(
        &self,
        side: Side,
        username: &str,
        stock: &str,
        price: Decimal,
        tx: i64,
    ) -> Result<Option<Decimal>, TradeError> {
        let _guard = self.lock_user(username).await;

        let result = self
            .modify_locked(username, |acc, now| {
                let reserved = acc.amounts(side).get(stock).copied().unwrap_or_default();
                let Some(credited) = acc.fulfill_trigger(side, stock, price)? else {
                    return Ok((None, AccountUpdate::new(now)));
                };
                let kind = match side {
                    Side::Buy => "trigger_buy",
                    Side::Sell => "trigger_sell",
                };
                let update = AccountUpdate::new(now)
                    .amounts(side, acc)
                    .triggers(side, acc)
                    .balance(acc)
                    .stocks(acc)
                    .transaction(tx_record(tx, now, kind, reserved, stock));
                Ok((Some(credited), update))
            })
            .await;

        if let Err(TradeError::StoreUnavailable(_)) = &result {
            self.registry.restore_trigger(side, stock, username, price);
        }
        result
    }
}

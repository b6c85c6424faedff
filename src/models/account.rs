use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TradeError;

use super::Side;

/// The most recent uncommitted BUY or SELL. An all-default value means
/// nothing is staged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StagedTrade {
    pub amount: Decimal,
    pub stock: String,
    // quote the order was staged against
    pub price: Decimal,
    // millis
    pub timestamp: i64,
}

impl StagedTrade {
    pub fn is_empty(&self) -> bool {
        self.amount.is_zero() || self.stock.is_empty()
    }

    /// Expiry is only ever checked here, at commit time.
    pub fn is_fresh(&self, now_ms: i64, window: Duration) -> bool {
        let age = now_ms - self.timestamp;
        !self.is_empty() && age >= 0 && (age as u128) < window.as_millis()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: i64,
    pub timestamp: i64,
    pub transaction_type: String,
    pub amount: Decimal,
    #[serde(default)]
    pub stock: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAccount {
    pub username: String,
    pub balance: Decimal,
    pub created: i64,
    pub updated: i64,
    pub stocks: HashMap<String, Decimal>,
    // BUY side: dollars set aside; SELL side: shares set aside
    pub buy_amounts: HashMap<String, Decimal>,
    pub sell_amounts: HashMap<String, Decimal>,
    pub buy_triggers: HashMap<String, Decimal>,
    pub sell_triggers: HashMap<String, Decimal>,
    pub recent_buy: StagedTrade,
    pub recent_sell: StagedTrade,
    pub transactions: Vec<Transaction>,
}

fn in_range(value: Option<Decimal>, what: &str) -> Result<Decimal, TradeError> {
    value.ok_or_else(|| TradeError::AmountOutOfRange(format!("{what} would overflow")))
}

impl UserAccount {
    pub fn new(username: &str, now_ms: i64) -> Self {
        UserAccount {
            username: username.to_string(),
            created: now_ms,
            updated: now_ms,
            ..Default::default()
        }
    }

    pub fn shares(&self, stock: &str) -> Decimal {
        self.stocks.get(stock).copied().unwrap_or_default()
    }

    pub fn amounts(&self, side: Side) -> &HashMap<String, Decimal> {
        match side {
            Side::Buy => &self.buy_amounts,
            Side::Sell => &self.sell_amounts,
        }
    }

    fn amounts_mut(&mut self, side: Side) -> &mut HashMap<String, Decimal> {
        match side {
            Side::Buy => &mut self.buy_amounts,
            Side::Sell => &mut self.sell_amounts,
        }
    }

    pub fn triggers(&self, side: Side) -> &HashMap<String, Decimal> {
        match side {
            Side::Buy => &self.buy_triggers,
            Side::Sell => &self.sell_triggers,
        }
    }

    fn triggers_mut(&mut self, side: Side) -> &mut HashMap<String, Decimal> {
        match side {
            Side::Buy => &mut self.buy_triggers,
            Side::Sell => &mut self.sell_triggers,
        }
    }

    pub fn staged(&self, side: Side) -> &StagedTrade {
        match side {
            Side::Buy => &self.recent_buy,
            Side::Sell => &self.recent_sell,
        }
    }

    fn staged_mut(&mut self, side: Side) -> &mut StagedTrade {
        match side {
            Side::Buy => &mut self.recent_buy,
            Side::Sell => &mut self.recent_sell,
        }
    }

    fn set_shares(&mut self, stock: &str, held: Decimal) {
        if held.is_zero() {
            self.stocks.remove(stock);
        } else {
            self.stocks.insert(stock.to_string(), held);
        }
    }

    fn add_shares(&mut self, stock: &str, delta: Decimal) -> Result<(), TradeError> {
        let held = in_range(self.shares(stock).checked_add(delta), "holding")?;
        self.set_shares(stock, held);
        Ok(())
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<(), TradeError> {
        self.balance = in_range(self.balance.checked_add(amount), "balance")?;
        Ok(())
    }

    /// Sets aside `amount` (dollars for BUY, shares for SELL) for a future
    /// trigger on `stock`. A previous reservation for the same stock is
    /// refunded first. Leaves the account untouched on error.
    pub fn reserve(&mut self, side: Side, stock: &str, amount: Decimal) -> Result<(), TradeError> {
        let prior = self.amounts(side).get(stock).copied().unwrap_or_default();

        match side {
            Side::Buy => {
                let available = in_range(self.balance.checked_add(prior), "balance")?;
                if available < amount {
                    return Err(TradeError::InsufficientFunds {
                        balance: available,
                        required: amount,
                    });
                }
                self.balance = available - amount;
            }
            Side::Sell => {
                let available = in_range(self.shares(stock).checked_add(prior), "holding")?;
                if available < amount {
                    return Err(TradeError::InsufficientStock {
                        stock: stock.to_string(),
                        owned: available,
                        required: amount,
                    });
                }
                self.set_shares(stock, available - amount);
            }
        }

        self.amounts_mut(side).insert(stock.to_string(), amount);
        Ok(())
    }

    fn ensure_covers(&self, side: Side, stock: &str, amount: Decimal) -> Result<(), TradeError> {
        match side {
            Side::Buy if self.balance < amount => Err(TradeError::InsufficientFunds {
                balance: self.balance,
                required: amount,
            }),
            Side::Sell if self.shares(stock) < amount => Err(TradeError::InsufficientStock {
                stock: stock.to_string(),
                owned: self.shares(stock),
                required: amount,
            }),
            _ => Ok(()),
        }
    }

    /// Records a BUY (dollars) or SELL (shares) to be committed later.
    /// Nothing moves yet.
    pub fn stage(
        &mut self,
        side: Side,
        stock: &str,
        amount: Decimal,
        price: Decimal,
        now_ms: i64,
    ) -> Result<(), TradeError> {
        self.ensure_covers(side, stock, amount)?;

        *self.staged_mut(side) = StagedTrade {
            amount,
            stock: stock.to_string(),
            price,
            timestamp: now_ms,
        };
        Ok(())
    }

    /// Executes the staged trade if it is younger than `window`. Returns the
    /// committed trade. A stale trade is left in place.
    pub fn commit(&mut self, side: Side, now_ms: i64, window: Duration) -> Result<StagedTrade, TradeError> {
        let staged = self.staged(side).clone();
        if !staged.is_fresh(now_ms, window) || staged.price <= Decimal::ZERO {
            return Err(TradeError::StaleOrMissingOrder(side));
        }

        self.ensure_covers(side, &staged.stock, staged.amount)?;

        match side {
            Side::Buy => {
                let bought = in_range(staged.amount.checked_div(staged.price), "share count")?;
                self.add_shares(&staged.stock, bought)?;
                self.balance -= staged.amount;
            }
            Side::Sell => {
                let proceeds = in_range(staged.amount.checked_mul(staged.price), "proceeds")?;
                let balance = in_range(self.balance.checked_add(proceeds), "balance")?;
                self.add_shares(&staged.stock, -staged.amount)?;
                self.balance = balance;
            }
        }

        *self.staged_mut(side) = StagedTrade::default();
        Ok(staged)
    }

    pub fn cancel_staged(&mut self, side: Side) {
        *self.staged_mut(side) = StagedTrade::default();
    }

    /// Hands a reservation back and drops any trigger on it. Returns the
    /// refunded amount.
    pub fn cancel_reserved(&mut self, side: Side, stock: &str) -> Result<Decimal, TradeError> {
        let Some(amount) = self.amounts(side).get(stock).copied() else {
            return Err(TradeError::NothingReserved {
                side,
                stock: stock.to_string(),
            });
        };

        match side {
            Side::Buy => self.deposit(amount)?,
            Side::Sell => self.add_shares(stock, amount)?,
        }
        self.amounts_mut(side).remove(stock);
        self.triggers_mut(side).remove(stock);
        Ok(amount)
    }

    /// Records the trigger price for a reserved stock. Returns the price it
    /// replaces, if any.
    pub fn set_trigger(&mut self, side: Side, stock: &str, price: Decimal) -> Result<Option<Decimal>, TradeError> {
        let reserved = self.amounts(side).get(stock).copied().unwrap_or_default();
        if reserved <= Decimal::ZERO {
            return Err(TradeError::TriggerWithoutReservation {
                side,
                stock: stock.to_string(),
            });
        }

        Ok(self.triggers_mut(side).insert(stock.to_string(), price))
    }

    /// Converts the reservation on `stock` into a live position at `price`.
    /// Returns `None` without touching anything when the reservation was
    /// cancelled or re-priced since the trigger was queued.
    pub fn fulfill_trigger(&mut self, side: Side, stock: &str, price: Decimal) -> Result<Option<Decimal>, TradeError> {
        if price <= Decimal::ZERO || self.triggers(side).get(stock) != Some(&price) {
            return Ok(None);
        }
        let Some(reserved) = self.amounts(side).get(stock).copied() else {
            return Ok(None);
        };

        let credited = match side {
            Side::Buy => {
                let shares = in_range(reserved.checked_div(price), "share count")?;
                self.add_shares(stock, shares)?;
                shares
            }
            Side::Sell => {
                let proceeds = in_range(reserved.checked_mul(price), "proceeds")?;
                self.deposit(proceeds)?;
                proceeds
            }
        };
        self.amounts_mut(side).remove(stock);
        self.triggers_mut(side).remove(stock);
        Ok(Some(credited))
    }
}

/// Partial update of one account. Only the populated fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub balance: Option<Decimal>,
    pub stocks: Option<HashMap<String, Decimal>>,
    pub buy_amounts: Option<HashMap<String, Decimal>>,
    pub sell_amounts: Option<HashMap<String, Decimal>>,
    pub buy_triggers: Option<HashMap<String, Decimal>>,
    pub sell_triggers: Option<HashMap<String, Decimal>>,
    pub recent_buy: Option<StagedTrade>,
    pub recent_sell: Option<StagedTrade>,
    pub push_transaction: Option<Transaction>,
    pub updated: i64,
}

impl AccountUpdate {
    pub fn new(updated: i64) -> Self {
        AccountUpdate {
            updated,
            ..Default::default()
        }
    }

    pub fn balance(mut self, account: &UserAccount) -> Self {
        self.balance = Some(account.balance);
        self
    }

    pub fn stocks(mut self, account: &UserAccount) -> Self {
        self.stocks = Some(account.stocks.clone());
        self
    }

    pub fn amounts(mut self, side: Side, account: &UserAccount) -> Self {
        let map = Some(account.amounts(side).clone());
        match side {
            Side::Buy => self.buy_amounts = map,
            Side::Sell => self.sell_amounts = map,
        }
        self
    }

    pub fn triggers(mut self, side: Side, account: &UserAccount) -> Self {
        let map = Some(account.triggers(side).clone());
        match side {
            Side::Buy => self.buy_triggers = map,
            Side::Sell => self.sell_triggers = map,
        }
        self
    }

    pub fn staged(mut self, side: Side, account: &UserAccount) -> Self {
        let trade = Some(account.staged(side).clone());
        match side {
            Side::Buy => self.recent_buy = trade,
            Side::Sell => self.recent_sell = trade,
        }
        self
    }

    pub fn transaction(mut self, tx: Transaction) -> Self {
        self.push_transaction = Some(tx);
        self
    }

    pub fn apply(&self, account: &mut UserAccount) {
        if let Some(v) = self.balance {
            account.balance = v;
        }
        if let Some(v) = &self.stocks {
            account.stocks = v.clone();
        }
        if let Some(v) = &self.buy_amounts {
            account.buy_amounts = v.clone();
        }
        if let Some(v) = &self.sell_amounts {
            account.sell_amounts = v.clone();
        }
        if let Some(v) = &self.buy_triggers {
            account.buy_triggers = v.clone();
        }
        if let Some(v) = &self.sell_triggers {
            account.sell_triggers = v.clone();
        }
        if let Some(v) = &self.recent_buy {
            account.recent_buy = v.clone();
        }
        if let Some(v) = &self.recent_sell {
            account.recent_sell = v.clone();
        }
        if let Some(tx) = &self.push_transaction {
            account.transactions.push(tx.clone());
        }
        account.updated = self.updated;
    }
}

//! Waiting conditional orders, one book per side.
//!
//! ```text
//! BUY book:  { AAPL: { 105 => {u3}, 100 => {u1, u2}, 95 => {u4} }, ... }
//! SELL book: { AAPL: { 95 => {u7}, 110 => {u5} }, ... }
//! ```
//!
//! Each stock maps to a price ladder ordered from the level a moving quote
//! reaches first (descending for BUY, ascending for SELL), so fulfillment can
//! walk from the front and stop at the first level that does not cross.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;

use crate::models::Side;

/// Ladder key: a price whose ordering comes from its side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Level {
    side: Side,
    price: Decimal,
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.side.level_order(self.price, other.price)
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// All price buckets for one stock on one side.
#[derive(Debug)]
pub struct PriceLadder {
    side: Side,
    levels: BTreeMap<Level, HashSet<String>>,
    // username -> the one price they wait at
    waiting: HashMap<String, Decimal>,
}

impl PriceLadder {
    fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
            waiting: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Prices in walk order.
    pub fn prices(&self) -> Vec<Decimal> {
        self.levels.keys().map(|l| l.price).collect()
    }

    pub fn users_at(&self, price: Decimal) -> HashSet<String> {
        let key = Level { side: self.side, price };
        self.levels.get(&key).cloned().unwrap_or_default()
    }

    pub fn price_of(&self, username: &str) -> Option<Decimal> {
        self.waiting.get(username).copied()
    }

    /// Puts `username` at `price`, leaving any previous bucket. Returns the
    /// previous price.
    fn place(&mut self, username: &str, price: Decimal) -> Option<Decimal> {
        let previous = self.remove(username);
        self.levels
            .entry(Level { side: self.side, price })
            .or_default()
            .insert(username.to_string());
        self.waiting.insert(username.to_string(), price);
        previous
    }

    fn remove(&mut self, username: &str) -> Option<Decimal> {
        let price = self.waiting.remove(username)?;
        let key = Level { side: self.side, price };
        if let Some(users) = self.levels.get_mut(&key) {
            users.remove(username);
            if users.is_empty() {
                self.levels.remove(&key);
            }
        }
        Some(price)
    }

    /// Removes and returns every bucket the quote crosses, front first.
    /// Stops at the first bucket that does not cross.
    fn take_crossed(&mut self, quote: Decimal) -> Vec<(Decimal, Vec<String>)> {
        let mut crossed = Vec::new();
        while let Some(entry) = self.levels.first_entry() {
            let price = entry.key().price;
            if !self.side.is_crossed(price, quote) {
                break;
            }
            let users = entry.remove();
            let mut names: Vec<String> = users.into_iter().collect();
            names.sort();
            for name in &names {
                self.waiting.remove(name);
            }
            crossed.push((price, names));
        }
        crossed
    }
}

/// The book for one side: stock -> ladder, plus the wake signal for the
/// poller that serves it.
#[derive(Debug)]
pub struct SideBook {
    side: Side,
    ladders: Mutex<HashMap<String, PriceLadder>>,
    changed: Notify,
}

impl SideBook {
    fn new(side: Side) -> Self {
        Self {
            side,
            ladders: Mutex::new(HashMap::new()),
            changed: Notify::new(),
        }
    }

    pub fn stocks(&self) -> Vec<String> {
        let mut stocks: Vec<String> = self.ladders.lock().keys().cloned().collect();
        stocks.sort();
        stocks
    }

    pub fn is_empty(&self) -> bool {
        self.ladders.lock().is_empty()
    }

    /// Resolves once the book was changed since the last call. A change made
    /// while nobody waits is remembered.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Runs `f` over the ladder for `stock`, if there is one.
    pub fn with_ladder<R>(&self, stock: &str, f: impl FnOnce(&PriceLadder) -> R) -> Option<R> {
        self.ladders.lock().get(stock).map(f)
    }

    fn set(&self, stock: &str, username: &str, price: Decimal) -> Option<Decimal> {
        let previous = {
            let mut ladders = self.ladders.lock();
            ladders
                .entry(stock.to_string())
                .or_insert_with(|| PriceLadder::new(self.side))
                .place(username, price)
        };
        self.changed.notify_one();
        previous
    }

    // no wake-up: the next timed pass picks it up
    fn restore(&self, stock: &str, username: &str, price: Decimal) -> bool {
        let mut ladders = self.ladders.lock();
        let ladder = ladders
            .entry(stock.to_string())
            .or_insert_with(|| PriceLadder::new(self.side));
        if ladder.price_of(username).is_some() {
            return false;
        }
        ladder.place(username, price);
        true
    }

    fn remove(&self, stock: &str, username: &str) -> Option<Decimal> {
        let mut ladders = self.ladders.lock();
        let ladder = ladders.get_mut(stock)?;
        let removed = ladder.remove(username);
        if ladder.is_empty() {
            ladders.remove(stock);
        }
        removed
    }

    fn take_crossed(&self, stock: &str, quote: Decimal) -> Vec<(Decimal, Vec<String>)> {
        let mut ladders = self.ladders.lock();
        let Some(ladder) = ladders.get_mut(stock) else {
            return Vec::new();
        };
        let crossed = ladder.take_crossed(quote);
        if ladder.is_empty() {
            ladders.remove(stock);
        }
        crossed
    }
}

/// Both trigger books. Owned by the service and shared with the command
/// handler and the two pollers.
#[derive(Debug)]
pub struct TriggerRegistry {
    buy: SideBook,
    sell: SideBook,
}

impl Default for TriggerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self {
            buy: SideBook::new(Side::Buy),
            sell: SideBook::new(Side::Sell),
        }
    }

    pub fn book(&self, side: Side) -> &SideBook {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }

    /// Registers `username` at `price` for `stock`, moving them out of any
    /// earlier bucket, and wakes that side's poller.
    pub fn set_trigger(&self, side: Side, stock: &str, username: &str, price: Decimal) -> Option<Decimal> {
        self.book(side).set(stock, username, price)
    }

    /// Puts back a trigger whose fulfillment could not be written, unless
    /// the user already waits at some price for this stock. Returns whether
    /// it was placed.
    pub fn restore_trigger(&self, side: Side, stock: &str, username: &str, price: Decimal) -> bool {
        self.book(side).restore(stock, username, price)
    }

    pub fn remove_trigger(&self, side: Side, stock: &str, username: &str) -> Option<Decimal> {
        self.book(side).remove(stock, username)
    }

    /// Pulls every bucket of `stock` crossed by `quote` out of the book.
    pub fn take_crossed(&self, side: Side, stock: &str, quote: Decimal) -> Vec<(Decimal, Vec<String>)> {
        self.book(side).take_crossed(stock, quote)
    }

    pub fn price_of(&self, side: Side, stock: &str, username: &str) -> Option<Decimal> {
        self.book(side)
            .with_ladder(stock, |l| l.price_of(username))
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn ladders_are_ordered_per_side() {
        let reg = TriggerRegistry::new();
        for (user, price) in [("a", 95), ("b", 105), ("c", 100)] {
            reg.set_trigger(Side::Buy, "AAPL", user, d(price));
            reg.set_trigger(Side::Sell, "AAPL", user, d(price));
        }

        let buy = reg.book(Side::Buy).with_ladder("AAPL", |l| l.prices()).unwrap();
        let sell = reg.book(Side::Sell).with_ladder("AAPL", |l| l.prices()).unwrap();
        assert_eq!(buy, vec![d(105), d(100), d(95)]);
        assert_eq!(sell, vec![d(95), d(100), d(105)]);
    }

    #[test]
    fn resetting_a_price_moves_the_user() {
        let reg = TriggerRegistry::new();
        reg.set_trigger(Side::Buy, "AAPL", "u1", d(50));
        reg.set_trigger(Side::Buy, "AAPL", "u2", d(50));

        let previous = reg.set_trigger(Side::Buy, "AAPL", "u1", d(40));
        assert_eq!(previous, Some(d(50)));

        let book = reg.book(Side::Buy);
        let at_50 = book.with_ladder("AAPL", |l| l.users_at(d(50))).unwrap();
        let at_40 = book.with_ladder("AAPL", |l| l.users_at(d(40))).unwrap();
        assert!(!at_50.contains("u1"));
        assert!(at_50.contains("u2"));
        assert!(at_40.contains("u1"));
        assert_eq!(reg.price_of(Side::Buy, "AAPL", "u1"), Some(d(40)));
    }

    #[test]
    fn emptied_bucket_and_stock_are_dropped() {
        let reg = TriggerRegistry::new();
        reg.set_trigger(Side::Sell, "AAPL", "u1", d(10));
        reg.set_trigger(Side::Sell, "AAPL", "u1", d(12));
        let prices = reg.book(Side::Sell).with_ladder("AAPL", |l| l.prices()).unwrap();
        assert_eq!(prices, vec![d(12)]);

        assert_eq!(reg.remove_trigger(Side::Sell, "AAPL", "u1"), Some(d(12)));
        assert!(reg.book(Side::Sell).is_empty());
        assert_eq!(reg.remove_trigger(Side::Sell, "AAPL", "u1"), None);
    }

    #[test]
    fn restore_does_not_override_a_newer_price() {
        let reg = TriggerRegistry::new();
        reg.set_trigger(Side::Buy, "AAPL", "u1", d(50));
        reg.take_crossed(Side::Buy, "AAPL", d(40));
        assert!(reg.book(Side::Buy).is_empty());

        assert!(reg.restore_trigger(Side::Buy, "AAPL", "u1", d(50)));
        assert_eq!(reg.price_of(Side::Buy, "AAPL", "u1"), Some(d(50)));

        reg.set_trigger(Side::Buy, "AAPL", "u1", d(45));
        assert!(!reg.restore_trigger(Side::Buy, "AAPL", "u1", d(50)));
        assert_eq!(reg.price_of(Side::Buy, "AAPL", "u1"), Some(d(45)));
    }

    #[test]
    fn buy_walk_stops_at_first_uncrossed_level() {
        let reg = TriggerRegistry::new();
        reg.set_trigger(Side::Buy, "AAPL", "low", d(95));
        reg.set_trigger(Side::Buy, "AAPL", "mid", d(100));
        reg.set_trigger(Side::Buy, "AAPL", "high", d(105));

        let crossed = reg.take_crossed(Side::Buy, "AAPL", d(100));
        let prices: Vec<Decimal> = crossed.iter().map(|(p, _)| *p).collect();
        assert_eq!(prices, vec![d(105), d(100)]);

        let left = reg.book(Side::Buy).with_ladder("AAPL", |l| l.prices()).unwrap();
        assert_eq!(left, vec![d(95)]);
        assert_eq!(reg.price_of(Side::Buy, "AAPL", "high"), None);
        assert_eq!(reg.price_of(Side::Buy, "AAPL", "low"), Some(d(95)));
    }

    #[test]
    fn sell_walk_takes_levels_at_or_below_quote() {
        let reg = TriggerRegistry::new();
        reg.set_trigger(Side::Sell, "AAPL", "a", d(95));
        reg.set_trigger(Side::Sell, "AAPL", "b", d(100));
        reg.set_trigger(Side::Sell, "AAPL", "c", d(105));

        let crossed = reg.take_crossed(Side::Sell, "AAPL", d(101));
        let prices: Vec<Decimal> = crossed.iter().map(|(p, _)| *p).collect();
        assert_eq!(prices, vec![d(95), d(100)]);

        let crossed = reg.take_crossed(Side::Sell, "AAPL", d(200));
        assert_eq!(crossed, vec![(d(105), vec!["c".to_string()])]);
        assert!(reg.book(Side::Sell).is_empty());
    }
}

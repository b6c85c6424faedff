//! Property tests: random command sequences against one account never drive
//! cash or holdings negative, and the trigger book always agrees with the
//! account it was built from.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;

use daytrader::{
    models::Side,
    services::{InMemoryLedgerStore, Ledger, TriggerRegistry},
};

const USER: &str = "prop";
const STOCKS: [&str; 2] = ["ABC", "XYZ"];

#[derive(Debug, Clone)]
enum Op {
    Add(i64),
    Stage(Side, usize, i64, i64),
    Commit(Side),
    Cancel(Side),
    Reserve(Side, usize, i64),
    Trigger(Side, usize, i64),
    CancelReserved(Side, usize),
    Quote(Side, usize, i64),
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let stock = 0usize..STOCKS.len();
    prop_oneof![
        (1i64..500).prop_map(Op::Add),
        (side_strategy(), stock.clone(), 1i64..300, 1i64..50).prop_map(|(s, i, a, p)| Op::Stage(s, i, a, p)),
        side_strategy().prop_map(Op::Commit),
        side_strategy().prop_map(Op::Cancel),
        (side_strategy(), stock.clone(), 1i64..300).prop_map(|(s, i, a)| Op::Reserve(s, i, a)),
        (side_strategy(), stock.clone(), 1i64..50).prop_map(|(s, i, p)| Op::Trigger(s, i, p)),
        (side_strategy(), stock.clone()).prop_map(|(s, i)| Op::CancelReserved(s, i)),
        (side_strategy(), stock, 1i64..50).prop_map(|(s, i, q)| Op::Quote(s, i, q)),
    ]
}

async fn apply(ledger: &Ledger, op: &Op, tx: i64) {
    let d = |v: i64| Decimal::from(v);
    // rejected operations are part of the sequence, not failures
    let _ = match *op {
        Op::Add(a) => ledger.deposit(USER, d(a), tx).await.map(|_| ()),
        Op::Stage(side, i, a, p) => ledger.stage(side, USER, STOCKS[i], d(a), d(p)).await.map(|_| ()),
        Op::Commit(side) => ledger.commit(side, USER, tx).await.map(|_| ()),
        Op::Cancel(side) => ledger.cancel_staged(side, USER).await,
        Op::Reserve(side, i, a) => ledger.reserve(side, USER, STOCKS[i], d(a)).await.map(|_| ()),
        Op::Trigger(side, i, p) => ledger.set_trigger(side, USER, STOCKS[i], d(p)).await.map(|_| ()),
        Op::CancelReserved(side, i) => ledger.cancel_reserved(side, USER, STOCKS[i]).await.map(|_| ()),
        Op::Quote(side, i, q) => {
            let crossed = ledger.registry().take_crossed(side, STOCKS[i], d(q));
            for (price, users) in crossed {
                for user in users {
                    let _ = ledger.fulfill_trigger(side, &user, STOCKS[i], price, tx).await;
                }
            }
            Ok(())
        }
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn balances_and_holdings_stay_non_negative(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let store = Arc::new(InMemoryLedgerStore::new());
        let ledger = Ledger::new(store.clone(), Arc::new(TriggerRegistry::new()), Duration::from_secs(60));

        rt.block_on(async {
            ledger.deposit(USER, Decimal::from(100), 0).await.unwrap();
            for (n, op) in ops.iter().enumerate() {
                apply(&ledger, op, n as i64 + 1).await;
            }
        });

        let acc = store.get(USER).unwrap();
        prop_assert!(acc.balance >= Decimal::ZERO, "balance {}", acc.balance);
        for (stock, held) in &acc.stocks {
            prop_assert!(*held > Decimal::ZERO, "{stock} held {held}");
        }
        for side in Side::ALL {
            for (stock, reserved) in acc.amounts(side) {
                prop_assert!(*reserved > Decimal::ZERO, "{side} {stock} reserved {reserved}");
            }
            for stock in STOCKS {
                let booked = ledger.registry().price_of(side, stock, USER);
                let recorded = acc.triggers(side).get(stock).copied();
                prop_assert_eq!(booked, recorded, "{} {} book/account mismatch", side, stock);
                if recorded.is_some() {
                    prop_assert!(acc.amounts(side).contains_key(stock));
                }
            }
        }
    }
}

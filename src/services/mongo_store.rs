use async_trait::async_trait;
use futures_util::StreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::FindOptions;
use mongodb::{Collection, Database};

use crate::errors::StoreError;
use crate::models::{AccountUpdate, AuditEvent, UserAccount};

use super::audit::EventStore;
use super::store::LedgerStore;

pub const ACCOUNTS: &str = "accounts";
pub const EVENTS: &str = "events";

#[derive(Clone)]
pub struct MongoLedgerStore {
    accounts: Collection<UserAccount>,
}

impl MongoLedgerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            accounts: db.collection::<UserAccount>(ACCOUNTS),
        }
    }
}

/// Builds the `$set` / `$push` document for a partial account update.
pub fn update_document(update: &AccountUpdate) -> Result<Document, StoreError> {
    let mut set = doc! { "updated": update.updated };

    if let Some(v) = &update.balance {
        set.insert("balance", to_bson(v)?);
    }
    if let Some(v) = &update.stocks {
        set.insert("stocks", to_bson(v)?);
    }
    if let Some(v) = &update.buy_amounts {
        set.insert("buyAmounts", to_bson(v)?);
    }
    if let Some(v) = &update.sell_amounts {
        set.insert("sellAmounts", to_bson(v)?);
    }
    if let Some(v) = &update.buy_triggers {
        set.insert("buyTriggers", to_bson(v)?);
    }
    if let Some(v) = &update.sell_triggers {
        set.insert("sellTriggers", to_bson(v)?);
    }
    if let Some(v) = &update.recent_buy {
        set.insert("recentBuy", to_bson(v)?);
    }
    if let Some(v) = &update.recent_sell {
        set.insert("recentSell", to_bson(v)?);
    }

    let mut out = doc! { "$set": set };
    if let Some(tx) = &update.push_transaction {
        out.insert("$push", doc! { "transactions": to_bson(tx)? });
    }
    Ok(out)
}

#[async_trait]
impl LedgerStore for MongoLedgerStore {
    async fn find_account(&self, username: &str) -> Result<UserAccount, StoreError> {
        self.accounts
            .find_one(doc! { "username": username }, None)
            .await?
            .ok_or_else(|| StoreError::NotFound(username.to_string()))
    }

    async fn create_account(&self, account: &UserAccount) -> Result<UserAccount, StoreError> {
        if let Err(e) = self.accounts.insert_one(account, None).await {
            let msg = e.to_string();
            if msg.contains("E11000") {
                return Err(StoreError::AlreadyExists(account.username.clone()));
            }
            return Err(StoreError::Database(msg));
        }
        Ok(account.clone())
    }

    async fn update_account(&self, username: &str, update: &AccountUpdate) -> Result<(), StoreError> {
        let res = self
            .accounts
            .update_one(doc! { "username": username }, update_document(update)?, None)
            .await?;

        if res.matched_count == 0 {
            return Err(StoreError::NotFound(username.to_string()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct MongoEventStore {
    events: Collection<AuditEvent>,
}

impl MongoEventStore {
    pub fn new(db: &Database) -> Self {
        Self {
            events: db.collection::<AuditEvent>(EVENTS),
        }
    }
}

#[async_trait]
impl EventStore for MongoEventStore {
    async fn insert_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.events.insert_one(event, None).await?;
        Ok(())
    }

    async fn list_events(&self, username: Option<&str>) -> Result<Vec<AuditEvent>, StoreError> {
        let filter = match username {
            Some(u) => doc! { "data.username": u },
            None => doc! {},
        };
        let find_opts = FindOptions::builder()
            .sort(doc! { "data.timestamp": 1 })
            .build();

        let mut cursor = self.events.find(filter, find_opts).await?;

        let mut items = Vec::new();
        while let Some(res) = cursor.next().await {
            items.push(res?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::models::Transaction;

    #[test]
    fn update_document_only_sets_populated_fields() {
        let update = AccountUpdate {
            balance: Some(Decimal::new(1050, 1)),
            buy_amounts: Some(HashMap::from([("AAPL".to_string(), Decimal::from(200))])),
            updated: 42,
            ..Default::default()
        };

        let doc = update_document(&update).unwrap();
        let set = doc.get_document("$set").unwrap();
        assert_eq!(set.get_i64("updated").unwrap(), 42);
        assert_eq!(set.get_str("balance").unwrap(), "105.0");
        assert!(set.contains_key("buyAmounts"));
        assert!(!set.contains_key("stocks"));
        assert!(!doc.contains_key("$push"));
    }

    #[test]
    fn update_document_pushes_transaction() {
        let update = AccountUpdate::new(7).transaction(Transaction {
            id: 3,
            timestamp: 7,
            transaction_type: "add".to_string(),
            amount: Decimal::ONE,
            stock: String::new(),
        });
        let doc = update_document(&update).unwrap();
        assert!(doc.get_document("$push").unwrap().contains_key("transactions"));
    }
}

use mongodb::{
    bson::doc,
    options::IndexOptions,
    Database, IndexModel,
};

use crate::errors::StoreError;

use super::mongo_store::{ACCOUNTS, EVENTS};

pub async fn ensure_indexes(db: &Database) -> Result<(), StoreError> {
    // accounts: unique username
    {
        let col = db.collection::<mongodb::bson::Document>(ACCOUNTS);
        let model = IndexModel::builder()
            .keys(doc! { "username": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        col.create_index(model, None).await?;
    }

    // events: DUMPLOG filters by user and replays in time order
    {
        let col = db.collection::<mongodb::bson::Document>(EVENTS);
        let model = IndexModel::builder()
            .keys(doc! { "data.username": 1, "data.timestamp": 1 })
            .build();

        if let Err(e) = col.create_index(model, None).await {
            tracing::warn!("events index not created: {e}");
        }
    }

    Ok(())
}

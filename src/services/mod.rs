pub mod audit;
pub mod command_handler;
pub mod db_init;
pub mod ledger;
pub mod mongo_store;
pub mod quote_feed;
pub mod store;
pub mod trigger_poller;
pub mod trigger_registry;

pub use audit::{AuditLog, EventStore, InMemoryEventStore};
pub use command_handler::{CommandHandler, TransactionCounter};
pub use ledger::Ledger;
pub use quote_feed::{FixedQuoteSource, QuoteSource, TcpQuoteClient};
pub use store::{InMemoryLedgerStore, LedgerStore};
pub use trigger_poller::TriggerPoller;
pub use trigger_registry::TriggerRegistry;

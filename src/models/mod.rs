pub mod account;
pub mod command;
pub mod event;
pub mod quote;
pub mod side;

pub use account::{AccountUpdate, StagedTrade, Transaction, UserAccount};
pub use command::{Command, CommandKind, CommandRequest, CommandResponse};
pub use event::AuditEvent;
pub use quote::Quote;
pub use side::Side;

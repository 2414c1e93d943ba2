pub mod amount;
pub mod config;
pub mod csv;
pub mod engine;
pub mod history;
pub mod model;
pub mod page;
pub mod store;

pub use amount::Amount;
pub use config::LedgerConfig;
pub use engine::{AccountFilter, Applied, LedgerEngine, LedgerError, Operation};
pub use history::{HistoryFilter, TypeFilter};
pub use model::{
    Account, AccountId, Currency, IdempotencyKey, TransactionRecord, TransactionType, Transfer,
    TxId,
};
pub use page::Page;

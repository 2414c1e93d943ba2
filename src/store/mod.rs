//! In-process transactional store.
//!
//! Holds account rows and the transaction log. Each row carries its own
//! lock; a [`UnitOfWork`] takes row locks in ascending id order, stages
//! balance changes and records, and publishes them all at once on commit.
//! Readers outside a unit of work only ever see committed state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::Amount;
use crate::history::HistoryQuery;
use crate::model::{Account, AccountId, Currency, IdempotencyKey, NewTransaction, TransactionRecord};
use crate::page::Page;

mod ledger;
pub use ledger::Ledger;

mod unit_of_work;
pub use unit_of_work::UnitOfWork;

/// Failures raised by the store itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error("account {account} already has a transaction with idempotency key '{key}'")]
    DuplicateKey { account: AccountId, key: IdempotencyKey },

    #[error("timed out after {waited:?} waiting for the lock on account {account}")]
    LockTimeout { account: AccountId, waited: Duration },

    #[error("balance of account {account} would become negative ({balance} + {delta})")]
    NegativeBalance {
        account: AccountId,
        balance: Amount,
        delta: Amount,
    },
}

/// Balance access to accounts locked by a unit of work.
pub trait AccountStore {
    /// State of a locked account as read after its lock was taken.
    fn account(&self, id: AccountId) -> Result<&Account, StoreError>;

    /// Apply a signed delta to a locked account and return the new balance.
    fn adjust_balance(&mut self, id: AccountId, delta: Amount) -> Result<Amount, StoreError>;
}

/// Idempotency lookup and append access to the transaction log.
pub trait LedgerStore {
    /// At-most-once detection, scoped to a single account.
    fn find_by_idempotency_key(
        &self,
        account: AccountId,
        key: &IdempotencyKey,
    ) -> Option<TransactionRecord>;

    /// Fails with [`StoreError::DuplicateKey`] if the account already holds the key.
    fn append(&mut self, record: NewTransaction) -> Result<TransactionRecord, StoreError>;
}

/// One account row: its lock and its last committed state.
#[derive(Debug)]
struct AccountRow {
    lock: Arc<Mutex<()>>,
    committed: RwLock<Account>,
}

#[derive(Debug)]
pub struct Store {
    rows: RwLock<BTreeMap<AccountId, Arc<AccountRow>>>,
    ledger: RwLock<Ledger>,
    next_account_id: AtomicU64,
    lock_timeout: Duration,
}

impl Store {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            ledger: RwLock::new(Ledger::new()),
            next_account_id: AtomicU64::new(1),
            lock_timeout,
        }
    }

    pub fn create_account(&self, owner_name: &str, currency: Currency) -> Account {
        let id = self.next_account_id.fetch_add(1, Ordering::Relaxed);
        let account = Account::new(id, owner_name, currency);
        let row = AccountRow {
            lock: Arc::new(Mutex::new(())),
            committed: RwLock::new(account.clone()),
        };
        self.rows.write().insert(id, Arc::new(row));
        account
    }

    /// Committed snapshot of one account, soft-deleted ones included.
    pub fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        let row = self.row(id)?;
        let account = row.committed.read().clone();
        Ok(account)
    }

    /// Committed snapshots of every account, ordered by id.
    pub fn accounts(&self) -> Vec<Account> {
        self.rows
            .read()
            .values()
            .map(|row| row.committed.read().clone())
            .collect()
    }

    /// Read access to the committed transaction log.
    pub fn ledger(&self) -> RwLockReadGuard<'_, Ledger> {
        self.ledger.read()
    }

    pub fn query_history(
        &self,
        account: AccountId,
        query: &HistoryQuery,
    ) -> Page<TransactionRecord> {
        self.ledger.read().query_history(account, query)
    }

    /// Lock the given accounts for update and open a unit of work over them.
    ///
    /// Locks are taken in ascending id order, so two units of work touching
    /// overlapping accounts can never wait on each other in a cycle. Each
    /// acquisition is bounded by the store's lock timeout; on failure every
    /// lock already taken is released.
    pub async fn lock_for_update(
        self: &Arc<Self>,
        ids: &BTreeSet<AccountId>,
    ) -> Result<UnitOfWork, StoreError> {
        let mut locked = BTreeMap::new();

        for &id in ids {
            let row = self.row(id)?;
            let guard = tokio::time::timeout(self.lock_timeout, row.lock.clone().lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout {
                    account: id,
                    waited: self.lock_timeout,
                })?;
            debug!(account = id, "row lock acquired");
            locked.insert(id, unit_of_work::LockedRow::new(row, guard));
        }

        Ok(UnitOfWork::new(Arc::clone(self), locked))
    }

    fn row(&self, id: AccountId) -> Result<Arc<AccountRow>, StoreError> {
        self.rows.read().get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    #[cfg(test)]
    pub(crate) fn ledger_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Ledger> {
        self.ledger.write()
    }
}

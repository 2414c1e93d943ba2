use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{AccountRow, AccountStore, LedgerStore, Store, StoreError};
use crate::Amount;
use crate::model::{Account, AccountId, IdempotencyKey, NewTransaction, TransactionRecord};

/// A locked account with its working copy.
#[derive(Debug)]
pub(super) struct LockedRow {
    row: Arc<AccountRow>,
    staged: Account,
    dirty: bool,
    _guard: OwnedMutexGuard<()>,
}

impl LockedRow {
    pub(super) fn new(row: Arc<AccountRow>, guard: OwnedMutexGuard<()>) -> Self {
        // read under the lock: every commit to this row happened before we got it
        let staged = row.committed.read().clone();
        Self {
            row,
            staged,
            dirty: false,
            _guard: guard,
        }
    }
}

/// Atomic scope over a set of locked accounts.
///
/// Balance changes and new records are staged here and published together
/// by [`commit`](UnitOfWork::commit). Dropping a unit of work without
/// committing discards everything it staged. Either way the row locks are
/// released when it goes away.
#[derive(Debug)]
pub struct UnitOfWork {
    store: Arc<Store>,
    rows: BTreeMap<AccountId, LockedRow>,
    pending: Vec<TransactionRecord>,
    committed: bool,
}

impl UnitOfWork {
    pub(super) fn new(store: Arc<Store>, rows: BTreeMap<AccountId, LockedRow>) -> Self {
        Self {
            store,
            rows,
            pending: Vec::new(),
            committed: false,
        }
    }

    /// Soft-delete a locked account. Closing an already closed account is a no-op.
    pub fn deactivate(&mut self, id: AccountId) -> Result<&Account, StoreError> {
        let locked = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if locked.staged.deleted_at.is_none() {
            let now = Utc::now();
            locked.staged.is_active = false;
            locked.staged.deleted_at = Some(now);
            locked.staged.updated_at = now;
            locked.dirty = true;
        }
        Ok(&locked.staged)
    }

    /// Publish staged records and balances, then release the locks.
    ///
    /// Records are appended under the log's write lock after re-checking
    /// idempotency uniqueness; on a violation nothing is published.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        let mut ledger = self.store.ledger.write();
        ledger.append_all(pending)?;

        for locked in self.rows.values().filter(|locked| locked.dirty) {
            *locked.row.committed.write() = locked.staged.clone();
        }
        drop(ledger);

        self.committed = true;
        Ok(())
    }
}

impl AccountStore for UnitOfWork {
    fn account(&self, id: AccountId) -> Result<&Account, StoreError> {
        self.rows
            .get(&id)
            .map(|locked| &locked.staged)
            .ok_or(StoreError::NotFound(id))
    }

    fn adjust_balance(&mut self, id: AccountId, delta: Amount) -> Result<Amount, StoreError> {
        let locked = self.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let balance = locked.staged.balance + delta;
        if balance.is_negative() {
            return Err(StoreError::NegativeBalance {
                account: id,
                balance: locked.staged.balance,
                delta,
            });
        }

        locked.staged.balance = balance;
        locked.staged.updated_at = Utc::now();
        locked.dirty = true;
        Ok(balance)
    }
}

impl LedgerStore for UnitOfWork {
    /// Sees records staged in this unit of work as well as committed ones.
    fn find_by_idempotency_key(
        &self,
        account: AccountId,
        key: &IdempotencyKey,
    ) -> Option<TransactionRecord> {
        self.pending
            .iter()
            .find(|record| record.account_id == account && &record.idempotency_key == key)
            .cloned()
            .or_else(|| self.store.ledger.read().find_by_idempotency_key(account, key))
    }

    fn append(&mut self, record: NewTransaction) -> Result<TransactionRecord, StoreError> {
        if self.find_by_idempotency_key(record.account_id, &record.idempotency_key).is_some() {
            return Err(StoreError::DuplicateKey {
                account: record.account_id,
                key: record.idempotency_key,
            });
        }

        let record = self.store.ledger.read().stamp(record);
        self.pending.push(record.clone());
        Ok(record)
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        let staged_changes =
            !self.pending.is_empty() || self.rows.values().any(|locked| locked.dirty);
        if !self.committed && staged_changes {
            let accounts: Vec<AccountId> = self.rows.keys().copied().collect();
            debug!(?accounts, "unit of work rolled back");
        }
    }
}

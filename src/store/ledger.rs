//! Append-only transaction log.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use uuid::Uuid;

use super::{LedgerStore, StoreError};
use crate::history::HistoryQuery;
use crate::model::{AccountId, IdempotencyKey, NewTransaction, TransactionRecord, TxId};
use crate::page::Page;

/// Per-account indexes into the log.
#[derive(Debug, Default)]
struct AccountEntries {
    /// Positions in append order.
    positions: Vec<usize>,
    by_key: HashMap<IdempotencyKey, usize>,
}

/// The committed transaction log.
///
/// Records are never updated or removed. `(account_id, idempotency_key)` is
/// unique across the whole log.
#[derive(Debug)]
pub struct Ledger {
    records: Vec<TransactionRecord>,
    accounts: HashMap<AccountId, AccountEntries>,
    next_id: AtomicU64,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            accounts: HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reserve a record id. Ids of rolled-back records are never reused.
    pub(crate) fn reserve_id(&self) -> TxId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Give a staged record its identity.
    pub(crate) fn stamp(&self, new: NewTransaction) -> TransactionRecord {
        TransactionRecord {
            id: self.reserve_id(),
            uuid: Uuid::new_v4(),
            account_id: new.account_id,
            kind: new.kind,
            amount: new.amount,
            balance_before: new.balance_before,
            balance_after: new.balance_after,
            idempotency_key: new.idempotency_key,
            related_account_id: new.related_account_id,
            description: new.description,
            created_at: Utc::now(),
        }
    }

    pub fn contains_key(&self, account: AccountId, key: &IdempotencyKey) -> bool {
        self.accounts
            .get(&account)
            .is_some_and(|entries| entries.by_key.contains_key(key))
    }

    /// All records of one account in append order.
    pub fn records_for(&self, account: AccountId) -> impl Iterator<Item = &TransactionRecord> + '_ {
        self.accounts
            .get(&account)
            .into_iter()
            .flat_map(|entries| entries.positions.iter().map(|&pos| &self.records[pos]))
    }

    /// Most recently appended record of one account.
    pub fn latest(&self, account: AccountId) -> Option<&TransactionRecord> {
        let entries = self.accounts.get(&account)?;
        entries.positions.last().map(|&pos| &self.records[pos])
    }

    /// Append a batch atomically: either every record is stored or, on the
    /// first uniqueness violation, none is.
    pub(crate) fn append_all(&mut self, records: Vec<TransactionRecord>) -> Result<(), StoreError> {
        let mut batch = HashSet::with_capacity(records.len());
        for record in &records {
            let pair = (record.account_id, &record.idempotency_key);
            if self.contains_key(pair.0, pair.1) || !batch.insert(pair) {
                return Err(StoreError::DuplicateKey {
                    account: record.account_id,
                    key: record.idempotency_key.clone(),
                });
            }
        }

        for record in records {
            let pos = self.records.len();
            let entries = self.accounts.entry(record.account_id).or_default();
            entries.positions.push(pos);
            entries.by_key.insert(record.idempotency_key.clone(), pos);
            self.records.push(record);
        }
        Ok(())
    }

    /// Filtered, newest-first page of one account's records.
    pub fn query_history(
        &self,
        account: AccountId,
        query: &HistoryQuery,
    ) -> Page<TransactionRecord> {
        let mut matching: Vec<TransactionRecord> = self
            .records_for(account)
            .filter(|record| query.matches(record))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        query.pagination.paginate(matching)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for Ledger {
    fn find_by_idempotency_key(
        &self,
        account: AccountId,
        key: &IdempotencyKey,
    ) -> Option<TransactionRecord> {
        let entries = self.accounts.get(&account)?;
        entries.by_key.get(key).map(|&pos| self.records[pos].clone())
    }

    fn append(&mut self, record: NewTransaction) -> Result<TransactionRecord, StoreError> {
        let record = self.stamp(record);
        self.append_all(vec![record.clone()])?;
        Ok(record)
    }
}

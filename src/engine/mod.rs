//! Ledger engine.
//!
//! Runs deposits, withdrawals and transfers as atomic units of work:
//! lock the accounts (ascending id order), check idempotency, validate,
//! mutate balances, append records, commit. A failure at any step drops the
//! unit of work, which rolls back whatever was staged and releases the locks.
//! Also supports an async stream of operations.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::history::HistoryFilter;
use crate::model::{
    Account, AccountId, Currency, IdempotencyKey, NewTransaction, TransactionRecord,
    TransactionType, Transfer,
};
use crate::page::{Page, Pagination};
use crate::store::{AccountStore, Ledger, LedgerStore, Store, StoreError, UnitOfWork};
use crate::{Amount, LedgerConfig};

mod error;
pub use error::LedgerError;

pub(crate) mod idempotency;

/// Longest description, in characters, a withdrawal or transfer may carry.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// A caller request, as fed to [`LedgerEngine::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Open {
        owner: String,
        currency: Currency,
    },
    Deposit {
        account: AccountId,
        amount: Amount,
        key: IdempotencyKey,
    },
    Withdraw {
        account: AccountId,
        amount: Amount,
        key: IdempotencyKey,
        description: Option<String>,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        key: IdempotencyKey,
        description: Option<String>,
    },
    Close {
        account: AccountId,
    },
}

/// Result of a successfully applied [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Opened(Account),
    Recorded(TransactionRecord),
    Transferred(Transfer),
    Closed(Account),
}

/// Filters for [`LedgerEngine::list_accounts`]. Soft-deleted accounts are
/// never listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    /// Case-insensitive substring of the owner name.
    pub owner: Option<String>,
    pub currency: Option<Currency>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Whether an operation did work or replayed an earlier result.
enum Outcome<T> {
    Applied(T),
    Replayed(T),
}

impl<T> Outcome<T> {
    fn into_inner(self) -> T {
        match self {
            Outcome::Applied(value) | Outcome::Replayed(value) => value,
        }
    }
}

/// Handle to the wallet ledger. Cheap to clone; clones share the same store.
#[derive(Debug, Clone)]
pub struct LedgerEngine {
    store: Arc<Store>,
    config: LedgerConfig,
}

/// Public API
impl LedgerEngine {
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Self {
            store: Arc::new(Store::new(config.lock_timeout)),
            config,
        }
    }

    /// Direct read access to the underlying store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run the engine with the given operation stream
    pub async fn run(&self, mut stream: impl Stream<Item = Operation> + Unpin) {
        while let Some(op) = stream.next().await {
            // a rejected operation must not stop the engine
            if let Err(e) = self.apply(op).await {
                warn!(reason = %e, "operation skipped");
            }
        }
    }

    /// Apply a single caller operation.
    pub async fn apply(&self, op: Operation) -> Result<Applied, LedgerError> {
        match op {
            Operation::Open { owner, currency } => {
                Ok(Applied::Opened(self.open_account(&owner, currency)))
            }
            Operation::Deposit {
                account,
                amount,
                key,
            } => self
                .deposit(account, amount, &key)
                .await
                .map(Applied::Recorded),
            Operation::Withdraw {
                account,
                amount,
                key,
                description,
            } => self
                .withdraw(account, amount, &key, description)
                .await
                .map(Applied::Recorded),
            Operation::Transfer {
                from,
                to,
                amount,
                key,
                description,
            } => self
                .transfer(from, to, amount, &key, description)
                .await
                .map(Applied::Transferred),
            Operation::Close { account } => {
                self.close_account(account).await.map(Applied::Closed)
            }
        }
    }

    /// Create an empty, active account.
    pub fn open_account(&self, owner_name: &str, currency: Currency) -> Account {
        let account = self.store.create_account(owner_name, currency);
        info!(account = account.id, uuid = %account.uuid, currency = %currency, "account opened");
        account
    }

    /// Committed state of a live account; soft-deleted accounts are not found.
    pub fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        let account = self.store.account(id)?;
        if account.deleted_at.is_some() {
            return Err(LedgerError::NotFound(id));
        }
        Ok(account)
    }

    pub fn list_accounts(&self, filter: &AccountFilter) -> Page<Account> {
        let owner = filter.owner.as_deref().map(str::to_lowercase);
        let matching = self
            .store
            .accounts()
            .into_iter()
            .filter(|account| account.deleted_at.is_none())
            .filter(|account| match &owner {
                Some(owner) => account.owner_name.to_lowercase().contains(owner.as_str()),
                None => true,
            })
            .filter(|account| filter.currency.is_none_or(|currency| account.currency == currency))
            .collect();

        Pagination::resolve(filter.page, filter.per_page, &self.config).paginate(matching)
    }

    /// Soft-delete an account. Only empty accounts can be closed; closing an
    /// already closed account returns it unchanged.
    pub async fn close_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        let mut uow = self.store.lock_for_update(&BTreeSet::from([id])).await?;
        let balance = uow.account(id)?.balance;
        if balance != Amount::ZERO {
            return Err(LedgerError::BalanceNotZero { account: id, balance });
        }

        let account = uow.deactivate(id)?.clone();
        uow.commit()?;
        info!(account = id, "account closed");
        Ok(account)
    }

    /// Credit `amount` to an account.
    pub async fn deposit(
        &self,
        account: AccountId,
        amount: Amount,
        key: &IdempotencyKey,
    ) -> Result<TransactionRecord, LedgerError> {
        let result = self.apply_deposit(account, amount, key).await;
        Self::log_result("deposit", account, key, amount, &result);
        result.map(Outcome::into_inner)
    }

    /// Debit `amount` from an account, never below zero.
    pub async fn withdraw(
        &self,
        account: AccountId,
        amount: Amount,
        key: &IdempotencyKey,
        description: Option<String>,
    ) -> Result<TransactionRecord, LedgerError> {
        let result = self
            .apply_withdrawal(account, amount, key, description)
            .await;
        Self::log_result("withdrawal", account, key, amount, &result);
        result.map(Outcome::into_inner)
    }

    /// Move `amount` between two accounts of the same currency. Both legs
    /// carry the same description.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        key: &IdempotencyKey,
        description: Option<String>,
    ) -> Result<Transfer, LedgerError> {
        let result = self
            .apply_transfer(from, to, amount, key, description)
            .await;
        Self::log_result("transfer", from, key, amount, &result);
        result.map(Outcome::into_inner)
    }

    /// Paginated, newest-first history of one account. Never takes locks.
    pub fn history(
        &self,
        account: AccountId,
        filter: &HistoryFilter,
    ) -> Result<Page<TransactionRecord>, LedgerError> {
        self.store.account(account)?;
        let query = filter.resolve(Utc::now().date_naive(), &self.config)?;
        Ok(self.store.query_history(account, &query))
    }
}

/// Private API
impl LedgerEngine {
    /// Small helper to log operation results
    fn log_result<T>(
        op: &str,
        account: AccountId,
        key: &IdempotencyKey,
        amount: Amount,
        result: &Result<Outcome<T>, LedgerError>,
    ) {
        match result {
            Ok(Outcome::Applied(_)) => {
                info!(account = account, key = %key, amount = %amount, "{op} applied");
            }
            Ok(Outcome::Replayed(_)) => {
                info!(account = account, key = %key, amount = %amount, "{op} replayed");
            }
            Err(e) => {
                info!(
                    account = account,
                    key = %key,
                    amount = %amount,
                    reason = %e,
                    "{op} rejected"
                );
            }
        }
    }

    /// Apply a deposit:
    /// - Lock the account
    /// - Return the prior record if the key was already applied
    /// - Ensure the account is open
    /// - Credit the account and record the deposit
    async fn apply_deposit(
        &self,
        account: AccountId,
        amount: Amount,
        key: &IdempotencyKey,
    ) -> Result<Outcome<TransactionRecord>, LedgerError> {
        ensure_valid_amount(amount)?;

        let mut uow = self.store.lock_for_update(&BTreeSet::from([account])).await?;
        let prior =
            idempotency::prior_single(&uow, account, key, TransactionType::Deposit, amount)?;
        if let Some(prior) = prior {
            return Ok(Outcome::Replayed(prior));
        }

        let balance_before = open_account(&uow, account)?.balance;
        let balance_after = uow.adjust_balance(account, amount)?;
        let record = uow.append(NewTransaction {
            account_id: account,
            kind: TransactionType::Deposit,
            amount,
            balance_before,
            balance_after,
            idempotency_key: key.clone(),
            related_account_id: None,
            description: None,
        })?;

        self.commit(uow, record, |ledger| {
            idempotency::prior_single(ledger, account, key, TransactionType::Deposit, amount)
        })
    }

    /// Apply a withdrawal:
    /// - Lock the account
    /// - Return the prior record if the key was already applied
    /// - Ensure the account is open and holds at least `amount`
    /// - Debit the account and record the withdrawal
    async fn apply_withdrawal(
        &self,
        account: AccountId,
        amount: Amount,
        key: &IdempotencyKey,
        description: Option<String>,
    ) -> Result<Outcome<TransactionRecord>, LedgerError> {
        ensure_valid_amount(amount)?;
        ensure_valid_description(description.as_deref())?;

        let mut uow = self.store.lock_for_update(&BTreeSet::from([account])).await?;
        let prior =
            idempotency::prior_single(&uow, account, key, TransactionType::Withdrawal, amount)?;
        if let Some(prior) = prior {
            return Ok(Outcome::Replayed(prior));
        }

        let balance_before = open_account(&uow, account)?.balance;
        if balance_before < amount {
            return Err(LedgerError::InsufficientBalance {
                account,
                balance: balance_before,
                requested: amount,
            });
        }

        let balance_after = uow.adjust_balance(account, -amount)?;
        let record = uow.append(NewTransaction {
            account_id: account,
            kind: TransactionType::Withdrawal,
            amount,
            balance_before,
            balance_after,
            idempotency_key: key.clone(),
            related_account_id: None,
            description,
        })?;

        self.commit(uow, record, |ledger| {
            idempotency::prior_single(ledger, account, key, TransactionType::Withdrawal, amount)
        })
    }

    /// Apply a transfer:
    /// - Reject self-transfers before taking any lock
    /// - Lock both accounts in ascending id order
    /// - Return the prior legs if the key was already applied
    /// - Ensure both accounts are open, share a currency, and the source
    ///   holds at least `amount`
    /// - Debit the source, credit the destination, record both legs
    async fn apply_transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        key: &IdempotencyKey,
        description: Option<String>,
    ) -> Result<Outcome<Transfer>, LedgerError> {
        if from == to {
            return Err(LedgerError::SelfTransfer(from));
        }
        ensure_valid_amount(amount)?;
        ensure_valid_description(description.as_deref())?;

        let mut uow = self.store.lock_for_update(&BTreeSet::from([from, to])).await?;
        if let Some(prior) = idempotency::prior_transfer(&uow, from, to, key, amount)? {
            return Ok(Outcome::Replayed(prior));
        }

        let source = open_account(&uow, from)?;
        let destination = open_account(&uow, to)?;
        if source.currency != destination.currency {
            return Err(LedgerError::CurrencyMismatch {
                from,
                from_currency: source.currency,
                to,
                to_currency: destination.currency,
            });
        }
        if source.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from,
                balance: source.balance,
                requested: amount,
            });
        }

        let from_before = source.balance;
        let to_before = destination.balance;
        let from_after = uow.adjust_balance(from, -amount)?;
        let to_after = uow.adjust_balance(to, amount)?;

        let debit = uow.append(NewTransaction {
            account_id: from,
            kind: TransactionType::TransferDebit,
            amount,
            balance_before: from_before,
            balance_after: from_after,
            idempotency_key: key.clone(),
            related_account_id: Some(to),
            description: description.clone(),
        })?;
        let credit = uow.append(NewTransaction {
            account_id: to,
            kind: TransactionType::TransferCredit,
            amount,
            balance_before: to_before,
            balance_after: to_after,
            idempotency_key: key.clone(),
            related_account_id: Some(from),
            description,
        })?;

        self.commit(uow, Transfer { debit, credit }, |ledger| {
            idempotency::prior_transfer(ledger, from, to, key, amount)
        })
    }

    /// Commit a unit of work.
    ///
    /// A `DuplicateKey` at commit means a concurrent first attempt with the
    /// same key got there first: nothing of ours was published, so the
    /// winner's result is fetched and returned instead.
    fn commit<T>(
        &self,
        uow: UnitOfWork,
        applied: T,
        replay: impl FnOnce(&Ledger) -> Result<Option<T>, LedgerError>,
    ) -> Result<Outcome<T>, LedgerError> {
        match uow.commit() {
            Ok(()) => Ok(Outcome::Applied(applied)),
            Err(StoreError::DuplicateKey { account, key }) => {
                debug!(account = account, key = %key, "lost idempotency race, replaying winner");
                match replay(&*self.store.ledger())? {
                    Some(prior) => Ok(Outcome::Replayed(prior)),
                    None => Err(LedgerError::Store(StoreError::DuplicateKey { account, key })),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for LedgerEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_valid_amount(amount: Amount) -> Result<(), LedgerError> {
    if !amount.is_positive() || amount > Amount::MAX_OPERATION {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

fn ensure_valid_description(description: Option<&str>) -> Result<(), LedgerError> {
    let len = description.map_or(0, |text| text.chars().count());
    if len > MAX_DESCRIPTION_CHARS {
        return Err(LedgerError::DescriptionTooLong(len));
    }
    Ok(())
}

/// A locked account that may take part in balance-affecting operations.
/// Inactive and soft-deleted accounts are reported as not found.
fn open_account(uow: &UnitOfWork, id: AccountId) -> Result<&Account, LedgerError> {
    let account = uow.account(id)?;
    if !account.is_open() {
        return Err(LedgerError::NotFound(id));
    }
    Ok(account)
}

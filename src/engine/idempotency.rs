//! At-most-once detection on top of a [`LedgerStore`].
//!
//! Keys are scoped per account: the same key on two different accounts
//! refers to two unrelated requests.

use crate::Amount;
use crate::engine::LedgerError;
use crate::model::{AccountId, IdempotencyKey, Transfer, TransactionRecord, TransactionType};
use crate::store::LedgerStore;

/// Look for a prior single-leg operation (deposit or withdrawal).
///
/// A prior record of the same type and amount is the earlier result of this
/// very request. Anything else under the same key means the key was reused
/// for a different request.
pub(crate) fn prior_single<L: LedgerStore>(
    ledger: &L,
    account: AccountId,
    key: &IdempotencyKey,
    kind: TransactionType,
    amount: Amount,
) -> Result<Option<TransactionRecord>, LedgerError> {
    match ledger.find_by_idempotency_key(account, key) {
        None => Ok(None),
        Some(record) if record.kind == kind && record.amount == amount => Ok(Some(record)),
        Some(_) => Err(conflict(account, key)),
    }
}

/// Look for a prior transfer: a debit on `from` and a credit on `to` under
/// the same key, pointing at each other.
pub(crate) fn prior_transfer<L: LedgerStore>(
    ledger: &L,
    from: AccountId,
    to: AccountId,
    key: &IdempotencyKey,
    amount: Amount,
) -> Result<Option<Transfer>, LedgerError> {
    let debit = ledger.find_by_idempotency_key(from, key);
    let credit = ledger.find_by_idempotency_key(to, key);

    match (debit, credit) {
        (None, None) => Ok(None),
        (Some(debit), Some(credit))
            if is_leg(&debit, TransactionType::TransferDebit, to, amount)
                && is_leg(&credit, TransactionType::TransferCredit, from, amount) =>
        {
            Ok(Some(Transfer { debit, credit }))
        }
        (Some(debit), _) if !is_leg(&debit, TransactionType::TransferDebit, to, amount) => {
            Err(conflict(from, key))
        }
        _ => Err(conflict(to, key)),
    }
}

fn is_leg(
    record: &TransactionRecord,
    kind: TransactionType,
    counterpart: AccountId,
    amount: Amount,
) -> bool {
    record.kind == kind && record.related_account_id == Some(counterpart) && record.amount == amount
}

fn conflict(account: AccountId, key: &IdempotencyKey) -> LedgerError {
    LedgerError::IdempotencyConflict {
        account,
        key: key.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewTransaction;
    use crate::store::Ledger;
    use TransactionType::{Deposit, TransferCredit, TransferDebit, Withdrawal};

    fn key(s: &str) -> IdempotencyKey {
        IdempotencyKey::new(s).unwrap()
    }

    fn cents(value: i64) -> Amount {
        Amount::from_cents(value)
    }

    fn record(
        account: AccountId,
        kind: TransactionType,
        cents: i64,
        related: Option<AccountId>,
    ) -> NewTransaction {
        NewTransaction {
            account_id: account,
            kind,
            amount: Amount::from_cents(cents),
            balance_before: Amount::ZERO,
            balance_after: Amount::ZERO,
            idempotency_key: key("k"),
            related_account_id: related,
            description: None,
        }
    }

    #[test]
    fn single_miss_proceeds() {
        let ledger = Ledger::new();
        let prior = prior_single(&ledger, 1, &key("k"), Deposit, cents(100));
        assert_eq!(prior, Ok(None));
    }

    #[test]
    fn single_hit_returns_prior_record() {
        let mut ledger = Ledger::new();
        let stored = ledger.append(record(1, Deposit, 100, None)).unwrap();

        let prior = prior_single(&ledger, 1, &key("k"), Deposit, cents(100));
        assert_eq!(prior, Ok(Some(stored)));
    }

    #[test]
    fn single_hit_with_other_parameters_conflicts() {
        let mut ledger = Ledger::new();
        ledger.append(record(1, Deposit, 100, None)).unwrap();

        let other_kind = prior_single(&ledger, 1, &key("k"), Withdrawal, cents(100));
        assert!(matches!(other_kind, Err(LedgerError::IdempotencyConflict { account: 1, .. })));

        let other_amount = prior_single(&ledger, 1, &key("k"), Deposit, cents(101));
        assert!(matches!(other_amount, Err(LedgerError::IdempotencyConflict { account: 1, .. })));
    }

    #[test]
    fn key_is_scoped_per_account() {
        let mut ledger = Ledger::new();
        ledger.append(record(1, Deposit, 100, None)).unwrap();

        let prior = prior_single(&ledger, 2, &key("k"), Deposit, cents(100));
        assert_eq!(prior, Ok(None));
    }

    #[test]
    fn transfer_hit_returns_both_legs() {
        let mut ledger = Ledger::new();
        let debit = ledger.append(record(1, TransferDebit, 50, Some(2))).unwrap();
        let credit = ledger.append(record(2, TransferCredit, 50, Some(1))).unwrap();

        let prior = prior_transfer(&ledger, 1, 2, &key("k"), cents(50));
        assert_eq!(prior, Ok(Some(Transfer { debit, credit })));
    }

    #[test]
    fn transfer_key_used_elsewhere_conflicts() {
        let mut ledger = Ledger::new();
        ledger.append(record(2, Deposit, 50, None)).unwrap();

        let prior = prior_transfer(&ledger, 1, 2, &key("k"), cents(50));
        assert!(matches!(prior, Err(LedgerError::IdempotencyConflict { account: 2, .. })));

        let reversed = prior_transfer(&ledger, 2, 1, &key("k"), cents(50));
        assert!(matches!(reversed, Err(LedgerError::IdempotencyConflict { account: 2, .. })));
    }

    #[test]
    fn transfer_in_the_other_direction_conflicts() {
        let mut ledger = Ledger::new();
        ledger.append(record(1, TransferDebit, 50, Some(2))).unwrap();
        ledger.append(record(2, TransferCredit, 50, Some(1))).unwrap();

        let prior = prior_transfer(&ledger, 2, 1, &key("k"), cents(50));
        assert!(matches!(prior, Err(LedgerError::IdempotencyConflict { account: 2, .. })));
    }
}

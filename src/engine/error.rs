//! Error types returned by the ledger engine.

use thiserror::Error;

use super::MAX_DESCRIPTION_CHARS;
use crate::Amount;
use crate::history::HistoryError;
use crate::model::{AccountId, Currency, IdempotencyKey};
use crate::store::StoreError;

/// Typed failure of a ledger operation.
///
/// Every variant except [`LedgerError::Store`] is a client-facing outcome;
/// `Store` wraps internal store failures the engine could not map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient balance in account {account}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        account: AccountId,
        balance: Amount,
        requested: Amount,
    },

    #[error(
        "currency mismatch: account {from} holds {from_currency}, account {to} holds {to_currency}"
    )]
    CurrencyMismatch {
        from: AccountId,
        from_currency: Currency,
        to: AccountId,
        to_currency: Currency,
    },

    #[error("account {0} cannot transfer to itself")]
    SelfTransfer(AccountId),

    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error("timed out waiting for the lock on account {0}")]
    LockTimeout(AccountId),

    #[error("amount must be positive and at most {max}, got {0}", max = Amount::MAX_OPERATION)]
    InvalidAmount(Amount),

    #[error("description must be at most {max} characters, got {0}", max = MAX_DESCRIPTION_CHARS)]
    DescriptionTooLong(usize),

    #[error("idempotency key '{key}' already used on account {account} for a different request")]
    IdempotencyConflict { account: AccountId, key: IdempotencyKey },

    #[error("account {account} still holds {balance} and cannot be closed")]
    BalanceNotZero { account: AccountId, balance: Amount },

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("store failure: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(account) => LedgerError::NotFound(account),
            StoreError::LockTimeout { account, .. } => LedgerError::LockTimeout(account),
            other => LedgerError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn store_errors_map_onto_engine_taxonomy() {
        assert_eq!(
            LedgerError::from(StoreError::NotFound(3)),
            LedgerError::NotFound(3)
        );
        assert_eq!(
            LedgerError::from(StoreError::LockTimeout {
                account: 4,
                waited: Duration::from_secs(1)
            }),
            LedgerError::LockTimeout(4)
        );
        assert!(matches!(
            LedgerError::from(StoreError::NegativeBalance {
                account: 1,
                balance: Amount::ZERO,
                delta: Amount::from_cents(-1)
            }),
            LedgerError::Store(_)
        ));
    }

    #[test]
    fn messages_carry_context() {
        let err = LedgerError::InsufficientBalance {
            account: 1,
            balance: Amount::from_cents(10_000),
            requested: Amount::from_cents(15_000),
        };
        assert_eq!(
            err.to_string(),
            "insufficient balance in account 1: balance 100.00, requested 150.00"
        );
        assert_eq!(
            LedgerError::InvalidAmount(Amount::ZERO).to_string(),
            "amount must be positive and at most 999999999.99, got 0.00"
        );
    }
}

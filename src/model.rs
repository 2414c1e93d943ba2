//! Core domain types for the wallet ledger.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Amount;

/// Account identifier, assigned sequentially by the store.
pub type AccountId = u64;

/// Transaction record identifier, assigned sequentially by the ledger.
pub type TxId = u64;

/// Errors raised while building domain values from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("currency must be a 3-letter code, got '{0}'")]
    InvalidCurrency(String),

    #[error("idempotency key must not be empty")]
    EmptyIdempotencyKey,

    #[error("unknown transaction type '{0}'")]
    UnknownTransactionType(String),
}

/// ISO-4217 style currency code, always stored uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn as_str(&self) -> &str {
        // only ASCII letters are ever stored
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for Currency {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(ModelError::InvalidCurrency(code.to_string()));
        }
        Ok(Currency([
            bytes[0].to_ascii_uppercase(),
            bytes[1].to_ascii_uppercase(),
            bytes[2].to_ascii_uppercase(),
        ]))
    }
}

impl TryFrom<String> for Currency {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.as_str().to_string()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied token deduplicating retried mutating requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ModelError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ModelError::EmptyIdempotencyKey);
        }
        Ok(IdempotencyKey(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdempotencyKey::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of ledger entry types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    #[serde(alias = "withdraw")]
    Withdrawal,
    /// Outgoing leg of a transfer, booked on the source account.
    #[serde(alias = "transfer_out")]
    TransferDebit,
    /// Incoming leg of a transfer, booked on the destination account.
    #[serde(alias = "transfer_in")]
    TransferCredit,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::Deposit,
        TransactionType::Withdrawal,
        TransactionType::TransferDebit,
        TransactionType::TransferCredit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::TransferDebit => "transfer_debit",
            TransactionType::TransferCredit => "transfer_credit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = ModelError;

    /// Accepts the canonical names plus the legacy spellings still found in
    /// older clients (`withdraw`, `transfer_out`, `transfer_in`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(TransactionType::Deposit),
            "withdrawal" | "withdraw" => Ok(TransactionType::Withdrawal),
            "transfer_debit" | "transfer_out" => Ok(TransactionType::TransferDebit),
            "transfer_credit" | "transfer_in" => Ok(TransactionType::TransferCredit),
            other => Err(ModelError::UnknownTransactionType(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wallet holding a single-currency balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub uuid: Uuid,
    pub owner_name: String,
    pub currency: Currency,
    /// Never negative.
    pub balance: Amount,
    pub is_active: bool,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new, empty and active account.
    pub fn new(id: AccountId, owner_name: impl Into<String>, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id,
            uuid: Uuid::new_v4(),
            owner_name: owner_name.into(),
            currency,
            balance: Amount::ZERO,
            is_active: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the account may take part in balance-affecting operations.
    pub fn is_open(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TxId,
    pub uuid: Uuid,
    pub account_id: AccountId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Always positive; the direction is given by `kind`.
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub idempotency_key: IdempotencyKey,
    /// Counterpart account of a transfer leg.
    pub related_account_id: Option<AccountId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The two linked legs written by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub debit: TransactionRecord,
    pub credit: TransactionRecord,
}

/// A record staged for appending; the ledger assigns identity and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub account_id: AccountId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub balance_before: Amount,
    pub balance_after: Amount,
    pub idempotency_key: IdempotencyKey,
    pub related_account_id: Option<AccountId>,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_is_uppercased() {
        let currency: Currency = "usd".parse().unwrap();
        assert_eq!(currency.as_str(), "USD");
        assert_eq!(currency, "USD".parse().unwrap());
    }

    #[test]
    fn currency_rejects_bad_codes() {
        for code in ["US", "USDT", "U$D", ""] {
            assert!(matches!(
                code.parse::<Currency>(),
                Err(ModelError::InvalidCurrency(_))
            ));
        }
    }

    #[test]
    fn empty_idempotency_key_is_rejected() {
        assert_eq!(
            IdempotencyKey::new("  "),
            Err(ModelError::EmptyIdempotencyKey)
        );
        assert_eq!(IdempotencyKey::new("k1").unwrap().as_str(), "k1");
    }

    #[test]
    fn transaction_type_canonical_names() {
        for kind in TransactionType::ALL {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
        }
    }

    #[test]
    fn transaction_type_accepts_legacy_spellings() {
        assert_eq!(
            "withdraw".parse::<TransactionType>().unwrap(),
            TransactionType::Withdrawal
        );
        assert_eq!(
            "transfer_out".parse::<TransactionType>().unwrap(),
            TransactionType::TransferDebit
        );
        assert_eq!(
            "TRANSFER_IN".parse::<TransactionType>().unwrap(),
            TransactionType::TransferCredit
        );
        assert!("refund".parse::<TransactionType>().is_err());
    }

    #[test]
    fn transaction_type_deserializes_legacy_spellings() {
        use serde::de::IntoDeserializer;
        use serde::de::value::{Error, StrDeserializer};

        fn deserialize(name: &str) -> Result<TransactionType, Error> {
            let de: StrDeserializer<'_, Error> = name.into_deserializer();
            TransactionType::deserialize(de)
        }

        for kind in TransactionType::ALL {
            assert_eq!(deserialize(kind.as_str()).unwrap(), kind);
        }
        assert_eq!(deserialize("withdraw").unwrap(), TransactionType::Withdrawal);
        assert_eq!(deserialize("transfer_out").unwrap(), TransactionType::TransferDebit);
        assert_eq!(deserialize("transfer_in").unwrap(), TransactionType::TransferCredit);
        assert!(deserialize("refund").is_err());
    }

    #[test]
    fn new_account_is_open_and_empty() {
        let account = Account::new(1, "alice", "EUR".parse().unwrap());
        assert_eq!(account.balance, Amount::ZERO);
        assert!(account.is_open());
        assert_eq!(account.created_at, account.updated_at);
    }

    #[test]
    fn soft_deleted_account_is_not_open() {
        let mut account = Account::new(1, "alice", "EUR".parse().unwrap());
        account.deleted_at = Some(Utc::now());
        assert!(!account.is_open());
    }
}

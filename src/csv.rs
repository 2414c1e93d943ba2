use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::AmountError;
use crate::model::ModelError;
use crate::{Account, AccountId, Amount, Currency, IdempotencyKey, Operation};

/// Errors that can occur when reading an operation script
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open operation script: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized operation '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: &'static str,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    Amount { line: usize, source: AmountError },

    #[error("line {line}: {source}")]
    Model { line: usize, source: ModelError },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    op: String,
    account: Option<AccountId>,
    counterparty: Option<AccountId>,
    amount: Option<String>,
    key: Option<String>,
    owner: Option<String>,
    currency: Option<String>,
    /// Optional trailing column; older scripts omit it.
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    id: AccountId,
    uuid: String,
    owner: &'a str,
    currency: &'a str,
    balance: String,
    active: bool,
}

/// Field extraction for one script row, tagged with its line and operation.
struct RowReader {
    line: usize,
    op: &'static str,
    row: InputRow,
}

impl RowReader {
    fn missing(&self, field: &'static str) -> CsvError {
        CsvError::MissingField {
            line: self.line,
            op: self.op,
            field,
        }
    }

    fn account(&self) -> Result<AccountId, CsvError> {
        self.row.account.ok_or_else(|| self.missing("account"))
    }

    fn counterparty(&self) -> Result<AccountId, CsvError> {
        self.row.counterparty.ok_or_else(|| self.missing("counterparty"))
    }

    fn amount(&self) -> Result<Amount, CsvError> {
        let raw = self.row.amount.as_deref().ok_or_else(|| self.missing("amount"))?;
        raw.parse().map_err(|source| CsvError::Amount { line: self.line, source })
    }

    fn key(&self) -> Result<IdempotencyKey, CsvError> {
        let raw = self.row.key.as_deref().ok_or_else(|| self.missing("key"))?;
        IdempotencyKey::new(raw).map_err(|source| CsvError::Model { line: self.line, source })
    }

    fn owner(&self) -> Result<String, CsvError> {
        self.row.owner.clone().ok_or_else(|| self.missing("owner"))
    }

    fn description(&self) -> Option<String> {
        self.row.description.clone()
    }

    fn currency(&self) -> Result<Currency, CsvError> {
        let raw = self.row.currency.as_deref().ok_or_else(|| self.missing("currency"))?;
        raw.parse().map_err(|source| CsvError::Model { line: self.line, source })
    }
}

fn parse_row(line: usize, row: InputRow) -> Result<Operation, CsvError> {
    let op = match row.op.as_str() {
        "open" => "open",
        "deposit" => "deposit",
        "withdraw" => "withdraw",
        "transfer" => "transfer",
        "close" => "close",
        other => {
            return Err(CsvError::UnrecognizedOp {
                line,
                op: other.to_string(),
            });
        }
    };
    let reader = RowReader { line, op, row };

    Ok(match op {
        "open" => Operation::Open {
            owner: reader.owner()?,
            currency: reader.currency()?,
        },
        "deposit" => Operation::Deposit {
            account: reader.account()?,
            amount: reader.amount()?,
            key: reader.key()?,
        },
        "withdraw" => Operation::Withdraw {
            account: reader.account()?,
            amount: reader.amount()?,
            key: reader.key()?,
            description: reader.description(),
        },
        "transfer" => Operation::Transfer {
            from: reader.account()?,
            to: reader.counterparty()?,
            amount: reader.amount()?,
            key: reader.key()?,
            description: reader.description(),
        },
        _ => Operation::Close {
            account: reader.account()?,
        },
    })
}

/// Read caller operations from a csv script
pub fn read_operations(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Operation, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_row(line, row)
        }))
}

/// Write account states in csv format
pub fn write_accounts<W: io::Write>(
    writer: W,
    accounts: impl IntoIterator<Item = Account>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for account in accounts {
        writer.serialize(OutputRow {
            id: account.id,
            uuid: account.uuid.to_string(),
            owner: &account.owner_name,
            currency: account.currency.as_str(),
            balance: account.balance.to_string(),
            active: account.is_open(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "op,account,counterparty,amount,key,owner,currency,description\n";

    fn write_csv(rows: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HEADER.as_bytes()).unwrap();
        file.write_all(rows.as_bytes()).unwrap();
        file
    }

    fn read_all(rows: &str) -> Vec<Result<Operation, CsvError>> {
        let file = write_csv(rows);
        read_operations(file.path()).unwrap().collect()
    }

    #[test]
    fn read_open() {
        let results = read_all("open,,,,,Alice,usd\n");
        assert_eq!(results.len(), 1);

        match results.into_iter().next().unwrap().unwrap() {
            Operation::Open { owner, currency } => {
                assert_eq!(owner, "Alice");
                assert_eq!(currency.as_str(), "USD");
            }
            _ => panic!("expected open"),
        }
    }

    #[test]
    fn read_deposit() {
        let results = read_all("deposit,1,,10.5,k1,,\n");
        let op = results.into_iter().next().unwrap().unwrap();
        assert_eq!(
            op,
            Operation::Deposit {
                account: 1,
                amount: Amount::from_cents(1_050),
                key: IdempotencyKey::new("k1").unwrap(),
            }
        );
    }

    #[test]
    fn read_transfer() {
        let results = read_all("transfer,2,3,5.25,t1,,,lunch\n");
        let op = results.into_iter().next().unwrap().unwrap();
        assert_eq!(
            op,
            Operation::Transfer {
                from: 2,
                to: 3,
                amount: Amount::from_cents(525),
                key: IdempotencyKey::new("t1").unwrap(),
                description: Some("lunch".to_string()),
            }
        );
    }

    #[test]
    fn read_without_description_column() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"op,account,counterparty,amount,key,owner,currency\n")
            .unwrap();
        file.write_all(b"withdraw,1,,2.00,w1,,\n").unwrap();

        let results: Vec<_> = read_operations(file.path()).unwrap().collect();
        assert!(matches!(
            results[0].as_ref().unwrap(),
            Operation::Withdraw { description: None, .. }
        ));
    }

    #[test]
    fn read_with_whitespace() {
        let results = read_all("withdraw, 1, , 10.00, w1, , \nclose, 1, , , , , \n");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn read_returns_error_for_unknown_op() {
        let results = read_all("chargeback,1,,10.0,k,,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedOp { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_fields() {
        let results = read_all("deposit,1,,,k,,\ntransfer,1,,1.00,k,,\n");
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            CsvError::MissingField { line: 2, field: "amount", .. }
        ));
        assert!(matches!(
            results[1].as_ref().unwrap_err(),
            CsvError::MissingField { line: 3, field: "counterparty", .. }
        ));
    }

    #[test]
    fn read_returns_error_for_bad_values() {
        let results = read_all("deposit,1,,1.005,k,,\nopen,,,,,Bob,dollars\n");
        assert!(matches!(results[0].as_ref().unwrap_err(), CsvError::Amount { line: 2, .. }));
        assert!(matches!(results[1].as_ref().unwrap_err(), CsvError::Model { line: 3, .. }));
    }

    #[test]
    fn read_missing_file_fails() {
        assert!(matches!(read_operations("/nonexistent/ops.csv"), Err(CsvError::Open(_))));
    }

    #[test]
    fn write_accounts_as_csv() {
        let mut account = Account::new(1, "Alice", "USD".parse().unwrap());
        account.balance = Amount::from_cents(7_500);
        let uuid = account.uuid;

        let mut out = Vec::new();
        write_accounts(&mut out, [account]).unwrap();

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "id,uuid,owner,currency,balance,active");
        assert_eq!(lines[1], format!("1,{uuid},Alice,USD,75.00,true"));
    }
}

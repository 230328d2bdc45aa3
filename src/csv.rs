use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::amount::ParseDecimalError;
use crate::engine::AccountBalance;
use crate::model::NewTransaction;
use crate::{Amount, DealerId, TransactionType, Uid};

/// Errors that can occur when reading a ledger export
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("cannot open ledger export: {0}")]
    Open(#[source] csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized transaction type '{tx_type}'")]
    UnrecognizedType { line: usize, tx_type: String },

    #[error("line {line}: {source}")]
    InvalidAmount {
        line: usize,
        source: ParseDecimalError,
    },

    #[error("line {line}: amount must be positive")]
    NonPositiveAmount { line: usize },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    amount: String,
    from: Uid,
    to: Uid,
    dealer: DealerId,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    uid: &'a str,
    balance: String,
}

/// Read ledger records from a csv export with the header
/// `type,amount,from,to,dealer,reason`
pub fn read_transactions(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<NewTransaction, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let kind = match row.r#type.as_str() {
                "credit" => TransactionType::Credit,
                "debit" => TransactionType::Debit,
                "adjustment" => TransactionType::Adjustment,
                other => {
                    return Err(CsvError::UnrecognizedType {
                        line,
                        tx_type: other.to_string(),
                    });
                }
            };
            let amount: Amount = row
                .amount
                .parse()
                .map_err(|source| CsvError::InvalidAmount { line, source })?;
            if !amount.is_positive() {
                return Err(CsvError::NonPositiveAmount { line });
            }
            Ok(NewTransaction {
                kind,
                amount,
                from_uid: row.from,
                to_uid: row.to,
                dealer_id: row.dealer,
                reason: row.reason,
            })
        }))
}

/// Write replayed balances in csv format
pub fn write_balances<'a>(
    writer: impl io::Write,
    accounts: impl IntoIterator<Item = &'a AccountBalance>,
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);

    for account in accounts {
        writer.serialize(OutputRow {
            uid: account.uid.as_str(),
            balance: account.balance.to_string(),
        })?;
    }

    writer.flush()?;
    Ok(())
}

//! Balance derivation by ledger replay.

use thiserror::Error;

use crate::Amount;
use crate::model::{Transaction, TransactionType, Uid};
use crate::store::{Page, TransactionFilter};

/// The replayed balance does not fit in an [`Amount`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("replayed balance of {uid} is out of range")]
pub struct BalanceOverflow {
    pub uid: Uid,
}

/// Fold a user's transactions into a balance.
///
/// Adds credits received and subtracts debits paid. The result is not
/// clamped: a negative value means the ledger is inconsistent.
pub fn compute_balance<'a>(
    uid: &Uid,
    txns: impl IntoIterator<Item = &'a Transaction>,
) -> Result<Amount, BalanceOverflow> {
    to_amount(uid, fold(uid, txns))
}

/// Replay every transaction touching `uid`, fetched page by page.
pub(crate) fn replay(
    uid: &Uid,
    page_size: usize,
    mut fetch: impl FnMut(&TransactionFilter) -> Page<Transaction>,
) -> Result<Amount, BalanceOverflow> {
    let mut filter = TransactionFilter::for_uid(uid.clone()).limit(page_size);
    let mut total = 0i128;
    loop {
        let page = fetch(&filter);
        total += fold(uid, &page.items);
        match page.next {
            Some(cursor) => filter = filter.after(cursor),
            None => return to_amount(uid, total),
        }
    }
}

// Summed in i128 so the order of records cannot overflow an intermediate
// total; only the final value has to fit.
fn fold<'a>(uid: &Uid, txns: impl IntoIterator<Item = &'a Transaction>) -> i128 {
    let mut total = 0i128;
    for tx in txns {
        match tx.kind {
            TransactionType::Credit if &tx.to_uid == uid => total += i128::from(tx.amount.scaled()),
            TransactionType::Debit if &tx.from_uid == uid => total -= i128::from(tx.amount.scaled()),
            // Adjustments are not folded; their sign convention was never
            // settled, so they stay out until it is.
            _ => {}
        }
    }
    total
}

fn to_amount(uid: &Uid, total: i128) -> Result<Amount, BalanceOverflow> {
    i64::try_from(total)
        .map(Amount::from_scaled)
        .map_err(|_| BalanceOverflow { uid: uid.clone() })
}

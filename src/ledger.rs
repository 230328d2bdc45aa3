//! Append-only ledger of fund movements.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{error, warn};

use crate::Amount;
use crate::balance::{self, BalanceOverflow};
use crate::model::{NewTransaction, Transaction, TransactionId, Uid};
use crate::store::{Database, Page, StoreError, TransactionFilter};

/// Ledger view over the shared store. Records are never updated or removed.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
    page_size: usize,
}

impl Ledger {
    pub fn new(db: Arc<Database>, page_size: usize) -> Self {
        Self {
            db,
            page_size: page_size.max(1),
        }
    }

    /// Append one record. Has no read set, so concurrent writers never make
    /// it retry.
    pub(crate) async fn append(&self, tx: NewTransaction) -> Result<TransactionId, StoreError> {
        let (kind, from, to) = (tx.kind, tx.from_uid.clone(), tx.to_uid.clone());
        self.db
            .transaction("ledger.append", |txn| {
                Ok::<_, StoreError>(txn.append(tx.clone()))
            })
            .await
            .inspect_err(|e| {
                error!(%kind, from = %from, to = %to, error = %e, "ledger append failed");
            })
    }

    /// One page of matching records, newest first.
    pub async fn query(&self, filter: &TransactionFilter) -> Page<Transaction> {
        self.db.read(|s| s.transactions(filter)).await
    }

    /// Every matching record, following cursors from the first page onwards.
    /// `filter.limit` is used as the page size.
    pub async fn query_all(&self, filter: &TransactionFilter) -> Vec<Transaction> {
        let mut filter = filter.clone();
        if filter.limit.is_none() {
            filter.limit = Some(self.page_size);
        }
        let mut all = Vec::new();
        loop {
            let page = self.query(&filter).await;
            all.extend(page.items);
            match page.next {
                Some(cursor) => filter.cursor = Some(cursor),
                None => return all,
            }
        }
    }

    /// Replay the ledger for `uid`. Negative results are returned as-is and
    /// logged as a consistency alarm; so is a total that leaves the
    /// [`Amount`] range, which is returned as an error.
    pub async fn balance(&self, uid: &Uid) -> Result<Amount, BalanceOverflow> {
        let page_size = self.page_size;
        let balance = self
            .db
            .read(|s| balance::replay(uid, page_size, |filter| s.transactions(filter)))
            .await
            .inspect_err(|e| error!(uid = %uid, error = %e, "ledger does not replay"))?;
        if balance.is_negative() {
            warn!(uid = %uid, balance = %balance, "replayed balance is negative");
        }
        Ok(balance)
    }

    /// Every uid that appears on either side of a record, sorted.
    pub async fn parties(&self) -> BTreeSet<Uid> {
        self.db
            .read(|s| {
                s.transactions(&TransactionFilter::new())
                    .items
                    .into_iter()
                    .flat_map(|tx| [tx.from_uid, tx.to_uid])
                    .collect()
            })
            .await
    }
}

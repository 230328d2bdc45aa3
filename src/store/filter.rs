use chrono::{DateTime, Utc};

use crate::model::{DealerId, Transaction, TransactionType, Uid};

/// Opaque continuation point for a ledger query.
///
/// Continuing from a cursor yields only records strictly older than the last
/// record of the page that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(pub(crate) usize);

/// One page of query results, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Conjunction of ledger predicates. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    pub dealer_id: Option<DealerId>,
    pub kind: Option<TransactionType>,
    /// Matches either `from_uid` or `to_uid`.
    pub uid: Option<Uid>,
    /// Inclusive lower bound on `created_at`.
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
}

impl TransactionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_uid(uid: Uid) -> Self {
        Self {
            uid: Some(uid),
            ..Self::default()
        }
    }

    pub fn dealer(mut self, dealer_id: DealerId) -> Self {
        self.dealer_id = Some(dealer_id);
        self
    }

    pub fn kind(mut self, kind: TransactionType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Whether `tx` satisfies every predicate (limit and cursor excluded).
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(dealer) = &self.dealer_id {
            if &tx.dealer_id != dealer {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if tx.kind != kind {
                return false;
            }
        }
        if let Some(uid) = &self.uid {
            if &tx.from_uid != uid && &tx.to_uid != uid {
                return false;
            }
        }
        if let Some(since) = self.since {
            if tx.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if tx.created_at >= until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::TransactionId;
    use chrono::Duration;

    fn tx(kind: TransactionType, from: &str, to: &str, dealer: &str) -> Transaction {
        Transaction {
            id: TransactionId::generate(),
            kind,
            amount: Amount::whole(1),
            from_uid: Uid::from(from),
            to_uid: Uid::from(to),
            dealer_id: DealerId::from(dealer),
            reason: String::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = TransactionFilter::new();
        assert!(filter.matches(&tx(TransactionType::Credit, "d", "u", "D1")));
        assert!(filter.matches(&tx(TransactionType::Adjustment, "a", "b", "D2")));
    }

    #[test]
    fn uid_matches_either_party() {
        let filter = TransactionFilter::for_uid(Uid::from("u1"));
        assert!(filter.matches(&tx(TransactionType::Credit, "D1", "u1", "D1")));
        assert!(filter.matches(&tx(TransactionType::Debit, "u1", "D1", "D1")));
        assert!(!filter.matches(&tx(TransactionType::Credit, "D1", "u2", "D1")));
    }

    #[test]
    fn predicates_are_conjunctive() {
        let filter = TransactionFilter::new()
            .dealer(DealerId::from("D1"))
            .kind(TransactionType::Debit);
        assert!(filter.matches(&tx(TransactionType::Debit, "u1", "D1", "D1")));
        assert!(!filter.matches(&tx(TransactionType::Credit, "D1", "u1", "D1")));
        assert!(!filter.matches(&tx(TransactionType::Debit, "u1", "D2", "D2")));
    }

    #[test]
    fn date_range_is_half_open() {
        let record = tx(TransactionType::Credit, "D1", "u1", "D1");
        let at = record.created_at;

        assert!(TransactionFilter::new().since(at).matches(&record));
        assert!(!TransactionFilter::new().until(at).matches(&record));
        assert!(
            TransactionFilter::new()
                .until(at + Duration::seconds(1))
                .matches(&record)
        );
        assert!(
            !TransactionFilter::new()
                .since(at + Duration::seconds(1))
                .matches(&record)
        );
    }
}

//! In-memory transactional document store.
//!
//! Holds the three collections (`users`, `transactions`, `slips`) behind a
//! single async `RwLock`. Writers go through [`Database::transaction`], which
//! runs the body against a snapshot, then validates and commits under the
//! write lock (optimistic concurrency):
//!
//! - every read of a user record, a party's ledger or a slip records its
//!   version in the read set
//! - every write bumps the version of each key it touches
//! - commit fails with a conflict if any version in the read set moved, and
//!   the body is re-run against fresh state
//! - writes are applied with an undo log, so a failed commit leaves nothing
//!   behind

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, warn};

use crate::model::{
    DealerId, NewSlip, NewTransaction, Slip, SlipId, SlipStatus, Transaction, TransactionId, Uid,
    User,
};

pub mod filter;
pub use filter::{Cursor, Page, TransactionFilter};

/// Persistence-level failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store i/o failure: {0}")]
    Io(String),

    #[error("{op}: commit retries exhausted after {attempts} attempts")]
    RetriesExhausted { op: &'static str, attempts: u32 },
}

/// Versioned entity tracked for conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    /// The `users` record of a uid.
    User(Uid),
    /// The ledger records on either side of which a uid appears.
    Party(Uid),
    Slip(SlipId),
}

#[derive(Debug)]
enum Write {
    Transaction(TransactionId, NewTransaction),
    Slip(SlipId, NewSlip),
    SlipStatus(SlipId, SlipStatus),
    User(Uid, User),
}

#[derive(Debug)]
enum Undo {
    PopTransaction,
    RemoveSlip(SlipId),
    RestoreSlip(Box<Slip>),
    RestoreUser(Uid, Option<User>),
    Version(Key, Option<u64>),
}

#[derive(Debug, Default)]
struct Collections {
    users: HashMap<Uid, User>,
    /// Append order; the index doubles as the query cursor.
    transactions: Vec<Transaction>,
    slips: HashMap<SlipId, Slip>,
    slip_order: Vec<SlipId>,
    versions: HashMap<Key, u64>,
    last_timestamp: Option<DateTime<Utc>>,
    /// Number of writes after which the next commit fails.
    fault: Option<usize>,
}

/// Read-only view over a consistent state of the store.
pub struct Snapshot<'a> {
    state: &'a Collections,
}

impl Snapshot<'_> {
    pub fn user(&self, uid: &Uid) -> Option<&User> {
        self.state.users.get(uid)
    }

    pub fn slip(&self, id: SlipId) -> Option<&Slip> {
        self.state.slips.get(&id)
    }

    /// Run a ledger query. Results are newest first.
    pub fn transactions(&self, filter: &TransactionFilter) -> Page<Transaction> {
        let end = filter
            .cursor
            .map_or(self.state.transactions.len(), |Cursor(seq)| {
                seq.min(self.state.transactions.len())
            });
        let limit = filter.limit.unwrap_or(usize::MAX);

        let mut items = Vec::new();
        let mut next = None;
        for seq in (0..end).rev() {
            let tx = &self.state.transactions[seq];
            if !filter.matches(tx) {
                continue;
            }
            if items.len() == limit {
                // at least one more match exists
                next = Some(Cursor(seq + 1));
                break;
            }
            items.push(tx.clone());
        }
        Page { items, next }
    }

    pub fn slips_for_user(&self, uid: &Uid) -> Vec<Slip> {
        self.slips_where(|slip| &slip.user_id == uid)
    }

    pub fn slips_for_dealer(&self, dealer_id: &DealerId) -> Vec<Slip> {
        self.slips_where(|slip| &slip.dealer_id == dealer_id)
    }

    pub fn transaction_count(&self) -> usize {
        self.state.transactions.len()
    }

    pub fn slip_count(&self) -> usize {
        self.state.slips.len()
    }

    fn slips_where(&self, predicate: impl Fn(&Slip) -> bool) -> Vec<Slip> {
        self.state
            .slip_order
            .iter()
            .rev()
            .filter_map(|id| self.state.slips.get(id))
            .filter(|slip| predicate(slip))
            .cloned()
            .collect()
    }
}

/// An in-flight optimistic transaction.
pub struct Txn<'a> {
    snapshot: Snapshot<'a>,
    reads: HashMap<Key, u64>,
    writes: Vec<Write>,
}

impl<'a> Txn<'a> {
    fn new(state: &'a Collections) -> Self {
        Self {
            snapshot: Snapshot { state },
            reads: HashMap::new(),
            writes: Vec::new(),
        }
    }

    fn observe(&mut self, key: Key) {
        let version = self.snapshot.state.version(&key);
        self.reads.entry(key).or_insert(version);
    }

    /// Look up a user; the commit conflicts if the user record changes
    /// before it lands.
    pub fn user(&mut self, uid: &Uid) -> Option<&User> {
        self.observe(Key::User(uid.clone()));
        self.snapshot.user(uid)
    }

    pub fn slip(&mut self, id: SlipId) -> Option<&Slip> {
        self.observe(Key::Slip(id));
        self.snapshot.slip(id)
    }

    /// Ledger query. A `uid` filter puts that party in the read set.
    pub fn transactions(&mut self, filter: &TransactionFilter) -> Page<Transaction> {
        if let Some(uid) = &filter.uid {
            self.observe(Key::Party(uid.clone()));
        }
        self.snapshot.transactions(filter)
    }

    pub fn append(&mut self, tx: NewTransaction) -> TransactionId {
        let id = TransactionId::generate();
        self.writes.push(Write::Transaction(id, tx));
        id
    }

    pub fn insert_slip(&mut self, slip: NewSlip) -> SlipId {
        let id = SlipId::generate();
        self.writes.push(Write::Slip(id, slip));
        id
    }

    pub fn set_slip_status(&mut self, id: SlipId, status: SlipStatus) {
        self.writes.push(Write::SlipStatus(id, status));
    }

    pub fn put_user(&mut self, uid: Uid, user: User) {
        self.writes.push(Write::User(uid, user));
    }

    fn into_parts(self) -> (HashMap<Key, u64>, Vec<Write>) {
        (self.reads, self.writes)
    }
}

impl Collections {
    fn version(&self, key: &Key) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn conflict<'k>(&self, reads: &'k HashMap<Key, u64>) -> Option<&'k Key> {
        reads
            .iter()
            .find(|(key, version)| self.version(key) != **version)
            .map(|(key, _)| key)
    }

    /// Timestamps never go backwards within the store.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn bump(&mut self, key: Key, undo: &mut Vec<Undo>) {
        let previous = self.versions.get(&key).copied();
        self.versions.insert(key.clone(), previous.unwrap_or(0) + 1);
        undo.push(Undo::Version(key, previous));
    }

    fn apply_one(
        &mut self,
        write: Write,
        now: DateTime<Utc>,
        undo: &mut Vec<Undo>,
    ) -> Result<(), StoreError> {
        match write {
            Write::Transaction(id, new) => {
                self.bump(Key::Party(new.from_uid.clone()), undo);
                if new.to_uid != new.from_uid {
                    self.bump(Key::Party(new.to_uid.clone()), undo);
                }
                self.transactions.push(Transaction {
                    id,
                    kind: new.kind,
                    amount: new.amount,
                    from_uid: new.from_uid,
                    to_uid: new.to_uid,
                    dealer_id: new.dealer_id,
                    reason: new.reason,
                    created_at: now,
                });
                undo.push(Undo::PopTransaction);
            }
            Write::Slip(id, new) => {
                self.bump(Key::Slip(id), undo);
                self.slips.insert(id, Slip::from_new(id, new, now));
                self.slip_order.push(id);
                undo.push(Undo::RemoveSlip(id));
            }
            Write::SlipStatus(id, status) => {
                let slip = self
                    .slips
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::Io(format!("slip {id} vanished during commit")))?;
                let previous = Box::new(slip.clone());
                slip.status = status;
                slip.settled_at = Some(now);
                undo.push(Undo::RestoreSlip(previous));
                self.bump(Key::Slip(id), undo);
            }
            Write::User(uid, user) => {
                let previous = self.users.insert(uid.clone(), user);
                undo.push(Undo::RestoreUser(uid.clone(), previous));
                self.bump(Key::User(uid), undo);
            }
        }
        Ok(())
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::PopTransaction => {
                    self.transactions.pop();
                }
                Undo::RemoveSlip(id) => {
                    self.slips.remove(&id);
                    self.slip_order.retain(|s| *s != id);
                }
                Undo::RestoreSlip(slip) => {
                    self.slips.insert(slip.id, *slip);
                }
                Undo::RestoreUser(uid, Some(user)) => {
                    self.users.insert(uid, user);
                }
                Undo::RestoreUser(uid, None) => {
                    self.users.remove(&uid);
                }
                Undo::Version(key, Some(version)) => {
                    self.versions.insert(key, version);
                }
                Undo::Version(key, None) => {
                    self.versions.remove(&key);
                }
            }
        }
    }

    /// Apply every write or none of them.
    fn commit(&mut self, writes: Vec<Write>) -> Result<(), StoreError> {
        // an armed fault waits for a commit with enough writes to trip it
        let fault = match self.fault {
            Some(after) if after <= writes.len() => self.fault.take(),
            _ => None,
        };
        let injected = |applied: usize| {
            StoreError::Io(format!("injected commit fault after {applied} writes"))
        };
        if fault == Some(0) {
            return Err(injected(0));
        }

        let now = self.next_timestamp();
        let mut undo = Vec::new();
        for (idx, write) in writes.into_iter().enumerate() {
            if let Err(e) = self.apply_one(write, now, &mut undo) {
                self.rollback(undo);
                return Err(e);
            }
            let applied = idx + 1;
            if fault == Some(applied) {
                self.rollback(undo);
                return Err(injected(applied));
            }
        }
        Ok(())
    }
}

/// The shared store. Cheap to share behind an `Arc`.
pub struct Database {
    state: RwLock<Collections>,
    max_attempts: u32,
}

impl Database {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: RwLock::new(Collections::default()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Run `read` against a consistent snapshot.
    pub async fn read<T>(&self, read: impl FnOnce(&Snapshot<'_>) -> T) -> T {
        let state = self.state.read().await;
        read(&Snapshot { state: &state })
    }

    /// Run `body` as an optimistic transaction.
    ///
    /// `body` may run several times; it must only stage writes through the
    /// [`Txn`] it is given. An `Err` from `body` aborts without writing.
    pub async fn transaction<T, E, F>(&self, op: &'static str, mut body: F) -> Result<T, E>
    where
        F: FnMut(&mut Txn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        for attempt in 1..=self.max_attempts {
            let (value, reads, writes) = {
                let state = self.state.read().await;
                let mut txn = Txn::new(&state);
                let value = body(&mut txn)?;
                let (reads, writes) = txn.into_parts();
                (value, reads, writes)
            };

            if writes.is_empty() {
                return Ok(value);
            }

            let mut state = self.state.write().await;
            if let Some(key) = state.conflict(&reads) {
                warn!(op, attempt, key = ?key, "commit conflict, retrying");
                drop(state);
                tokio::task::yield_now().await;
                continue;
            }
            if let Err(e) = state.commit(writes) {
                error!(op, attempt, error = %e, "commit failed, rolled back");
                return Err(e.into());
            }
            return Ok(value);
        }

        error!(op, attempts = self.max_attempts, "commit retries exhausted");
        Err(StoreError::RetriesExhausted {
            op,
            attempts: self.max_attempts,
        }
        .into())
    }

    /// Make the next commit with at least `after_writes` writes fail once
    /// that many have been applied. Smaller commits leave the fault armed.
    /// The failed commit is rolled back like any other.
    pub async fn fail_next_commit_after(&self, after_writes: usize) {
        self.state.write().await.fault = Some(after_writes);
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(crate::config::EngineConfig::default().max_commit_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{Role, TransactionType};

    fn credit(to: &str, amount: i64) -> NewTransaction {
        NewTransaction {
            kind: TransactionType::Credit,
            amount: Amount::whole(amount),
            from_uid: Uid::from("D1"),
            to_uid: Uid::from(to),
            dealer_id: DealerId::from("D1"),
            reason: "deposit".to_string(),
        }
    }

    async fn append(db: &Database, tx: NewTransaction) -> TransactionId {
        db.transaction("test.append", |txn| {
            Ok::<_, StoreError>(txn.append(tx.clone()))
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn append_assigns_non_decreasing_timestamps() {
        let db = Database::default();
        for i in 0..20 {
            append(&db, credit("u1", i + 1)).await;
        }

        let page = db
            .read(|s| s.transactions(&TransactionFilter::new()))
            .await;
        assert_eq!(page.items.len(), 20);
        assert!(page.is_last());
        // newest first
        for pair in page.items.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        assert_eq!(page.items[0].amount, Amount::whole(20));
    }

    #[tokio::test]
    async fn cursor_continues_with_older_records() {
        let db = Database::default();
        for i in 1..=5 {
            append(&db, credit("u1", i)).await;
        }

        let first = db
            .read(|s| s.transactions(&TransactionFilter::new().limit(2)))
            .await;
        let amounts: Vec<_> = first.items.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![Amount::whole(5), Amount::whole(4)]);
        let cursor = first.next.unwrap();

        let second = db
            .read(|s| s.transactions(&TransactionFilter::new().limit(2).after(cursor)))
            .await;
        let amounts: Vec<_> = second.items.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![Amount::whole(3), Amount::whole(2)]);

        let third = db
            .read(|s| {
                s.transactions(&TransactionFilter::new().limit(2).after(second.next.unwrap()))
            })
            .await;
        assert_eq!(third.items.len(), 1);
        assert!(third.is_last());
    }

    #[tokio::test]
    async fn exact_limit_has_no_next_page() {
        let db = Database::default();
        append(&db, credit("u1", 1)).await;
        append(&db, credit("u1", 2)).await;

        let page = db
            .read(|s| s.transactions(&TransactionFilter::new().limit(2)))
            .await;
        assert_eq!(page.items.len(), 2);
        assert!(page.is_last());
    }

    #[tokio::test]
    async fn aborted_body_writes_nothing() {
        let db = Database::default();
        let result: Result<(), StoreError> = db
            .transaction("test.abort", |txn| {
                txn.append(credit("u1", 10));
                Err(StoreError::Io("nope".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(db.read(|s| s.transaction_count()).await, 0);
    }

    #[tokio::test]
    async fn injected_fault_rolls_back_every_write() {
        let db = Database::default();
        db.fail_next_commit_after(1).await;

        let result = db
            .transaction("test.fault", |txn| {
                txn.append(credit("u1", 10));
                txn.put_user(Uid::from("u1"), User::new(Role::User, None));
                Ok::<_, StoreError>(())
            })
            .await;

        assert!(matches!(result, Err(StoreError::Io(_))));
        db.read(|s| {
            assert_eq!(s.transaction_count(), 0);
            assert!(s.user(&Uid::from("u1")).is_none());
        })
        .await;

        // the fault is one-shot
        append(&db, credit("u1", 10)).await;
        assert_eq!(db.read(|s| s.transaction_count()).await, 1);
    }

    #[test]
    fn write_to_observed_party_is_a_conflict() {
        let mut state = Collections::default();

        let (reads, _) = {
            let mut txn = Txn::new(&state);
            txn.transactions(&TransactionFilter::for_uid(Uid::from("u1")));
            txn.append(credit("u1", 1));
            txn.into_parts()
        };
        assert!(state.conflict(&reads).is_none());

        // another writer lands first
        state
            .commit(vec![Write::Transaction(
                TransactionId::generate(),
                credit("u1", 5),
            )])
            .unwrap();
        assert_eq!(state.conflict(&reads), Some(&Key::Party(Uid::from("u1"))));
    }

    #[test]
    fn unrelated_party_does_not_conflict() {
        let mut state = Collections::default();

        let (reads, _) = {
            let mut txn = Txn::new(&state);
            txn.transactions(&TransactionFilter::for_uid(Uid::from("u1")));
            txn.into_parts()
        };
        state
            .commit(vec![Write::Transaction(
                TransactionId::generate(),
                credit("u2", 5),
            )])
            .unwrap();
        assert!(state.conflict(&reads).is_none());
    }

    #[test]
    fn fault_stays_armed_until_a_commit_is_large_enough() {
        let mut state = Collections::default();
        state.fault = Some(2);

        state
            .commit(vec![Write::Transaction(
                TransactionId::generate(),
                credit("u1", 1),
            )])
            .unwrap();
        assert_eq!(state.fault, Some(2));
        assert_eq!(state.transactions.len(), 1);

        let result = state.commit(vec![
            Write::Transaction(TransactionId::generate(), credit("u1", 2)),
            Write::Transaction(TransactionId::generate(), credit("u1", 3)),
        ]);
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(state.fault, None);
        assert_eq!(state.transactions.len(), 1);
    }

    #[test]
    fn user_record_and_ledger_are_tracked_apart() {
        let mut state = Collections::default();
        let u1 = Uid::from("u1");
        state
            .commit(vec![Write::User(u1.clone(), User::new(Role::User, None))])
            .unwrap();

        let (reads, _) = {
            let mut txn = Txn::new(&state);
            assert!(txn.user(&u1).is_some());
            txn.into_parts()
        };

        // a ledger write for u1 leaves the user record alone
        state
            .commit(vec![Write::Transaction(
                TransactionId::generate(),
                credit("u1", 5),
            )])
            .unwrap();
        assert!(state.conflict(&reads).is_none());

        // rewriting the record does not
        state
            .commit(vec![Write::User(u1.clone(), User::new(Role::User, None))])
            .unwrap();
        assert_eq!(state.conflict(&reads), Some(&Key::User(u1)));
    }

    #[test]
    fn rollback_restores_versions() {
        let mut state = Collections::default();
        state.fault = Some(2);
        let result = state.commit(vec![
            Write::Transaction(TransactionId::generate(), credit("u1", 1)),
            Write::Transaction(TransactionId::generate(), credit("u1", 2)),
        ]);
        assert!(result.is_err());
        assert!(state.transactions.is_empty());
        assert_eq!(state.version(&Key::Party(Uid::from("u1"))), 0);
        assert_eq!(state.version(&Key::Party(Uid::from("D1"))), 0);
    }

    #[tokio::test]
    async fn read_only_body_commits_nothing() {
        let db = Database::default();
        append(&db, credit("u1", 3)).await;
        let count = db
            .transaction("test.read", |txn| {
                Ok::<_, StoreError>(
                    txn.transactions(&TransactionFilter::for_uid(Uid::from("u1")))
                        .items
                        .len(),
                )
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(db.read(|s| s.transaction_count()).await, 1);
    }
}

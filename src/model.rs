//! Core domain types for the ledger and bet slips.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Amount, Odds};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of a ledger party (user, dealer or superadmin account).
    Uid
);

string_id!(
    /// Dealer scope identifier.
    DealerId
);

impl From<&DealerId> for Uid {
    /// The dealer's own ledger account shares the dealer scope identifier.
    fn from(dealer: &DealerId) -> Self {
        Uid(dealer.0.clone())
    }
}

/// Ledger transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

/// Slip identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlipId(pub Uuid);

impl TransactionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl SlipId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for SlipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Kind of fund movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Funds flow `from_uid -> to_uid`.
    Credit,
    /// Funds leave `from_uid`.
    Debit,
    Adjustment,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
            TransactionType::Adjustment => "adjustment",
        })
    }
}

/// A transaction waiting to be appended; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionType,
    pub amount: Amount,
    pub from_uid: Uid,
    pub to_uid: Uid,
    pub dealer_id: DealerId,
    pub reason: String,
}

/// An immutable ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: Amount,
    pub from_uid: Uid,
    pub to_uid: Uid,
    pub dealer_id: DealerId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a slip. Created `Pending`; everything else is set by settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlipStatus {
    Pending,
    Placed,
    Won,
    Lost,
    Cancelled,
}

impl SlipStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SlipStatus::Won | SlipStatus::Lost | SlipStatus::Cancelled)
    }

    /// Whether settlement may move a slip from `self` to `next`.
    pub fn can_transition_to(self, next: SlipStatus) -> bool {
        match (self, next) {
            (SlipStatus::Pending, SlipStatus::Pending) => false,
            (SlipStatus::Pending, _) => true,
            (SlipStatus::Placed, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// One selection on a slip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlipLine {
    pub fixture_id: u64,
    pub market: String,
    pub selection: String,
    pub odds: Odds,
}

impl SlipLine {
    /// Key used in the odds snapshot: `fixtureId-market-selection`.
    pub fn snapshot_key(&self) -> String {
        format!("{}-{}-{}", self.fixture_id, self.market, self.selection)
    }
}

/// Odds in effect at placement time, keyed by [`SlipLine::snapshot_key`].
pub type OddsSnapshot = BTreeMap<String, Odds>;

/// A slip waiting to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlip {
    pub user_id: Uid,
    pub dealer_id: DealerId,
    pub stake: Amount,
    pub lines: Vec<SlipLine>,
    pub potential_return: Amount,
    pub odds_snapshot: OddsSnapshot,
}

/// A placed bet.
///
/// Fields are read-only outside the crate: after creation only the store's
/// settlement path may touch `status` and `settled_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slip {
    pub(crate) id: SlipId,
    pub(crate) user_id: Uid,
    pub(crate) dealer_id: DealerId,
    pub(crate) status: SlipStatus,
    pub(crate) stake: Amount,
    pub(crate) potential_return: Amount,
    pub(crate) lines: Vec<SlipLine>,
    pub(crate) odds_snapshot: OddsSnapshot,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) settled_at: Option<DateTime<Utc>>,
}

impl Slip {
    pub(crate) fn from_new(id: SlipId, new: NewSlip, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            dealer_id: new.dealer_id,
            status: SlipStatus::Pending,
            stake: new.stake,
            potential_return: new.potential_return,
            lines: new.lines,
            odds_snapshot: new.odds_snapshot,
            created_at,
            settled_at: None,
        }
    }

    pub fn id(&self) -> SlipId {
        self.id
    }

    pub fn user_id(&self) -> &Uid {
        &self.user_id
    }

    pub fn dealer_id(&self) -> &DealerId {
        &self.dealer_id
    }

    pub fn status(&self) -> SlipStatus {
        self.status
    }

    pub fn stake(&self) -> Amount {
        self.stake
    }

    pub fn potential_return(&self) -> Amount {
        self.potential_return
    }

    pub fn lines(&self) -> &[SlipLine] {
        &self.lines
    }

    pub fn odds_snapshot(&self) -> &OddsSnapshot {
        &self.odds_snapshot
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn settled_at(&self) -> Option<DateTime<Utc>> {
        self.settled_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Dealer,
    Superadmin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Banned,
}

/// Entry of the `users` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub role: Role,
    pub dealer_id: Option<DealerId>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(role: Role, dealer_id: Option<DealerId>) -> Self {
        Self {
            role,
            dealer_id,
            status: UserStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Resolved caller identity, as issued by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uid,
    pub role: Role,
    pub dealer_id: Option<DealerId>,
}

impl Identity {
    pub fn user(uid: impl Into<String>) -> Self {
        Self {
            uid: Uid::new(uid),
            role: Role::User,
            dealer_id: None,
        }
    }

    pub fn dealer(uid: impl Into<String>, dealer_id: impl Into<String>) -> Self {
        Self {
            uid: Uid::new(uid),
            role: Role::Dealer,
            dealer_id: Some(DealerId::new(dealer_id)),
        }
    }

    pub fn superadmin(uid: impl Into<String>) -> Self {
        Self {
            uid: Uid::new(uid),
            role: Role::Superadmin,
            dealer_id: None,
        }
    }
}

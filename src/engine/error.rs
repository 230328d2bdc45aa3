//! Error types for fund movements and slip placement.

use thiserror::Error;

use crate::Amount;
use crate::balance::BalanceOverflow;
use crate::model::{DealerId, Role, SlipId, SlipStatus, Uid};
use crate::store::StoreError;

/// Top-level error returned by [`Sportsbook`](super::Sportsbook) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no authenticated caller")]
    Unauthorized,

    #[error("access denied: {0}")]
    AccessDenied(#[from] Denial),

    #[error("user {0} not found")]
    NotFound(Uid),

    #[error("insufficient balance for {uid}: balance {balance}, stake {stake}")]
    InsufficientBalance {
        uid: Uid,
        balance: Amount,
        stake: Amount,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] InvalidArgument),

    #[error("slip {0} not found")]
    SlipNotFound(SlipId),

    #[error("slip {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: SlipId,
        from: SlipStatus,
        to: SlipStatus,
    },

    /// The ledger for a user no longer replays to a representable balance.
    #[error("ledger inconsistency: {0}")]
    BalanceOverflow(#[from] BalanceOverflow),

    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),
}

impl EngineError {
    /// Only store failures may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreFailure(_))
    }
}

/// Why an authenticated caller was turned away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Denial {
    #[error("role {0:?} may not perform this operation")]
    Role(Role),

    #[error("dealer caller has no dealer scope")]
    MissingScope,

    #[error("dealer scope {caller} cannot act for dealer {requested}")]
    DealerScope {
        caller: DealerId,
        requested: DealerId,
    },

    #[error("caller {caller} cannot act as {requested}")]
    ActingAs { caller: Uid, requested: Uid },

    #[error("user {uid} belongs to another dealer")]
    ForeignUser { uid: Uid },

    #[error("caller {caller} cannot place slips for {target}")]
    OtherUser { caller: Uid, target: Uid },

    #[error("user {0} is banned")]
    Banned(Uid),
}

/// Request rejected before touching the store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidArgument {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("stake must be positive, got {0}")]
    NonPositiveStake(Amount),

    #[error("slip has no lines")]
    NoLines,

    #[error("line {index} has non-positive odds")]
    NonPositiveOdds { index: usize },

    #[error("potential return overflows")]
    ReturnOverflow,
}

//! Wallet and bet-slip engine.
//!
//! Only two paths write to the ledger:
//! - fund movements (credit/debit) by dealers and superadmins, scoped by
//!   role and dealer
//! - stake debits from slip placement, which check the balance and write the
//!   debit together with the slip in one optimistic transaction
//!
//! Balances are never stored; they are replayed from the ledger.

use std::fmt;
use std::sync::Arc;

use tokio_stream::{Stream, StreamExt};
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::ledger::Ledger;
use crate::model::{
    DealerId, Identity, NewTransaction, Role, Slip, SlipId, SlipLine, SlipStatus, Transaction,
    TransactionId, TransactionType, Uid, User, UserStatus,
};
use crate::slips::{self, SlipStore};
use crate::store::{Database, Page, TransactionFilter};
use crate::{Amount, balance};

mod error;
pub use error::{Denial, EngineError, InvalidArgument};

mod state;
pub use state::AccountBalance;

/// Reason recorded on the stake debit written by slip placement.
pub const SLIP_DEBIT_REASON: &str = "slip creation";

/// Credit or debit request from a dealer or superadmin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundMovement {
    pub target_uid: Uid,
    pub dealer_id: DealerId,
    pub amount: Amount,
    pub reason: String,
    /// Ledger party on the other side of the movement; defaults to the caller.
    pub acting_uid: Option<Uid>,
}

/// Bet placement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceSlip {
    pub target_uid: Uid,
    pub dealer_id: DealerId,
    pub stake: Amount,
    pub lines: Vec<SlipLine>,
}

/// The wallet and slip service.
///
/// Cloning is cheap; clones share the same store.
#[derive(Clone)]
pub struct Sportsbook {
    db: Arc<Database>,
    ledger: Ledger,
    slips: SlipStore,
    config: EngineConfig,
}

/// Public API
impl Sportsbook {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let db = Arc::new(Database::new(config.max_commit_attempts));
        Self {
            ledger: Ledger::new(db.clone(), config.replay_page_size),
            slips: SlipStore::new(db.clone()),
            db,
            config,
        }
    }

    /// Read access to the ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Make the next store commit fail after `after_writes` writes.
    pub async fn fail_next_commit_after(&self, after_writes: usize) {
        self.db.fail_next_commit_after(after_writes).await;
    }

    /// Create or replace an entry in the users collection.
    pub async fn register_user(&self, uid: Uid, user: User) -> Result<(), EngineError> {
        self.db
            .transaction("users.put", |txn| {
                txn.put_user(uid.clone(), user.clone());
                Ok::<_, EngineError>(())
            })
            .await
            .inspect_err(|e| error!(uid = %uid, error = %e, "user registration failed"))
    }

    pub async fn set_user_status(&self, uid: &Uid, status: UserStatus) -> Result<(), EngineError> {
        self.db
            .transaction("users.status", |txn| -> Result<(), EngineError> {
                let mut user = txn
                    .user(uid)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(uid.clone()))?;
                user.status = status;
                txn.put_user(uid.clone(), user);
                Ok(())
            })
            .await?;
        info!(uid = %uid, status = ?status, "user status changed");
        Ok(())
    }

    pub async fn get_user(&self, uid: &Uid) -> Option<User> {
        self.db.read(|s| s.user(uid).cloned()).await
    }

    /// Move funds from the acting party to the target user.
    pub async fn credit_user(
        &self,
        caller: Option<&Identity>,
        request: FundMovement,
    ) -> Result<TransactionId, EngineError> {
        let result = self
            .move_funds(TransactionType::Credit, caller, &request)
            .await;
        Self::log_result("credit", &request.target_uid, request.amount, &result);
        result
    }

    /// Move funds from the target user to the acting party.
    ///
    /// No balance check: this is the administrative correction path and may
    /// take a user below zero.
    pub async fn debit_user(
        &self,
        caller: Option<&Identity>,
        request: FundMovement,
    ) -> Result<TransactionId, EngineError> {
        let result = self
            .move_funds(TransactionType::Debit, caller, &request)
            .await;
        Self::log_result("debit", &request.target_uid, request.amount, &result);
        result
    }

    /// Place a bet: reserve the stake and record the slip atomically.
    pub async fn create_slip(
        &self,
        caller: Option<&Identity>,
        request: PlaceSlip,
    ) -> Result<SlipId, EngineError> {
        let result = self.place_slip(caller, &request).await;
        Self::log_result("slip", &request.target_uid, request.stake, &result);
        result
    }

    pub async fn list_user_slips(&self, uid: &Uid) -> Vec<Slip> {
        self.slips.list_by_user(uid).await
    }

    pub async fn list_dealer_slips(&self, dealer_id: &DealerId) -> Vec<Slip> {
        self.slips.list_by_dealer(dealer_id).await
    }

    pub async fn get_slip(&self, id: SlipId) -> Option<Slip> {
        self.slips.get(id).await
    }

    /// Administrative ledger read; superadmin only.
    pub async fn list_all_transactions(
        &self,
        caller: Option<&Identity>,
        filter: &TransactionFilter,
    ) -> Result<Page<Transaction>, EngineError> {
        Self::require_superadmin(caller)?;
        Ok(self.ledger.query(filter).await)
    }

    /// Replayed balance of `uid`.
    pub async fn balance(&self, uid: &Uid) -> Result<Amount, EngineError> {
        Ok(self.ledger.balance(uid).await?)
    }

    /// Settlement hook: only the slip status changes. Superadmin only.
    pub async fn settle_slip(
        &self,
        caller: Option<&Identity>,
        id: SlipId,
        status: SlipStatus,
    ) -> Result<Slip, EngineError> {
        Self::require_superadmin(caller)?;
        self.slips.settle(id, status).await
    }

    /// Replayed balance of every party on the ledger, sorted by uid.
    pub async fn accounts(&self) -> Result<Vec<AccountBalance>, EngineError> {
        let mut accounts = Vec::new();
        for uid in self.ledger.parties().await {
            let balance = self.ledger.balance(&uid).await?;
            accounts.push(AccountBalance { uid, balance });
        }
        Ok(accounts)
    }

    /// Load a ledger export into this instance for reconciliation. Rows are
    /// appended as-is; none of the service checks apply, so this belongs on a
    /// scratch instance only.
    pub async fn restore(
        &self,
        mut stream: impl Stream<Item = NewTransaction> + Unpin,
    ) -> Result<usize, EngineError> {
        let mut restored = 0;
        while let Some(tx) = stream.next().await {
            self.ledger.append(tx).await?;
            restored += 1;
        }
        Ok(restored)
    }
}

/// Private API
impl Sportsbook {
    /// Small helper to log the outcome of a public write
    fn log_result<T: fmt::Display>(
        op: &str,
        uid: &Uid,
        amount: Amount,
        result: &Result<T, EngineError>,
    ) {
        match result {
            Ok(id) => info!(uid = %uid, amount = %amount, id = %id, "{op} applied"),
            Err(e @ (EngineError::StoreFailure(_) | EngineError::BalanceOverflow(_))) => {
                error!(uid = %uid, amount = %amount, error = %e, "{op} failed")
            }
            Err(e) => info!(uid = %uid, amount = %amount, reason = %e, "{op} rejected"),
        }
    }

    fn require_superadmin(caller: Option<&Identity>) -> Result<(), EngineError> {
        let caller = caller.ok_or(EngineError::Unauthorized)?;
        if caller.role != Role::Superadmin {
            return Err(Denial::Role(caller.role).into());
        }
        Ok(())
    }

    /// Shared credit/debit path:
    /// - caller must be authenticated
    /// - caller must be a dealer or superadmin
    /// - a dealer may only act in their own scope and as themself
    /// - target user must exist
    /// - a dealer may only touch their own users
    /// - amount must be positive
    async fn move_funds(
        &self,
        kind: TransactionType,
        caller: Option<&Identity>,
        request: &FundMovement,
    ) -> Result<TransactionId, EngineError> {
        let caller = caller.ok_or(EngineError::Unauthorized)?;

        let scope = match caller.role {
            Role::Superadmin => None,
            Role::Dealer => {
                let own = caller.dealer_id.as_ref().ok_or(Denial::MissingScope)?;
                if own != &request.dealer_id {
                    return Err(Denial::DealerScope {
                        caller: own.clone(),
                        requested: request.dealer_id.clone(),
                    }
                    .into());
                }
                if let Some(acting) = &request.acting_uid {
                    if acting != &caller.uid {
                        return Err(Denial::ActingAs {
                            caller: caller.uid.clone(),
                            requested: acting.clone(),
                        }
                        .into());
                    }
                }
                Some(own)
            }
            role => return Err(Denial::Role(role).into()),
        };

        let acting = request
            .acting_uid
            .clone()
            .unwrap_or_else(|| caller.uid.clone());
        let (from_uid, to_uid) = match kind {
            TransactionType::Debit => (request.target_uid.clone(), acting),
            _ => (acting, request.target_uid.clone()),
        };

        // The target's record is read inside the transaction so a concurrent
        // move to another dealer forces a re-check. Only the user record is
        // observed, not their ledger, so unrelated ledger writes never
        // conflict with this append.
        let op = match kind {
            TransactionType::Debit => "ledger.debit",
            _ => "ledger.credit",
        };
        self.db
            .transaction(op, |txn| -> Result<TransactionId, EngineError> {
                let target = txn
                    .user(&request.target_uid)
                    .ok_or_else(|| EngineError::NotFound(request.target_uid.clone()))?;

                if let Some(own) = scope {
                    if target.dealer_id.as_ref() != Some(own) {
                        return Err(Denial::ForeignUser {
                            uid: request.target_uid.clone(),
                        }
                        .into());
                    }
                }

                if !request.amount.is_positive() {
                    return Err(InvalidArgument::NonPositiveAmount(request.amount).into());
                }

                Ok(txn.append(NewTransaction {
                    kind,
                    amount: request.amount,
                    from_uid: from_uid.clone(),
                    to_uid: to_uid.clone(),
                    dealer_id: request.dealer_id.clone(),
                    reason: request.reason.clone(),
                }))
            })
            .await
    }

    /// Placement runs entirely inside one optimistic transaction:
    /// - caller must be authenticated, be the target user, and hold the user role
    /// - target must exist, be active, and belong to the requested dealer
    /// - stake and odds must be positive
    /// - replayed balance must cover the stake
    /// - stake debit and slip are staged together
    ///
    /// The ledger read puts the user in the read set, so a concurrent write to
    /// the same user forces a re-run against the new balance.
    async fn place_slip(
        &self,
        caller: Option<&Identity>,
        request: &PlaceSlip,
    ) -> Result<SlipId, EngineError> {
        let caller = caller.ok_or(EngineError::Unauthorized)?;
        if caller.uid != request.target_uid {
            return Err(Denial::OtherUser {
                caller: caller.uid.clone(),
                target: request.target_uid.clone(),
            }
            .into());
        }
        if caller.role != Role::User {
            return Err(Denial::Role(caller.role).into());
        }

        let uid = &request.target_uid;
        let page_size = self.config.replay_page_size;
        let mut attempts = 0u32;

        let slip_id = self
            .db
            .transaction("slips.place", |txn| -> Result<SlipId, EngineError> {
                attempts += 1;
                let user = txn
                    .user(uid)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(uid.clone()))?;
                if !user.is_active() {
                    return Err(Denial::Banned(uid.clone()).into());
                }
                if user.dealer_id.as_ref() != Some(&request.dealer_id) {
                    return Err(Denial::ForeignUser { uid: uid.clone() }.into());
                }

                let slip = slips::build_slip(
                    uid.clone(),
                    request.dealer_id.clone(),
                    request.stake,
                    request.lines.clone(),
                )?;

                let balance = balance::replay(uid, page_size, |filter| txn.transactions(filter))?;
                if balance < request.stake {
                    return Err(EngineError::InsufficientBalance {
                        uid: uid.clone(),
                        balance,
                        stake: request.stake,
                    });
                }

                txn.append(NewTransaction {
                    kind: TransactionType::Debit,
                    amount: request.stake,
                    from_uid: uid.clone(),
                    to_uid: Uid::from(&request.dealer_id),
                    dealer_id: request.dealer_id.clone(),
                    reason: SLIP_DEBIT_REASON.to_string(),
                });
                Ok(txn.insert_slip(slip))
            })
            .await?;

        if attempts > 1 {
            warn!(uid = %uid, attempts, "slip placement needed retries");
        }
        Ok(slip_id)
    }
}

impl Default for Sportsbook {
    fn default() -> Self {
        Self::new()
    }
}

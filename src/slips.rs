//! Bet slip construction, reads and settlement.

use std::sync::Arc;

use tracing::info;

use crate::Amount;
use crate::engine::{EngineError, InvalidArgument};
use crate::model::{DealerId, NewSlip, OddsSnapshot, Slip, SlipId, SlipLine, SlipStatus, Uid};
use crate::store::Database;

/// Validate a bet and derive its potential return and odds snapshot.
///
/// `potential_return = stake * product(odds)`, rounded at each leg.
pub fn build_slip(
    user_id: Uid,
    dealer_id: DealerId,
    stake: Amount,
    lines: Vec<SlipLine>,
) -> Result<NewSlip, InvalidArgument> {
    if !stake.is_positive() {
        return Err(InvalidArgument::NonPositiveStake(stake));
    }
    if lines.is_empty() {
        return Err(InvalidArgument::NoLines);
    }
    if let Some(index) = lines.iter().position(|line| !line.odds.is_positive()) {
        return Err(InvalidArgument::NonPositiveOdds { index });
    }

    let potential_return = lines
        .iter()
        .try_fold(stake, |acc, line| acc.checked_mul_odds(line.odds))
        .ok_or(InvalidArgument::ReturnOverflow)?;

    let odds_snapshot: OddsSnapshot = lines
        .iter()
        .map(|line| (line.snapshot_key(), line.odds))
        .collect();

    Ok(NewSlip {
        user_id,
        dealer_id,
        stake,
        lines,
        potential_return,
        odds_snapshot,
    })
}

/// Read side of the slips collection plus the status-only settlement path.
#[derive(Clone)]
pub struct SlipStore {
    db: Arc<Database>,
}

impl SlipStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: SlipId) -> Option<Slip> {
        self.db.read(|s| s.slip(id).cloned()).await
    }

    /// Slips of one user, newest first.
    pub async fn list_by_user(&self, uid: &Uid) -> Vec<Slip> {
        self.db.read(|s| s.slips_for_user(uid)).await
    }

    /// Slips under one dealer scope, newest first.
    pub async fn list_by_dealer(&self, dealer_id: &DealerId) -> Vec<Slip> {
        self.db.read(|s| s.slips_for_dealer(dealer_id)).await
    }

    /// Move a slip to `status`. Nothing but the status and settlement time
    /// changes.
    pub async fn settle(&self, id: SlipId, status: SlipStatus) -> Result<Slip, EngineError> {
        let from = self
            .db
            .transaction("slips.settle", |txn| -> Result<SlipStatus, EngineError> {
                let current = txn
                    .slip(id)
                    .map(Slip::status)
                    .ok_or(EngineError::SlipNotFound(id))?;
                if !current.can_transition_to(status) {
                    return Err(EngineError::InvalidTransition {
                        id,
                        from: current,
                        to: status,
                    });
                }
                txn.set_slip_status(id, status);
                Ok(current)
            })
            .await?;

        info!(slip = %id, from = ?from, to = ?status, "slip settled");
        self.get(id).await.ok_or(EngineError::SlipNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Odds;
    use crate::store::StoreError;

    fn line(fixture_id: u64, selection: &str, odds: f64) -> SlipLine {
        SlipLine {
            fixture_id,
            market: "1X2".to_string(),
            selection: selection.to_string(),
            odds: Odds::from_float(odds),
        }
    }

    fn build(stake: i64, lines: Vec<SlipLine>) -> Result<NewSlip, InvalidArgument> {
        build_slip(Uid::from("u1"), DealerId::from("D1"), Amount::whole(stake), lines)
    }

    #[test]
    fn single_leg_return() {
        let slip = build(30, vec![line(1, "1", 2.0)]).unwrap();
        assert_eq!(slip.potential_return, Amount::whole(60));
        assert_eq!(slip.odds_snapshot.get("1-1X2-1"), Some(&Odds::from_float(2.0)));
    }

    #[test]
    fn multi_leg_return_multiplies_odds() {
        let slip = build(
            10,
            vec![line(1, "1", 1.5), line(2, "X", 2.0), line(3, "2", 1.8)],
        )
        .unwrap();
        assert_eq!(slip.potential_return, Amount::whole(54));
        assert_eq!(slip.odds_snapshot.len(), 3);
        assert_eq!(slip.lines.len(), 3);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            build(0, vec![line(1, "1", 2.0)]),
            Err(InvalidArgument::NonPositiveStake(Amount::ZERO))
        );
        assert_eq!(build(10, vec![]), Err(InvalidArgument::NoLines));
        assert_eq!(
            build(10, vec![line(1, "1", 2.0), line(2, "1", 0.0)]),
            Err(InvalidArgument::NonPositiveOdds { index: 1 })
        );
    }

    #[test]
    fn overflowing_return_is_rejected() {
        let slip = build_slip(
            Uid::from("u1"),
            DealerId::from("D1"),
            Amount::from_scaled(i64::MAX / 2),
            vec![line(1, "1", 1000.0)],
        );
        assert_eq!(slip, Err(InvalidArgument::ReturnOverflow));
    }

    async fn seeded() -> (SlipStore, SlipId) {
        let db = Arc::new(Database::default());
        let new = build(10, vec![line(1, "1", 2.0)]).unwrap();
        let id = db
            .transaction("test.insert", |txn| {
                Ok::<_, StoreError>(txn.insert_slip(new.clone()))
            })
            .await
            .unwrap();
        (SlipStore::new(db), id)
    }

    #[tokio::test]
    async fn inserted_slip_starts_pending() {
        let (store, id) = seeded().await;
        let slip = store.get(id).await.unwrap();
        assert_eq!(slip.status(), SlipStatus::Pending);
        assert!(slip.settled_at().is_none());
        assert_eq!(store.list_by_user(&Uid::from("u1")).await.len(), 1);
        assert_eq!(store.list_by_dealer(&DealerId::from("D1")).await.len(), 1);
        assert!(store.list_by_dealer(&DealerId::from("D2")).await.is_empty());
    }

    #[tokio::test]
    async fn settle_changes_status_only() {
        let (store, id) = seeded().await;
        let before = store.get(id).await.unwrap();

        let after = store.settle(id, SlipStatus::Won).await.unwrap();
        assert_eq!(after.status(), SlipStatus::Won);
        assert!(after.settled_at().is_some());
        assert_eq!(after.lines(), before.lines());
        assert_eq!(after.odds_snapshot(), before.odds_snapshot());
        assert_eq!(after.stake(), before.stake());
        assert_eq!(after.user_id(), before.user_id());
        assert_eq!(after.created_at(), before.created_at());
    }

    #[tokio::test]
    async fn settled_slip_cannot_move_again() {
        let (store, id) = seeded().await;
        store.settle(id, SlipStatus::Lost).await.unwrap();
        let err = store.settle(id, SlipStatus::Won).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                id,
                from: SlipStatus::Lost,
                to: SlipStatus::Won,
            }
        );
    }

    #[tokio::test]
    async fn unknown_slip_is_not_found() {
        let (store, _) = seeded().await;
        let missing = SlipId(uuid::Uuid::new_v4());
        assert_eq!(
            store.settle(missing, SlipStatus::Won).await.unwrap_err(),
            EngineError::SlipNotFound(missing)
        );
    }
}

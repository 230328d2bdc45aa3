use crate::Amount;
use crate::model::Uid;

/// A party's replayed balance, as reported by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBalance {
    pub uid: Uid,
    pub balance: Amount,
}

impl AccountBalance {
    /// A negative replayed balance can only come from a bug elsewhere.
    pub fn is_overdrawn(&self) -> bool {
        self.balance.is_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overdrawn_only_below_zero() {
        let account = |scaled| AccountBalance {
            uid: Uid::from("u1"),
            balance: Amount::from_scaled(scaled),
        };
        assert!(!account(0).is_overdrawn());
        assert!(!account(1).is_overdrawn());
        assert!(account(-1).is_overdrawn());
    }
}

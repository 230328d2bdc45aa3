pub mod amount;
pub mod balance;
pub mod config;
pub mod csv;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod slips;
pub mod store;

pub use amount::{Amount, Odds};
pub use balance::{BalanceOverflow, compute_balance};
pub use config::EngineConfig;
pub use engine::{EngineError, FundMovement, PlaceSlip, Sportsbook};
pub use model::{
    DealerId, Identity, Role, Slip, SlipId, SlipLine, SlipStatus, Transaction, TransactionId,
    TransactionType, Uid, User, UserStatus,
};
pub use store::{Cursor, Page, TransactionFilter};

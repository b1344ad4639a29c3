pub mod types;
pub mod grid;
pub mod multiplier;
pub mod round;
pub mod settlement;

pub use types::*;
pub use grid::{Board, MinefieldGenerator, RandomMinefieldGenerator};
pub use multiplier::MultiplierCalculator;
pub use round::{CashOut, RevealOutcome, Round};
pub use settlement::{PendingCredit, ReconcileReport, SettlementCoordinator};

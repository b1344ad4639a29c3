//! Error types for the Mines game core
//!
//! Every failure a caller can observe maps onto one variant of [`MinesError`].
//! Store and settlement failures keep their own enums so the coordinator can
//! tell a failed debit (round never starts) from an unresolved credit
//! (winnings owed, must be reconciled).

use crate::games::types::Credits;
use thiserror::Error;

/// Root error type for all game operations
#[derive(Debug, Error)]
pub enum MinesError {
    /// Stake or mine count rejected before any mutation
    #[error("Invalid bet: {0}")]
    InvalidBet(String),

    /// Balance below the stake at round start
    #[error("Insufficient funds: stake {required} exceeds balance {available}")]
    InsufficientFunds { required: Credits, available: Credits },

    /// Reveal/cash-out not legal in the current round state
    #[error("Illegal move: {0}")]
    IllegalMove(String),

    /// No account could be resolved for the caller
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Board parameters outside the supported range
    #[error("Invalid board configuration: {0}")]
    InvalidConfiguration(String),

    /// Account store failure outside of settlement (reads, account opening)
    #[error("Account store error: {0}")]
    Store(StoreError),

    /// Account store rejected or could not apply a balance mutation
    #[error("Settlement failure: {0}")]
    Settlement(#[from] SettlementError),

    /// Configuration loading/validation errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Account store errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Credits, available: Credits },

    #[error("Account store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupted account data: {0}")]
    Corrupted(String),
}

/// Settlement coordinator errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettlementError {
    /// Stake could not be taken; the round was never started
    #[error("Debit for round {round_id} failed: {source}")]
    DebitFailed {
        round_id: String,
        #[source]
        source: StoreError,
    },

    /// Winnings are owed but every credit attempt failed. The credit stays
    /// queued and must be reconciled.
    #[error("Credit of {amount} for round {round_id} unresolved after {attempts} attempts: {last_error}")]
    CreditUnresolved {
        round_id: String,
        amount: Credits,
        attempts: u32,
        last_error: StoreError,
    },

    #[error("Invalid settlement amount: {0}")]
    InvalidAmount(Credits),

    /// The background settlement task panicked or was aborted
    #[error("Settlement task failed: {0}")]
    TaskFailed(String),
}

impl From<StoreError> for MinesError {
    // Balance shortfalls surface as the game-level error regardless of origin
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds {
                requested,
                available,
            } => MinesError::InsufficientFunds {
                required: requested,
                available,
            },
            other => MinesError::Store(other),
        }
    }
}

// Convenience type alias for Results
pub type MinesResult<T> = Result<T, MinesError>;

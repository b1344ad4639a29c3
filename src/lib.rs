//! Mines - minefield wagering game core
//!
//! A round hides mines on a square board. The player reveals cells one at a
//! time; each safe reveal raises the payout multiplier, a mine forfeits the
//! stake, and the player may cash out at any point after the first gem.
//! Balances live in an external account store and only ever change through
//! idempotent tagged increments.

pub mod account_store;
pub mod api;
pub mod config;
pub mod errors;
pub mod games;
pub mod identity;
pub mod mirror;
pub mod service;

pub use account_store::{AccountDocument, AccountStore, InMemoryAccountStore, Mutation, RocksAccountStore};
pub use config::{ConfigLoader, MinesConfig};
pub use errors::{MinesError, MinesResult};
pub use identity::{IdentityProvider, StaticTokenIdentity};
pub use mirror::BalanceMirror;
pub use service::MinesService;

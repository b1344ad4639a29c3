//! API Request/Response Models

use crate::games::types::{AccountId, Credits, RoundSnapshot};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pending_credits: usize,
    pub mirrored_accounts: usize,
}

/// GET /api/account/balance
///
/// Display balance. Served from the notification mirror when it has seen the
/// account, so it may trail the store briefly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account_id: AccountId,
    pub credits: Credits,
    /// False when the mirror had nothing yet and the store was read instead
    pub mirrored: bool,
}

/// POST /api/mines/rounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRoundRequest {
    pub stake: f64,
    #[serde(alias = "mines")]
    pub mine_count: u32,
}

/// POST /api/mines/rounds/current/reveal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealRequest {
    pub row: usize,
    pub col: usize,
}

/// GET /api/mines/rounds/current
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentRoundResponse {
    pub round: Option<RoundSnapshot>,
}

/// GET /api/mines/multipliers/:mines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiplierTableResponse {
    pub board_size: usize,
    pub mine_count: u32,
    pub house_edge: f64,
    /// Entry `g` is the multiplier after `g` safe reveals
    pub multipliers: Vec<f64>,
}


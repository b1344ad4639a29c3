//! Route Definitions

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/account", get(account_handler).post(open_account_handler))
        .route("/api/account/balance", get(balance_handler))
        // Round lifecycle for the authenticated caller
        .route("/api/mines/rounds", post(start_round_handler))
        .route("/api/mines/rounds/current", get(current_round_handler))
        .route("/api/mines/rounds/current/reveal", post(reveal_handler))
        .route("/api/mines/rounds/current/cashout", post(cash_out_handler))
        .route("/api/mines/multipliers/:mines", get(multiplier_table_handler))
        .with_state(state)
}

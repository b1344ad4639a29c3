//! Request Handlers
//!
//! Thin wrappers over [`MinesService`]: pull the bearer credential, call the
//! service, map its error.

use super::{
    errors::ApiError,
    middleware::{bearer_token, RequestId},
    models::*,
};
use crate::account_store::AccountDocument;
use crate::mirror::BalanceMirror;
use crate::service::{CashOutReport, MinesService, RevealReport, StartReport};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub service: Arc<MinesService>,
    pub mirror: BalanceMirror,
    pub version: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        pending_credits: state.service.pending_credits().len(),
        mirrored_accounts: state.mirror.len(),
    })
}

/// POST /api/account
pub async fn open_account_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<AccountDocument>), ApiError> {
    let doc = state
        .service
        .open_account(bearer_token(&headers))
        .await
        .map_err(|e| ApiError::from_mines(request_id.0, e))?;
    Ok((StatusCode::CREATED, Json(doc)))
}

/// GET /api/account
pub async fn account_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<AccountDocument>, ApiError> {
    state
        .service
        .account(bearer_token(&headers))
        .await
        .map(Json)
        .map_err(|e| ApiError::from_mines(request_id.0, e))
}

/// GET /api/account/balance
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BalanceResponse>, ApiError> {
    let credential = bearer_token(&headers);
    let account = state
        .service
        .caller(credential)
        .await
        .map_err(|e| ApiError::from_mines(request_id.0.clone(), e))?;

    if let Some(doc) = state.mirror.get(&account) {
        return Ok(Json(BalanceResponse {
            account_id: doc.account_id,
            credits: doc.credits,
            mirrored: true,
        }));
    }
    let doc = state
        .service
        .account(credential)
        .await
        .map_err(|e| ApiError::from_mines(request_id.0, e))?;
    Ok(Json(BalanceResponse {
        account_id: doc.account_id,
        credits: doc.credits,
        mirrored: false,
    }))
}

/// POST /api/mines/rounds
pub async fn start_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<StartRoundRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartReport>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::from_rejection(request_id.0.clone(), e))?;
    let report = state
        .service
        .start_round(bearer_token(&headers), request.stake, request.mine_count)
        .await
        .map_err(|e| ApiError::from_mines(request_id.0, e))?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// POST /api/mines/rounds/current/reveal
pub async fn reveal_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<RevealRequest>, JsonRejection>,
) -> Result<Json<RevealReport>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::from_rejection(request_id.0.clone(), e))?;
    state
        .service
        .reveal(bearer_token(&headers), request.row, request.col)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_mines(request_id.0, e))
}

/// POST /api/mines/rounds/current/cashout
pub async fn cash_out_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CashOutReport>, ApiError> {
    state
        .service
        .cash_out(bearer_token(&headers))
        .await
        .map(Json)
        .map_err(|e| ApiError::from_mines(request_id.0, e))
}

/// GET /api/mines/rounds/current
pub async fn current_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CurrentRoundResponse>, ApiError> {
    let round = state
        .service
        .current_round(bearer_token(&headers))
        .await
        .map_err(|e| ApiError::from_mines(request_id.0, e))?;
    Ok(Json(CurrentRoundResponse { round }))
}

/// GET /api/mines/multipliers/:mines
pub async fn multiplier_table_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(mine_count): Path<u32>,
) -> Result<Json<MultiplierTableResponse>, ApiError> {
    let multipliers = state
        .service
        .multiplier_table(mine_count)
        .map_err(|e| ApiError::from_mines(request_id.0, e))?;
    let game = state.service.game_config();
    Ok(Json(MultiplierTableResponse {
        board_size: game.board_size,
        mine_count,
        house_edge: game.house_edge,
        multipliers,
    }))
}

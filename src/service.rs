//! Mines service
//!
//! Entry point for every caller-facing operation. Each account has one round
//! slot guarded by an async mutex, so a round's debit finishes (or fails)
//! before any reveal for that account is looked at, and a credit is issued
//! while the slot is still held.
//!
//! Balance mutations run on spawned tasks that own the slot guard. A caller
//! that drops its request mid-settlement only stops waiting: the debit still
//! installs its round and the credit still lands or stays pending.

use crate::account_store::{AccountDocument, AccountStore};
use crate::config::{GameConfig, MinesConfig};
use crate::errors::{MinesError, MinesResult, SettlementError, StoreError};
use crate::games::grid::{MinefieldGenerator, RandomMinefieldGenerator};
use crate::games::multiplier::MultiplierCalculator;
use crate::games::round::{CashOut, RevealOutcome, Round};
use crate::games::settlement::{PendingCredit, ReconcileReport, SettlementCoordinator};
use crate::games::types::{AccountId, Coordinate, Credits, RoundId, RoundSnapshot, RoundState};
use crate::identity::IdentityProvider;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};

type RoundSlot = Arc<Mutex<Option<Round>>>;
type SlotGuard = OwnedMutexGuard<Option<Round>>;

/// Result of a successful `start_round`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartReport {
    pub balance: Credits,
    pub round: RoundSnapshot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RevealResult {
    Gem,
    Mine,
    FullClear,
}

/// Result of a legal reveal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealReport {
    pub result: RevealResult,
    /// New balance after an automatic full-clear cash-out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<Credits>,
    pub round: RoundSnapshot,
}

/// Result of a successful cash-out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOutReport {
    pub payout: Credits,
    pub balance: Credits,
    pub round: RoundSnapshot,
}

pub struct MinesService {
    game: GameConfig,
    starting_credits: Credits,
    identity: Arc<dyn IdentityProvider>,
    settlement: Arc<SettlementCoordinator>,
    generator: Arc<dyn MinefieldGenerator>,
    slots: DashMap<AccountId, RoundSlot>,
}

impl MinesService {
    pub fn new(
        config: &MinesConfig,
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            game: config.game.clone(),
            starting_credits: config.store.starting_credits,
            identity,
            settlement: Arc::new(SettlementCoordinator::new(store, config.settlement.clone())),
            generator: Arc::new(RandomMinefieldGenerator::new()),
            slots: DashMap::new(),
        }
    }

    /// Replace the minefield source
    pub fn with_generator(mut self, generator: Arc<dyn MinefieldGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn game_config(&self) -> &GameConfig {
        &self.game
    }

    pub fn settlement(&self) -> &SettlementCoordinator {
        &self.settlement
    }

    /// Account store change notifications, for display projections
    pub fn subscribe(&self) -> broadcast::Receiver<AccountDocument> {
        self.settlement.store().subscribe()
    }

    /// Resolve the caller without touching any account state
    pub async fn caller(&self, credential: Option<&str>) -> MinesResult<AccountId> {
        self.authenticate(credential).await
    }

    async fn authenticate(&self, credential: Option<&str>) -> MinesResult<AccountId> {
        self.identity
            .resolve(credential)
            .await
            .ok_or(MinesError::Unauthenticated)
    }

    fn slot(&self, account: &AccountId) -> RoundSlot {
        self.slots.entry(account.clone()).or_default().value().clone()
    }

    fn check_mine_count(&self, mine_count: u32) -> MinesResult<()> {
        let max = self.game.effective_max_mines();
        if mine_count < self.game.min_mines || mine_count > max {
            return Err(MinesError::InvalidBet(format!(
                "mine count {} outside [{}, {}]",
                mine_count, self.game.min_mines, max
            )));
        }
        Ok(())
    }

    fn validate_bet(&self, stake: f64, mine_count: u32) -> MinesResult<Credits> {
        let stake = Credits::try_from_decimal(stake)
            .ok_or_else(|| MinesError::InvalidBet(format!("stake {} is not a valid amount", stake)))?;
        if !stake.is_positive() {
            return Err(MinesError::InvalidBet(format!("stake {} must be positive", stake)));
        }
        if stake < self.game.min_stake {
            return Err(MinesError::InvalidBet(format!(
                "stake {} below minimum {}",
                stake, self.game.min_stake
            )));
        }
        if let Some(max) = self.game.max_stake {
            if stake > max {
                return Err(MinesError::InvalidBet(format!("stake {} above maximum {}", stake, max)));
            }
        }
        self.check_mine_count(mine_count)?;
        Ok(stake)
    }

    /// Create the caller's account document
    pub async fn open_account(&self, credential: Option<&str>) -> MinesResult<AccountDocument> {
        let account = self.authenticate(credential).await?;
        let doc = self
            .settlement
            .store()
            .open_account(&account, self.starting_credits)
            .await?;
        tracing::info!(%account, credits = %doc.credits, "account opened");
        Ok(doc)
    }

    /// Point read of the caller's account document
    pub async fn account(&self, credential: Option<&str>) -> MinesResult<AccountDocument> {
        let account = self.authenticate(credential).await?;
        self.settlement
            .store()
            .get(&account)
            .await?
            .ok_or_else(|| MinesError::Store(StoreError::AccountNotFound(account.to_string())))
    }

    /// Debit the stake and open a new round
    pub async fn start_round(
        &self,
        credential: Option<&str>,
        stake: f64,
        mine_count: u32,
    ) -> MinesResult<StartReport> {
        let account = self.authenticate(credential).await?;
        let stake = self.validate_bet(stake, mine_count)?;

        let mut current = self.slot(&account).lock_owned().await;
        if let Some(round) = current.as_ref() {
            if round.state() == RoundState::Playing {
                return Err(MinesError::IllegalMove(format!(
                    "round {} is still in progress",
                    round.id()
                )));
            }
        }

        let board = self.generator.generate(self.game.board_size, mine_count)?;
        let round_id = RoundId::new();
        let round = Round::begin(round_id, account.clone(), stake, board, self.game.house_edge)?;

        let settlement = self.settlement.clone();
        let task = tokio::spawn(async move {
            let doc = settlement.debit(&account, round_id, stake).await?;
            tracing::info!(%account, round = %round_id, stake = %stake, mine_count, "round started");
            let snapshot = round.snapshot();
            *current = Some(round);
            Ok::<_, SettlementError>(StartReport {
                balance: doc.credits,
                round: snapshot,
            })
        });
        joined(task).await?.map_err(debit_error)
    }

    /// Reveal one cell of the caller's active round
    pub async fn reveal(
        &self,
        credential: Option<&str>,
        row: usize,
        col: usize,
    ) -> MinesResult<RevealReport> {
        let account = self.authenticate(credential).await?;
        let mut current = self.slot(&account).lock_owned().await;
        let round = current
            .as_mut()
            .ok_or_else(|| MinesError::IllegalMove("no round in progress".to_string()))?;

        match round.reveal(Coordinate::new(row, col))? {
            RevealOutcome::Safe { .. } => Ok(RevealReport {
                result: RevealResult::Gem,
                balance: None,
                round: round.snapshot(),
            }),
            RevealOutcome::Busted { .. } => Ok(RevealReport {
                result: RevealResult::Mine,
                balance: None,
                round: round.snapshot(),
            }),
            RevealOutcome::Cleared(cash_out) => {
                let (doc, round) = self.settle(cash_out, current).await?;
                Ok(RevealReport {
                    result: RevealResult::FullClear,
                    balance: Some(doc.credits),
                    round,
                })
            }
        }
    }

    /// Bank stake × multiplier for the caller's active round
    pub async fn cash_out(&self, credential: Option<&str>) -> MinesResult<CashOutReport> {
        let account = self.authenticate(credential).await?;
        let mut current = self.slot(&account).lock_owned().await;
        let round = current
            .as_mut()
            .ok_or_else(|| MinesError::IllegalMove("no round in progress".to_string()))?;

        let cash_out = round.cash_out()?;
        let payout = cash_out.amount;
        let (doc, round) = self.settle(cash_out, current).await?;
        Ok(CashOutReport {
            payout,
            balance: doc.credits,
            round,
        })
    }

    /// Credit a concluded round on a task that holds the slot until the
    /// credit has landed or been parked.
    async fn settle(
        &self,
        cash_out: CashOut,
        current: SlotGuard,
    ) -> MinesResult<(AccountDocument, RoundSnapshot)> {
        let settlement = self.settlement.clone();
        let task = tokio::spawn(async move {
            let doc = settlement
                .credit(&cash_out.account, cash_out.round_id, cash_out.amount)
                .await?;
            let snapshot = current
                .as_ref()
                .map(Round::snapshot)
                .ok_or_else(|| SettlementError::TaskFailed("round slot emptied during settlement".to_string()))?;
            Ok::<_, SettlementError>((doc, snapshot))
        });
        Ok(joined(task).await??)
    }

    /// Caller-visible state of the caller's latest round
    pub async fn current_round(&self, credential: Option<&str>) -> MinesResult<Option<RoundSnapshot>> {
        let account = self.authenticate(credential).await?;
        let Some(slot) = self.slots.get(&account).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        let current = slot.lock().await;
        Ok(current.as_ref().map(Round::snapshot))
    }

    /// Multiplier for every reachable progress step at `mine_count`
    pub fn multiplier_table(&self, mine_count: u32) -> MinesResult<Vec<f64>> {
        self.check_mine_count(mine_count)?;
        let calculator =
            MultiplierCalculator::new(self.game.board_size, mine_count, self.game.house_edge)?;
        Ok(calculator.table())
    }

    pub fn pending_credits(&self) -> Vec<PendingCredit> {
        self.settlement.pending_credits()
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.settlement.reconcile().await
    }
}

async fn joined<T>(task: tokio::task::JoinHandle<T>) -> Result<T, SettlementError> {
    task.await.map_err(|e| SettlementError::TaskFailed(e.to_string()))
}

fn debit_error(e: SettlementError) -> MinesError {
    match e {
        SettlementError::DebitFailed {
            source: StoreError::InsufficientFunds {
                requested,
                available,
            },
            ..
        } => MinesError::InsufficientFunds {
            required: requested,
            available,
        },
        other => MinesError::Settlement(other),
    }
}

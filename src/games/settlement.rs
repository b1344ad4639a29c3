//! Settlement coordinator
//!
//! All balance mutation goes through here as a tagged delta against the
//! account store:
//! - `debit` takes the stake once per round (`<round>:debit`). Any failure is
//!   returned as-is and the round must not start.
//! - `credit` pays winnings once per round (`<round>:credit`). The credit is
//!   written to the pending ledger before the first attempt and only removed
//!   once the store confirms it, so a caller that gives up mid-retry still
//!   leaves it owed. Transient failures are retried with exponential backoff;
//!   when the budget runs out the credit stays parked and is reported as
//!   [`SettlementError::CreditUnresolved`]. `reconcile` replays parked
//!   credits; the store's op-id dedupe makes replays safe.

use crate::account_store::{AccountDocument, AccountStore, Mutation};
use crate::config::SettlementConfig;
use crate::errors::{SettlementError, StoreError};
use crate::games::types::{AccountId, Credits, RoundId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Credit owed for a concluded round that could not yet be applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCredit {
    pub round_id: RoundId,
    pub account: AccountId,
    pub amount: Credits,
    pub attempts: u32,
    /// Empty until an attempt has failed
    pub last_error: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub resolved: usize,
    pub still_pending: usize,
}

pub struct SettlementCoordinator {
    store: Arc<dyn AccountStore>,
    config: SettlementConfig,
    pending: DashMap<RoundId, PendingCredit>,
}

impl SettlementCoordinator {
    pub fn new(store: Arc<dyn AccountStore>, config: SettlementConfig) -> Self {
        Self {
            store,
            config,
            pending: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Take the stake for a round and count it as played
    pub async fn debit(
        &self,
        account: &AccountId,
        round_id: RoundId,
        amount: Credits,
    ) -> Result<AccountDocument, SettlementError> {
        if !amount.is_positive() {
            return Err(SettlementError::InvalidAmount(amount));
        }
        let mutation = Mutation::debit(round_id.debit_op(), amount);
        match self.store.increment(account, &mutation).await {
            Ok(doc) => {
                tracing::info!(%account, round = %round_id, stake = %amount, balance = %doc.credits, "stake debited");
                Ok(doc)
            }
            Err(source) => {
                tracing::warn!(%account, round = %round_id, stake = %amount, error = %source, "stake debit failed");
                Err(SettlementError::DebitFailed {
                    round_id: round_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Pay winnings for a round and count it as won. Retries until the
    /// configured budget is spent; the credit stays in the pending ledger
    /// until the store confirms it.
    pub async fn credit(
        &self,
        account: &AccountId,
        round_id: RoundId,
        amount: Credits,
    ) -> Result<AccountDocument, SettlementError> {
        if amount < Credits::ZERO {
            return Err(SettlementError::InvalidAmount(amount));
        }
        self.record(account, round_id, amount);

        let mutation = Mutation::credit(round_id.credit_op(), amount);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut last_error = StoreError::Unavailable("no attempt made".to_string());

        for attempt in 1..=self.config.max_credit_attempts {
            match self.store.increment(account, &mutation).await {
                Ok(doc) => {
                    self.pending.remove(&round_id);
                    tracing::info!(%account, round = %round_id, payout = %amount, balance = %doc.credits, attempt, "winnings credited");
                    return Ok(doc);
                }
                Err(e) => {
                    tracing::warn!(%account, round = %round_id, attempt, error = %e, "credit attempt failed");
                    self.note_failure(round_id, &e);
                    last_error = e;
                }
            }
            if attempt < self.config.max_credit_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }

        let attempts = self.config.max_credit_attempts;
        tracing::error!(
            %account,
            round = %round_id,
            payout = %amount,
            attempts,
            error = %last_error,
            "credit unresolved, queued for reconciliation"
        );
        Err(SettlementError::CreditUnresolved {
            round_id: round_id.to_string(),
            amount,
            attempts,
            last_error,
        })
    }

    /// Write-ahead entry for a credit about to be attempted
    fn record(&self, account: &AccountId, round_id: RoundId, amount: Credits) {
        self.pending.entry(round_id).or_insert_with(|| PendingCredit {
            round_id,
            account: account.clone(),
            amount,
            attempts: 0,
            last_error: String::new(),
            recorded_at: Utc::now(),
        });
    }

    fn note_failure(&self, round_id: RoundId, error: &StoreError) {
        if let Some(mut p) = self.pending.get_mut(&round_id) {
            p.attempts += 1;
            p.last_error = error.to_string();
        }
    }

    /// Credits still owed, oldest first
    pub fn pending_credits(&self) -> Vec<PendingCredit> {
        let mut pending: Vec<PendingCredit> = self.pending.iter().map(|e| e.value().clone()).collect();
        pending.sort_by_key(|p| p.recorded_at);
        pending
    }

    /// Replay every parked credit once
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for entry in self.pending_credits() {
            let mutation = Mutation::credit(entry.round_id.credit_op(), entry.amount);
            match self.store.increment(&entry.account, &mutation).await {
                Ok(doc) => {
                    self.pending.remove(&entry.round_id);
                    report.resolved += 1;
                    tracing::info!(account = %entry.account, round = %entry.round_id, payout = %entry.amount, balance = %doc.credits, "pending credit reconciled");
                }
                Err(e) => {
                    self.note_failure(entry.round_id, &e);
                    report.still_pending += 1;
                    tracing::error!(account = %entry.account, round = %entry.round_id, error = %e, "pending credit still failing");
                }
            }
        }
        report
    }
}

//! End-to-end round flows through `MinesService`
//!
//! Drives the service with the in-memory store, fixed or seeded minefields,
//! and a store wrapper that can be told to fail increments.

use async_trait::async_trait;
use mines::{
    account_store::{AccountDocument, AccountStore, InMemoryAccountStore, Mutation},
    config::MinesConfig,
    errors::{MinesError, MinesResult, SettlementError, StoreError},
    games::{
        grid::{Board, MinefieldGenerator, RandomMinefieldGenerator},
        AccountId, CellView, Coordinate, Credits, RoundConclusion, RoundState,
    },
    identity::StaticTokenIdentity,
    service::{MinesService, RevealResult},
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::broadcast;

const TOKEN: Option<&str> = Some("alice-token");

/// Mines at the first three cells of the top row
struct TopRowMines;

impl MinefieldGenerator for TopRowMines {
    fn generate(&self, size: usize, mine_count: u32) -> MinesResult<Board> {
        let mines: Vec<Coordinate> = (0..mine_count as usize).map(|i| Coordinate::new(i / size, i % size)).collect();
        Board::with_mines(size, &mines)
    }
}

/// Store whose credits can be switched off and whose debits can be slowed
struct OutageStore {
    inner: InMemoryAccountStore,
    fail_credits: AtomicBool,
    debit_delay_ms: AtomicU64,
}

fn outage_store() -> Arc<OutageStore> {
    Arc::new(OutageStore {
        inner: InMemoryAccountStore::new(),
        fail_credits: AtomicBool::new(false),
        debit_delay_ms: AtomicU64::new(0),
    })
}

#[async_trait]
impl AccountStore for OutageStore {
    async fn open_account(&self, account: &AccountId, credits: Credits) -> Result<AccountDocument, StoreError> {
        self.inner.open_account(account, credits).await
    }

    async fn get(&self, account: &AccountId) -> Result<Option<AccountDocument>, StoreError> {
        self.inner.get(account).await
    }

    async fn increment(&self, account: &AccountId, mutation: &Mutation) -> Result<AccountDocument, StoreError> {
        if mutation.credits_delta.is_positive() && self.fail_credits.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        let delay = self.debit_delay_ms.load(Ordering::SeqCst);
        if mutation.credits_delta < Credits::ZERO && delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.increment(account, mutation).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AccountDocument> {
        self.inner.subscribe()
    }
}

fn fast_settlement(config: &mut MinesConfig) {
    config.settlement.max_credit_attempts = 3;
    config.settlement.initial_backoff_ms = 1;
    config.settlement.max_backoff_ms = 2;
}

async fn service_with(store: Arc<dyn AccountStore>, balance: Credits) -> MinesService {
    store.open_account(&AccountId::new("alice"), balance).await.unwrap();
    let identity = Arc::new(StaticTokenIdentity::new().with_token("alice-token", AccountId::new("alice")));
    let mut config = MinesConfig::default();
    fast_settlement(&mut config);
    MinesService::new(&config, identity, store).with_generator(Arc::new(TopRowMines))
}

async fn balance(service: &MinesService) -> Credits {
    service.account(TOKEN).await.unwrap().credits
}

#[tokio::test]
async fn test_two_gems_then_cash_out() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await;

    let start = service.start_round(TOKEN, 10.0, 3).await.unwrap();
    assert_eq!(start.balance, Credits::whole(90));
    assert_eq!(start.round.state, RoundState::Playing);
    assert_eq!(start.round.multiplier, 1.0);
    assert_eq!(service.account(TOKEN).await.unwrap().rounds_played, 1);

    let first = service.reveal(TOKEN, 4, 4).await.unwrap();
    assert_eq!(first.result, RevealResult::Gem);
    assert!((first.round.multiplier - 0.95 / (22.0 / 25.0)).abs() < 1e-12);

    let second = service.reveal(TOKEN, 3, 3).await.unwrap();
    assert_eq!(second.round.safe_revealed, 2);
    assert!((second.round.multiplier - 1.233766).abs() < 1e-6);
    assert_eq!(second.round.current_winnings, Credits::from_minor(1_233));

    let cash = service.cash_out(TOKEN).await.unwrap();
    assert_eq!(cash.payout, Credits::from_minor(1_233));
    assert_eq!(cash.balance, Credits::from_minor(10_233));
    assert_eq!(cash.round.state, RoundState::Idle);
    assert_eq!(cash.round.conclusion, Some(RoundConclusion::CashedOut));

    let doc = service.account(TOKEN).await.unwrap();
    assert_eq!(doc.credits.to_string(), "102.33");
    assert_eq!(doc.rounds_played, 1);
    assert_eq!(doc.rounds_won, 1);
}

#[tokio::test]
async fn test_bust_keeps_stake_and_discloses_mines() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await;
    service.start_round(TOKEN, 10.0, 3).await.unwrap();

    let report = service.reveal(TOKEN, 0, 1).await.unwrap();
    assert_eq!(report.result, RevealResult::Mine);
    assert_eq!(report.round.state, RoundState::Busted);
    assert_eq!(report.round.conclusion, Some(RoundConclusion::Busted));
    for col in 0..3 {
        assert_eq!(report.round.board.cell(Coordinate::new(0, col)), Some(CellView::Mine));
    }
    assert_eq!(report.round.board.cell(Coordinate::new(2, 2)), Some(CellView::Hidden));

    assert!(matches!(service.reveal(TOKEN, 2, 2).await, Err(MinesError::IllegalMove(_))));
    assert!(matches!(service.cash_out(TOKEN).await, Err(MinesError::IllegalMove(_))));

    let doc = service.account(TOKEN).await.unwrap();
    assert_eq!(doc.credits, Credits::whole(90));
    assert_eq!(doc.rounds_won, 0);

    // A busted round does not block the next one
    assert!(service.start_round(TOKEN, 10.0, 3).await.is_ok());
    assert_eq!(balance(&service).await, Credits::whole(80));
}

#[tokio::test]
async fn test_cash_out_needs_progress_and_happens_once() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await;
    service.start_round(TOKEN, 10.0, 3).await.unwrap();

    assert!(matches!(service.cash_out(TOKEN).await, Err(MinesError::IllegalMove(_))));
    assert_eq!(balance(&service).await, Credits::whole(90));

    service.reveal(TOKEN, 2, 2).await.unwrap();
    assert!(matches!(service.reveal(TOKEN, 2, 2).await, Err(MinesError::IllegalMove(_))));
    assert!(matches!(service.reveal(TOKEN, 5, 0).await, Err(MinesError::IllegalMove(_))));

    let first = service.cash_out(TOKEN).await.unwrap();
    assert!(matches!(service.cash_out(TOKEN).await, Err(MinesError::IllegalMove(_))));
    assert_eq!(balance(&service).await, first.balance);
    assert_eq!(service.account(TOKEN).await.unwrap().rounds_won, 1);
}

#[tokio::test]
async fn test_full_clear_credits_automatically() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await;
    // 24 mines leave a single safe cell at the bottom-right corner
    service.start_round(TOKEN, 1.0, 24).await.unwrap();

    let report = service.reveal(TOKEN, 4, 4).await.unwrap();
    assert_eq!(report.result, RevealResult::FullClear);
    assert_eq!(report.round.state, RoundState::Idle);
    assert_eq!(report.round.conclusion, Some(RoundConclusion::FullClear));
    assert!(report.round.board.hidden().is_empty());

    // 0.95 × 25 = 23.75
    assert_eq!(report.round.payout, Some(Credits::from_minor(2_375)));
    assert_eq!(report.balance, Some(Credits::from_minor(12_275)));
    assert!(matches!(service.cash_out(TOKEN).await, Err(MinesError::IllegalMove(_))));
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_round() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(5)).await;
    assert!(matches!(
        service.start_round(TOKEN, 10.0, 3).await,
        Err(MinesError::InsufficientFunds { .. })
    ));
    assert!(service.current_round(TOKEN).await.unwrap().is_none());
    assert!(matches!(service.reveal(TOKEN, 4, 4).await, Err(MinesError::IllegalMove(_))));

    let doc = service.account(TOKEN).await.unwrap();
    assert_eq!(doc.credits, Credits::whole(5));
    assert_eq!(doc.rounds_played, 0);
}

#[tokio::test]
async fn test_unauthenticated_callers_are_rejected() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await;
    assert!(matches!(service.start_round(None, 10.0, 3).await, Err(MinesError::Unauthenticated)));
    assert!(matches!(service.account(Some("nobody")).await, Err(MinesError::Unauthenticated)));
    assert!(matches!(service.current_round(Some("")).await, Err(MinesError::Unauthenticated)));
    assert_eq!(balance(&service).await, Credits::whole(100));
}

#[tokio::test]
async fn test_hidden_cells_never_leak() {
    let service = service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await;
    service.start_round(TOKEN, 10.0, 3).await.unwrap();
    service.reveal(TOKEN, 3, 0).await.unwrap();

    let snapshot = service.current_round(TOKEN).await.unwrap().unwrap();
    let json = serde_json::to_string(&snapshot).unwrap();
    assert!(!json.contains("\"mine\""), "board leaked: {}", json);
    assert_eq!(snapshot.board.hidden().len(), 24);
    assert_eq!(snapshot.board.cell(Coordinate::new(3, 0)), Some(CellView::Gem));
}

#[tokio::test]
async fn test_unresolved_credit_is_parked_and_reconciled() {
    let store = outage_store();
    let service = service_with(store.clone(), Credits::whole(100)).await;

    service.start_round(TOKEN, 10.0, 3).await.unwrap();
    service.reveal(TOKEN, 4, 4).await.unwrap();
    service.reveal(TOKEN, 3, 3).await.unwrap();

    store.fail_credits.store(true, Ordering::SeqCst);
    match service.cash_out(TOKEN).await {
        Err(MinesError::Settlement(SettlementError::CreditUnresolved { amount, attempts, .. })) => {
            assert_eq!(amount, Credits::from_minor(1_233));
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected CreditUnresolved, got {:?}", other.map(|r| r.payout)),
    }

    // Round is concluded; winnings are owed, not re-claimable
    let snapshot = service.current_round(TOKEN).await.unwrap().unwrap();
    assert_eq!(snapshot.state, RoundState::Idle);
    assert_eq!(snapshot.payout, Some(Credits::from_minor(1_233)));
    assert!(matches!(service.cash_out(TOKEN).await, Err(MinesError::IllegalMove(_))));
    assert_eq!(balance(&service).await, Credits::whole(90));
    assert_eq!(service.pending_credits().len(), 1);

    store.fail_credits.store(false, Ordering::SeqCst);
    let report = service.reconcile().await;
    assert_eq!(report.resolved, 1);
    assert_eq!(report.still_pending, 0);
    assert!(service.pending_credits().is_empty());

    let doc = service.account(TOKEN).await.unwrap();
    assert_eq!(doc.credits, Credits::from_minor(10_233));
    assert_eq!(doc.rounds_won, 1);

    // Replaying again is a no-op
    let report = service.reconcile().await;
    assert_eq!(report.resolved, 0);
    assert_eq!(balance(&service).await, Credits::from_minor(10_233));
}

#[tokio::test]
async fn test_abandoned_cash_out_still_owes_winnings() {
    let store = outage_store();
    store.open_account(&AccountId::new("alice"), Credits::whole(100)).await.unwrap();
    let identity = Arc::new(StaticTokenIdentity::new().with_token("alice-token", AccountId::new("alice")));
    let mut config = MinesConfig::default();
    config.settlement.max_credit_attempts = 5;
    config.settlement.initial_backoff_ms = 500;
    config.settlement.max_backoff_ms = 1_000;
    let service = MinesService::new(&config, identity, store.clone()).with_generator(Arc::new(TopRowMines));

    service.start_round(TOKEN, 10.0, 3).await.unwrap();
    service.reveal(TOKEN, 4, 4).await.unwrap();
    service.reveal(TOKEN, 3, 3).await.unwrap();

    // Caller gives up while the credit is backing off
    store.fail_credits.store(true, Ordering::SeqCst);
    let abandoned = tokio::time::timeout(Duration::from_millis(50), service.cash_out(TOKEN)).await;
    assert!(abandoned.is_err());

    let pending = service.pending_credits();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].amount, Credits::from_minor(1_233));
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(balance(&service).await, Credits::whole(90));

    store.fail_credits.store(false, Ordering::SeqCst);
    let report = service.reconcile().await;
    assert_eq!(report.resolved, 1);
    assert_eq!(balance(&service).await, Credits::from_minor(10_233));

    // The background retry lands on the same op id and changes nothing
    let snapshot = service.current_round(TOKEN).await.unwrap().unwrap();
    assert_eq!(snapshot.state, RoundState::Idle);
    assert!(service.pending_credits().is_empty());
    assert_eq!(balance(&service).await, Credits::from_minor(10_233));
}

#[tokio::test]
async fn test_abandoned_start_still_installs_debited_round() {
    let store = outage_store();
    let service = service_with(store.clone(), Credits::whole(100)).await;
    store.debit_delay_ms.store(200, Ordering::SeqCst);

    let abandoned = tokio::time::timeout(Duration::from_millis(20), service.start_round(TOKEN, 10.0, 3)).await;
    assert!(abandoned.is_err());

    // Waits on the slot until the debit task has finished
    let snapshot = service.current_round(TOKEN).await.unwrap().unwrap();
    assert_eq!(snapshot.state, RoundState::Playing);
    assert_eq!(snapshot.stake, Credits::whole(10));
    assert_eq!(balance(&service).await, Credits::whole(90));

    store.debit_delay_ms.store(0, Ordering::SeqCst);
    service.reveal(TOKEN, 4, 4).await.unwrap();
    let report = service.cash_out(TOKEN).await.unwrap();
    assert_eq!(report.balance, Credits::from_minor(10_079));
}

#[tokio::test]
async fn test_concurrent_starts_for_one_account_serialize() {
    let service = Arc::new(service_with(Arc::new(InMemoryAccountStore::new()), Credits::whole(100)).await);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.start_round(TOKEN, 10.0, 3).await })
        })
        .collect();

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(MinesError::IllegalMove(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(started, 1);
    assert_eq!(balance(&service).await, Credits::whole(90));
}

#[tokio::test]
async fn test_seeded_rounds_conserve_credits() {
    let store = Arc::new(InMemoryAccountStore::new());
    store.open_account(&AccountId::new("alice"), Credits::whole(1_000)).await.unwrap();
    let identity = Arc::new(StaticTokenIdentity::new().with_token("alice-token", AccountId::new("alice")));
    let service = MinesService::new(&MinesConfig::default(), identity, store)
        .with_generator(Arc::new(RandomMinefieldGenerator::seeded(7)));

    let mut expected = Credits::whole(1_000);
    for _ in 0..50 {
        service.start_round(TOKEN, 1.0, 5).await.unwrap();
        expected = expected.checked_sub(Credits::whole(1)).unwrap();

        let mut settled = false;
        for index in 0..2 {
            let report = service.reveal(TOKEN, 2, index).await.unwrap();
            if report.result != RevealResult::Gem {
                settled = true;
                break;
            }
        }
        if !settled {
            let cash = service.cash_out(TOKEN).await.unwrap();
            expected = expected.checked_add(cash.payout).unwrap();
        }
        assert_eq!(balance(&service).await, expected);
    }

    let doc = service.account(TOKEN).await.unwrap();
    assert_eq!(doc.rounds_played, 50);
}

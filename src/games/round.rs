//! Round state machine
//!
//! A [`Round`] owns one hidden board and the progress made on it. All
//! legality checks live here; callers never hand back a board or multiplier.
//! Settlement is not performed by the round itself: a winning transition
//! returns a [`CashOut`] describing the credit the coordinator must issue.

use crate::errors::{MinesError, MinesResult};
use crate::games::grid::Board;
use crate::games::multiplier::MultiplierCalculator;
use crate::games::types::{
    AccountId, Coordinate, Credits, RoundConclusion, RoundId, RoundSnapshot, RoundState,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Winnings owed for a concluded round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashOut {
    pub round_id: RoundId,
    pub account: AccountId,
    pub stake: Credits,
    pub safe_revealed: u32,
    pub multiplier: f64,
    pub amount: Credits,
    pub full_clear: bool,
}

/// Result of a legal reveal
#[derive(Debug, Clone, PartialEq)]
pub enum RevealOutcome {
    Safe {
        coordinate: Coordinate,
        safe_revealed: u32,
        multiplier: f64,
    },
    Busted {
        coordinate: Coordinate,
    },
    /// Last safe cell found; the round concluded with an automatic cash-out
    Cleared(CashOut),
}

#[derive(Debug, Clone)]
pub struct Round {
    id: RoundId,
    account: AccountId,
    stake: Credits,
    board: Board,
    calculator: MultiplierCalculator,
    state: RoundState,
    safe_revealed: u32,
    multiplier: f64,
    conclusion: Option<RoundConclusion>,
    payout: Option<Credits>,
    started_at: DateTime<Utc>,
}

impl Round {
    /// Open a round on a freshly generated board. Taking the stake is the
    /// caller's job; the round is only kept once the debit has succeeded.
    pub fn begin(
        id: RoundId,
        account: AccountId,
        stake: Credits,
        board: Board,
        house_edge: f64,
    ) -> MinesResult<Self> {
        if !stake.is_positive() {
            return Err(MinesError::InvalidBet(format!("stake {} must be positive", stake)));
        }
        let calculator = MultiplierCalculator::new(board.size(), board.mine_count(), house_edge)?;
        Ok(Self {
            id,
            account,
            stake,
            board,
            calculator,
            state: RoundState::Playing,
            safe_revealed: 0,
            multiplier: 1.0,
            conclusion: None,
            payout: None,
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> RoundId {
        self.id
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn stake(&self) -> Credits {
        self.stake
    }

    pub fn mine_count(&self) -> u32 {
        self.board.mine_count()
    }

    pub fn safe_revealed(&self) -> u32 {
        self.safe_revealed
    }

    pub fn safe_total(&self) -> u32 {
        self.board.safe_total()
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn conclusion(&self) -> Option<RoundConclusion> {
        self.conclusion
    }

    fn ensure_playing(&self, action: &str) -> MinesResult<()> {
        if self.state != RoundState::Playing {
            return Err(MinesError::IllegalMove(format!(
                "cannot {} while round is {}",
                action, self.state
            )));
        }
        Ok(())
    }

    pub fn reveal(&mut self, coordinate: Coordinate) -> MinesResult<RevealOutcome> {
        self.ensure_playing("reveal")?;
        match self.board.cell(coordinate) {
            None => {
                return Err(MinesError::IllegalMove(format!(
                    "cell {} is outside the {}x{} board",
                    coordinate,
                    self.board.size(),
                    self.board.size()
                )))
            }
            Some(cell) if cell.is_revealed => {
                return Err(MinesError::IllegalMove(format!(
                    "cell {} is already revealed",
                    coordinate
                )))
            }
            Some(_) => {}
        }

        let cell = self
            .board
            .reveal(coordinate)
            .ok_or_else(|| MinesError::IllegalMove(format!("cell {} is outside the board", coordinate)))?;

        if cell.is_mine {
            self.state = RoundState::Busted;
            self.conclusion = Some(RoundConclusion::Busted);
            self.board.reveal_mines();
            tracing::info!(round = %self.id, account = %self.account, %coordinate, "round busted");
            return Ok(RevealOutcome::Busted { coordinate });
        }

        self.safe_revealed += 1;
        self.multiplier = self.calculator.multiplier(self.safe_revealed);
        tracing::debug!(
            round = %self.id,
            %coordinate,
            safe_revealed = self.safe_revealed,
            multiplier = self.multiplier,
            "safe cell revealed"
        );

        if self.safe_revealed == self.safe_total() {
            let cash_out = self.conclude(true);
            return Ok(RevealOutcome::Cleared(cash_out));
        }

        Ok(RevealOutcome::Safe {
            coordinate,
            safe_revealed: self.safe_revealed,
            multiplier: self.multiplier,
        })
    }

    /// Voluntary cash-out. Requires at least one safe reveal.
    pub fn cash_out(&mut self) -> MinesResult<CashOut> {
        self.ensure_playing("cash out")?;
        if self.safe_revealed < 1 {
            return Err(MinesError::IllegalMove(
                "must reveal at least one safe cell before cashing out".to_string(),
            ));
        }
        Ok(self.conclude(false))
    }

    fn conclude(&mut self, full_clear: bool) -> CashOut {
        let amount = self.calculator.payout(self.stake, self.safe_revealed);
        self.state = RoundState::Idle;
        self.conclusion = Some(if full_clear {
            RoundConclusion::FullClear
        } else {
            RoundConclusion::CashedOut
        });
        self.payout = Some(amount);
        self.board.reveal_all();
        tracing::info!(
            round = %self.id,
            account = %self.account,
            safe_revealed = self.safe_revealed,
            multiplier = self.multiplier,
            payout = %amount,
            full_clear,
            "round cashed out"
        );
        CashOut {
            round_id: self.id,
            account: self.account.clone(),
            stake: self.stake,
            safe_revealed: self.safe_revealed,
            multiplier: self.multiplier,
            amount,
            full_clear,
        }
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        let next_multiplier = if self.state == RoundState::Playing {
            self.calculator.next_multiplier(self.safe_revealed)
        } else {
            None
        };
        RoundSnapshot {
            round_id: self.id,
            state: self.state,
            stake: self.stake,
            mine_count: self.mine_count(),
            safe_revealed: self.safe_revealed,
            safe_total: self.safe_total(),
            multiplier: self.multiplier,
            next_multiplier,
            current_winnings: self.calculator.payout(self.stake, self.safe_revealed),
            conclusion: self.conclusion,
            payout: self.payout,
            board: self.board.view(),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::types::CellView;

    // Mines at (0,0), (0,1), (0,2); everything else is safe
    fn three_mine_round() -> Round {
        let board = Board::with_mines(
            5,
            &[Coordinate::new(0, 0), Coordinate::new(0, 1), Coordinate::new(0, 2)],
        )
        .unwrap();
        Round::begin(
            RoundId::new(),
            AccountId::new("alice"),
            Credits::whole(10),
            board,
            0.95,
        )
        .unwrap()
    }

    fn safe_cells() -> Vec<Coordinate> {
        (0..25)
            .map(|i| Coordinate::new(i / 5, i % 5))
            .filter(|c| !(c.row == 0 && c.col < 3))
            .collect()
    }

    #[test]
    fn test_new_round_is_playing() {
        let round = three_mine_round();
        assert_eq!(round.state(), RoundState::Playing);
        assert_eq!(round.safe_revealed(), 0);
        assert_eq!(round.multiplier(), 1.0);
        assert_eq!(round.safe_total(), 22);
    }

    #[test]
    fn test_safe_reveal_increases_multiplier() {
        let mut round = three_mine_round();
        let outcome = round.reveal(Coordinate::new(2, 2)).unwrap();
        match outcome {
            RevealOutcome::Safe { safe_revealed, multiplier, .. } => {
                assert_eq!(safe_revealed, 1);
                assert!((multiplier - 0.95 / (22.0 / 25.0)).abs() < 1e-9);
            }
            other => panic!("Expected safe reveal, got {:?}", other),
        }
    }

    #[test]
    fn test_reveal_mine_busts_and_discloses_mines() {
        let mut round = three_mine_round();
        round.reveal(Coordinate::new(3, 3)).unwrap();
        let outcome = round.reveal(Coordinate::new(0, 1)).unwrap();
        assert!(matches!(outcome, RevealOutcome::Busted { .. }));
        assert_eq!(round.state(), RoundState::Busted);

        let view = round.snapshot().board;
        for col in 0..3 {
            assert_eq!(view.cell(Coordinate::new(0, col)), Some(CellView::Mine));
        }
        // Unclicked safe cells stay hidden on a bust
        assert_eq!(view.cell(Coordinate::new(4, 4)), Some(CellView::Hidden));

        assert!(matches!(
            round.reveal(Coordinate::new(4, 4)),
            Err(MinesError::IllegalMove(_))
        ));
        assert!(matches!(round.cash_out(), Err(MinesError::IllegalMove(_))));
    }

    #[test]
    fn test_reveal_rejects_revealed_and_out_of_range() {
        let mut round = three_mine_round();
        round.reveal(Coordinate::new(1, 1)).unwrap();
        assert!(matches!(
            round.reveal(Coordinate::new(1, 1)),
            Err(MinesError::IllegalMove(_))
        ));
        assert!(matches!(
            round.reveal(Coordinate::new(0, 5)),
            Err(MinesError::IllegalMove(_))
        ));
        assert_eq!(round.safe_revealed(), 1);
        assert_eq!(round.state(), RoundState::Playing);
    }

    #[test]
    fn test_cash_out_requires_progress() {
        let mut round = three_mine_round();
        assert!(matches!(round.cash_out(), Err(MinesError::IllegalMove(_))));
        assert_eq!(round.state(), RoundState::Playing);
    }

    #[test]
    fn test_cash_out_pays_stake_times_multiplier() {
        let mut round = three_mine_round();
        round.reveal(Coordinate::new(1, 0)).unwrap();
        round.reveal(Coordinate::new(1, 1)).unwrap();
        let cash_out = round.cash_out().unwrap();
        assert_eq!(cash_out.amount, Credits::from_minor(1_233));
        assert!(!cash_out.full_clear);
        assert_eq!(round.state(), RoundState::Idle);
        assert_eq!(round.conclusion(), Some(RoundConclusion::CashedOut));

        // Whole board disclosed after a cash-out
        assert!(round.snapshot().board.hidden().is_empty());

        // Second cash-out is rejected rather than paid twice
        assert!(matches!(round.cash_out(), Err(MinesError::IllegalMove(_))));
    }

    #[test]
    fn test_full_clear_auto_cashes_out() {
        let mut round = three_mine_round();
        let cells = safe_cells();
        let (last, rest) = cells.split_last().unwrap();
        for c in rest {
            assert!(matches!(round.reveal(*c).unwrap(), RevealOutcome::Safe { .. }));
        }
        match round.reveal(*last).unwrap() {
            RevealOutcome::Cleared(cash_out) => {
                assert!(cash_out.full_clear);
                assert_eq!(cash_out.safe_revealed, 22);
                assert_eq!(
                    cash_out.amount,
                    Credits::whole(10).scale_floor(round.multiplier())
                );
            }
            other => panic!("Expected full clear, got {:?}", other),
        }
        assert_eq!(round.state(), RoundState::Idle);
        assert_eq!(round.conclusion(), Some(RoundConclusion::FullClear));
        assert!(round.cash_out().is_err());
    }

    #[test]
    fn test_snapshot_never_leaks_mines_while_playing() {
        let mut round = three_mine_round();
        round.reveal(Coordinate::new(4, 4)).unwrap();
        let snapshot = round.snapshot();
        assert_eq!(snapshot.state, RoundState::Playing);
        assert!(snapshot
            .board
            .cells
            .iter()
            .flatten()
            .all(|c| *c != CellView::Mine));
        assert!(snapshot.next_multiplier.unwrap() > snapshot.multiplier);
        assert_eq!(snapshot.current_winnings, Credits::from_minor(1_079));
    }

    #[test]
    fn test_begin_rejects_zero_stake() {
        let board = Board::with_mines(5, &[Coordinate::new(0, 0)]).unwrap();
        let result = Round::begin(RoundId::new(), AccountId::new("bob"), Credits::ZERO, board, 0.95);
        assert!(matches!(result, Err(MinesError::InvalidBet(_))));
    }
}

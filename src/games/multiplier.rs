//! Payout multiplier
//!
//! The multiplier after `g` safe reveals is the house edge divided by the
//! probability of picking `g` safe cells in a row without replacement:
//!
//! ```text
//! p(g) = Π_{i=0}^{g-1} (safe_total − i) / (total − i)
//! m(g) = g == 0 ? 1 : edge / p(g)
//! ```
//!
//! Intermediate terms stay in `f64`; only settled payouts are rounded.

use crate::errors::{MinesError, MinesResult};
use crate::games::grid::cell_count;
use crate::games::types::Credits;

/// Expected return to player as a fraction of fair odds
pub const DEFAULT_HOUSE_EDGE: f64 = 0.95;

/// Survival probability after `safe_revealed` safe picks
pub fn survival_probability(safe_revealed: u32, mine_count: u32, total_cells: u32) -> f64 {
    let safe_total = total_cells.saturating_sub(mine_count);
    (0..safe_revealed).fold(1.0, |p, i| {
        p * f64::from(safe_total.saturating_sub(i)) / f64::from(total_cells - i)
    })
}

/// Multiplier calculator bound to one board configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierCalculator {
    total_cells: u32,
    mine_count: u32,
    house_edge: f64,
}

impl MultiplierCalculator {
    pub fn new(board_size: usize, mine_count: u32, house_edge: f64) -> MinesResult<Self> {
        let total_cells = cell_count(board_size).ok_or_else(|| {
            MinesError::InvalidConfiguration(format!("board size {} is too large", board_size))
        })?;
        if mine_count < 1 || mine_count >= total_cells {
            return Err(MinesError::InvalidConfiguration(format!(
                "mine count {} outside [1, {}]",
                mine_count,
                total_cells.saturating_sub(1)
            )));
        }
        if !(house_edge > 0.0 && house_edge <= 1.0) {
            return Err(MinesError::InvalidConfiguration(format!(
                "house edge {} outside (0, 1]",
                house_edge
            )));
        }
        Ok(Self {
            total_cells,
            mine_count,
            house_edge,
        })
    }

    pub fn safe_total(&self) -> u32 {
        self.total_cells - self.mine_count
    }

    pub fn house_edge(&self) -> f64 {
        self.house_edge
    }

    pub fn probability(&self, safe_revealed: u32) -> f64 {
        survival_probability(safe_revealed.min(self.safe_total()), self.mine_count, self.total_cells)
    }

    /// Multiplier after `safe_revealed` safe picks, clamped to a full clear
    pub fn multiplier(&self, safe_revealed: u32) -> f64 {
        if safe_revealed == 0 {
            return 1.0;
        }
        self.house_edge / self.probability(safe_revealed)
    }

    /// Multiplier one safe pick ahead, if a safe cell remains
    pub fn next_multiplier(&self, safe_revealed: u32) -> Option<f64> {
        if safe_revealed < self.safe_total() {
            Some(self.multiplier(safe_revealed + 1))
        } else {
            None
        }
    }

    /// `m(g)` for every `g` in `0..=safe_total`
    pub fn table(&self) -> Vec<f64> {
        (0..=self.safe_total()).map(|g| self.multiplier(g)).collect()
    }

    /// Stake × multiplier, truncated to minor units
    pub fn payout(&self, stake: Credits, safe_revealed: u32) -> Credits {
        stake.scale_floor(self.multiplier(safe_revealed))
    }
}

//! Minefield generation
//!
//! Mines are placed by sampling exactly `mine_count` distinct indices out of
//! the `N²` cells, so generation is O(N²) no matter how full the board is.

use crate::errors::{MinesError, MinesResult};
use crate::games::types::{BoardView, Cell, CellView, Coordinate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Square board of `size × size` cells
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    size: usize,
    mine_count: u32,
    cells: Vec<Cell>,
}

impl Board {
    /// Board with mines at exactly the given positions
    pub fn with_mines(size: usize, mines: &[Coordinate]) -> MinesResult<Self> {
        check_dimensions(size, mines.len() as u32)?;
        let mut cells = vec![Cell::default(); size * size];
        for coordinate in mines {
            let index = coordinate.to_index(size).ok_or_else(|| {
                MinesError::InvalidConfiguration(format!("mine {} is outside the board", coordinate))
            })?;
            if cells[index].is_mine {
                return Err(MinesError::InvalidConfiguration(format!(
                    "duplicate mine at {}",
                    coordinate
                )));
            }
            cells[index].is_mine = true;
        }
        Ok(Self {
            size,
            mine_count: mines.len() as u32,
            cells,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn mine_count(&self) -> u32 {
        self.mine_count
    }

    pub fn safe_total(&self) -> u32 {
        self.cells.len() as u32 - self.mine_count
    }

    pub fn cell(&self, coordinate: Coordinate) -> Option<Cell> {
        coordinate
            .to_index(self.size)
            .map(|index| self.cells[index])
    }

    /// Mark a cell revealed. Returns the cell as it was before the flip, or
    /// `None` for an out-of-range coordinate. Already revealed cells are left
    /// untouched.
    pub fn reveal(&mut self, coordinate: Coordinate) -> Option<Cell> {
        let index = coordinate.to_index(self.size)?;
        let before = self.cells[index];
        self.cells[index].is_revealed = true;
        Some(before)
    }

    pub fn reveal_mines(&mut self) {
        for cell in self.cells.iter_mut().filter(|c| c.is_mine) {
            cell.is_revealed = true;
        }
    }

    pub fn reveal_all(&mut self) {
        for cell in &mut self.cells {
            cell.is_revealed = true;
        }
    }

    pub fn revealed_safe(&self) -> u32 {
        self.cells
            .iter()
            .filter(|c| c.is_revealed && !c.is_mine)
            .count() as u32
    }

    pub fn mine_positions(&self) -> Vec<Coordinate> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_mine)
            .map(|(i, _)| Coordinate::from_index(i, self.size))
            .collect()
    }

    /// Caller-visible view. Unrevealed cells are always `Hidden`.
    pub fn view(&self) -> BoardView {
        let cells = self
            .cells
            .chunks(self.size)
            .map(|row| {
                row.iter()
                    .map(|cell| match (cell.is_revealed, cell.is_mine) {
                        (false, _) => CellView::Hidden,
                        (true, true) => CellView::Mine,
                        (true, false) => CellView::Gem,
                    })
                    .collect()
            })
            .collect();
        BoardView {
            size: self.size,
            cells,
        }
    }
}

/// `size²`, or `None` when it does not fit a `u32`
pub fn cell_count(size: usize) -> Option<u32> {
    size.checked_mul(size).and_then(|total| u32::try_from(total).ok())
}

fn check_dimensions(size: usize, mine_count: u32) -> MinesResult<()> {
    if size == 0 {
        return Err(MinesError::InvalidConfiguration(
            "board size must be positive".to_string(),
        ));
    }
    let total = cell_count(size).ok_or_else(|| {
        MinesError::InvalidConfiguration(format!("board size {} is too large", size))
    })?;
    if mine_count < 1 || mine_count >= total {
        return Err(MinesError::InvalidConfiguration(format!(
            "mine count {} outside [1, {}]",
            mine_count,
            total - 1
        )));
    }
    Ok(())
}

/// Place `mine_count` mines uniformly at random on a `size × size` board
pub fn generate<R: Rng + ?Sized>(size: usize, mine_count: u32, rng: &mut R) -> MinesResult<Board> {
    check_dimensions(size, mine_count)?;
    let total = size * size;
    let mut cells = vec![Cell::default(); total];
    for index in rand::seq::index::sample(rng, total, mine_count as usize).into_iter() {
        cells[index].is_mine = true;
    }
    Ok(Board {
        size,
        mine_count,
        cells,
    })
}

/// Source of minefields for new rounds
pub trait MinefieldGenerator: Send + Sync {
    fn generate(&self, size: usize, mine_count: u32) -> MinesResult<Board>;
}

/// Uniform random placement backed by a shared `StdRng`
pub struct RandomMinefieldGenerator {
    rng: Mutex<StdRng>,
}

impl RandomMinefieldGenerator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for simulations and tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomMinefieldGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MinefieldGenerator for RandomMinefieldGenerator {
    fn generate(&self, size: usize, mine_count: u32) -> MinesResult<Board> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        generate(size, mine_count, &mut *rng)
    }
}

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Minor units per whole credit (two decimal places)
pub const MINOR_UNITS_PER_CREDIT: i64 = 100;

/// Fixed-point credit amount stored as hundredths.
///
/// Balances and stakes never go through floating point once converted; only
/// the payout computation multiplies by an `f64` multiplier, and the result is
/// truncated back to minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    /// Whole credits, e.g. `Credits::whole(10)` is `10.00`
    pub const fn whole(credits: i64) -> Self {
        Self(credits * MINOR_UNITS_PER_CREDIT)
    }

    /// Convert a decimal amount, rejecting non-finite values and anything
    /// finer than one minor unit.
    pub fn try_from_decimal(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value * MINOR_UNITS_PER_CREDIT as f64;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 || rounded.abs() > i64::MAX as f64 / 2.0 {
            return None;
        }
        Some(Self(rounded as i64))
    }

    pub fn to_decimal(self) -> f64 {
        self.0 as f64 / MINOR_UNITS_PER_CREDIT as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// `self × factor`, rounded down to whole minor units
    pub fn scale_floor(self, factor: f64) -> Credits {
        // Absorb representation error so exact products do not round down a unit
        let scaled = self.0 as f64 * factor + 1e-9;
        Credits(scaled.floor() as i64)
    }

    pub fn checked_add(self, other: Credits) -> Option<Credits> {
        self.0.checked_add(other.0).map(Credits)
    }

    pub fn checked_sub(self, other: Credits) -> Option<Credits> {
        self.0.checked_sub(other.0).map(Credits)
    }

    pub fn negate(self) -> Credits {
        Credits(-self.0)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_UNITS_PER_CREDIT as u64;
        write!(f, "{}{}.{:02}", sign, abs / per, abs % per)
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_decimal())
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Credits::try_from_decimal(value).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "credit amount {} must be finite and in whole minor units",
                value
            ))
        })
    }
}

/// Stable account identifier resolved by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for one round, used to tag settlement mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(Uuid);

impl RoundId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Operation id for the stake debit of this round
    pub fn debit_op(&self) -> String {
        format!("{}:debit", self.0)
    }

    /// Operation id for the winnings credit of this round
    pub fn credit_op(&self) -> String {
        format!("{}:credit", self.0)
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Zero-indexed board position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub row: usize,
    pub col: usize,
}

impl Coordinate {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub(crate) fn from_index(index: usize, board_size: usize) -> Self {
        Self {
            row: index / board_size,
            col: index % board_size,
        }
    }

    pub(crate) fn to_index(self, board_size: usize) -> Option<usize> {
        if self.row < board_size && self.col < board_size {
            Some(self.row * board_size + self.col)
        } else {
            None
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// One board cell. `is_mine` is fixed at generation; `is_revealed` flips once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    pub is_mine: bool,
    pub is_revealed: bool,
}

/// Round lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundState {
    /// No bet in play: before the first round, or after a cash-out/full clear
    Idle,
    Playing,
    /// Terminal loss
    Busted,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundState::Idle => write!(f, "idle"),
            RoundState::Playing => write!(f, "playing"),
            RoundState::Busted => write!(f, "busted"),
        }
    }
}

/// What a caller is allowed to see of a cell
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CellView {
    Hidden,
    Gem,
    Mine,
}

/// Caller-visible board, row-major
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardView {
    pub size: usize,
    pub cells: Vec<Vec<CellView>>,
}

impl BoardView {
    pub fn cell(&self, coordinate: Coordinate) -> Option<CellView> {
        self.cells
            .get(coordinate.row)
            .and_then(|row| row.get(coordinate.col))
            .copied()
    }

    /// Positions still hidden
    pub fn hidden(&self) -> Vec<Coordinate> {
        let mut hidden = Vec::new();
        for (row, cells) in self.cells.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                if *cell == CellView::Hidden {
                    hidden.push(Coordinate::new(row, col));
                }
            }
        }
        hidden
    }
}

/// How a round reached `Idle`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundConclusion {
    CashedOut,
    FullClear,
    Busted,
}

/// Caller-visible state of one round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub round_id: RoundId,
    pub state: RoundState,
    pub stake: Credits,
    pub mine_count: u32,
    pub safe_revealed: u32,
    pub safe_total: u32,
    pub multiplier: f64,
    /// Multiplier after one more safe reveal; absent when none remain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_multiplier: Option<f64>,
    /// `stake × multiplier` at the current progress
    pub current_winnings: Credits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RoundConclusion>,
    /// Amount credited (or owed) on a winning conclusion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<Credits>,
    pub board: BoardView,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credits_display() {
        assert_eq!(Credits::from_minor(10_233).to_string(), "102.33");
        assert_eq!(Credits::from_minor(5).to_string(), "0.05");
        assert_eq!(Credits::from_minor(-1_000).to_string(), "-10.00");
    }

    #[test]
    fn test_credits_from_decimal() {
        assert_eq!(Credits::try_from_decimal(10.0), Some(Credits::whole(10)));
        assert_eq!(Credits::try_from_decimal(0.01), Some(Credits::from_minor(1)));
        assert_eq!(Credits::try_from_decimal(12.345), None);
        assert_eq!(Credits::try_from_decimal(f64::NAN), None);
        assert_eq!(Credits::try_from_decimal(f64::INFINITY), None);
    }

    #[test]
    fn test_scale_floor_truncates() {
        let stake = Credits::whole(10);
        let multiplier = 0.95 / ((22.0 / 25.0) * (21.0 / 24.0));
        assert_eq!(stake.scale_floor(multiplier), Credits::from_minor(1_233));
        assert_eq!(stake.scale_floor(23.75), Credits::from_minor(23_750));
    }

    #[test]
    fn test_credits_serde_as_decimal() {
        let json = serde_json::to_string(&Credits::from_minor(10_233)).unwrap();
        assert_eq!(json, "102.33");
        let back: Credits = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Credits::from_minor(10_233));
    }

    #[test]
    fn test_credits_deserialize_rejects_sub_minor_amounts() {
        assert!(serde_json::from_str::<Credits>("0.005").is_err());
        assert!(serde_json::from_str::<Credits>("12.345").is_err());
        assert_eq!(serde_json::from_str::<Credits>("0.01").unwrap(), Credits::from_minor(1));
    }

    #[test]
    fn test_coordinate_index() {
        let c = Coordinate::new(2, 3);
        assert_eq!(c.to_index(5), Some(13));
        assert_eq!(Coordinate::from_index(13, 5), c);
        assert_eq!(Coordinate::new(5, 0).to_index(5), None);
    }

    #[test]
    fn test_round_ids_tag_operations() {
        let id = RoundId::new();
        assert!(id.debit_op().ends_with(":debit"));
        assert!(id.credit_op().ends_with(":credit"));
        assert_ne!(id.debit_op(), id.credit_op());
    }
}

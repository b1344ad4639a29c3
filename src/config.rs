//! Configuration management with validation and defaults
//!
//! Defaults, then an optional TOML file, then `MINES_*` environment
//! overrides, then validation.

use crate::account_store::DEFAULT_OP_RETENTION;
use crate::errors::{ConfigurationError, MinesResult};
use crate::games::grid::cell_count;
use crate::games::multiplier::DEFAULT_HOUSE_EDGE;
use crate::games::types::Credits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MinesConfig {
    pub game: GameConfig,
    pub settlement: SettlementConfig,
    pub store: StoreConfig,
    pub api: ApiConfig,
}

/// Board and betting limits
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub board_size: usize,
    pub house_edge: f64,
    pub min_mines: u32,
    /// Defaults to `board_size² − 1` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mines: Option<u32>,
    pub min_stake: Credits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stake: Option<Credits>,
}

impl GameConfig {
    /// Saturates for boards too large to count; `validate` rejects those
    pub fn total_cells(&self) -> u32 {
        cell_count(self.board_size).unwrap_or(u32::MAX)
    }

    pub fn effective_max_mines(&self) -> u32 {
        self.max_mines
            .unwrap_or_else(|| self.total_cells().saturating_sub(1))
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            board_size: 5,
            house_edge: DEFAULT_HOUSE_EDGE,
            min_mines: 1,
            max_mines: None,
            min_stake: Credits::from_minor(1),
            max_stake: None,
        }
    }
}

/// Credit retry policy
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_credit_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// How often the server replays parked credits; 0 disables the sweep
    pub reconcile_interval_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_credit_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            reconcile_interval_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rocksdb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub data_directory: String,
    /// Balance given to newly opened accounts
    pub starting_credits: Credits,
    /// Applied op ids remembered per account for replay dedupe
    pub op_retention: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            data_directory: "./DB/accounts".to_string(),
            starting_credits: Credits::ZERO,
            op_retention: DEFAULT_OP_RETENTION,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
    /// Bearer token → account id, for the bundled identity provider
    pub tokens: HashMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
            tokens: HashMap::new(),
        }
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> MinesResult<MinesConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            MinesConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> MinesResult<MinesConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut MinesConfig) -> MinesResult<()> {
        if let Ok(host) = env::var("MINES_API_HOST") {
            config.api.host = host;
        }
        if let Some(port) = parse_env::<u16>("MINES_API_PORT", "Invalid port number")? {
            config.api.port = port;
        }
        if let Some(edge) = parse_env::<f64>("MINES_HOUSE_EDGE", "Invalid house edge")? {
            config.game.house_edge = edge;
        }
        if let Some(size) = parse_env::<usize>("MINES_BOARD_SIZE", "Invalid board size")? {
            config.game.board_size = size;
        }
        if let Ok(dir) = env::var("MINES_DATA_DIR") {
            config.store.data_directory = dir;
            config.store.backend = StoreBackend::Rocksdb;
        }
        if let Some(attempts) = parse_env::<u32>("MINES_CREDIT_ATTEMPTS", "Invalid attempt count")? {
            config.settlement.max_credit_attempts = attempts;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self, config: &MinesConfig) -> MinesResult<()> {
        let game = &config.game;
        if game.board_size < 2 {
            return Err(invalid("game.board_size", game.board_size, "Board must be at least 2x2"));
        }
        if cell_count(game.board_size).is_none() {
            return Err(invalid("game.board_size", game.board_size, "Cell count does not fit in 32 bits"));
        }
        if !(game.house_edge > 0.0 && game.house_edge <= 1.0) {
            return Err(invalid("game.house_edge", game.house_edge, "Must be in (0, 1]"));
        }
        if game.min_mines < 1 {
            return Err(invalid("game.min_mines", game.min_mines, "At least one mine is required"));
        }
        let max_mines = game.effective_max_mines();
        if max_mines >= game.total_cells() || max_mines < game.min_mines {
            return Err(invalid(
                "game.max_mines",
                max_mines,
                "Must be at least min_mines and leave one safe cell",
            ));
        }
        if !game.min_stake.is_positive() {
            return Err(invalid("game.min_stake", game.min_stake, "Minimum stake must be positive"));
        }
        if let Some(max_stake) = game.max_stake {
            if max_stake < game.min_stake {
                return Err(invalid("game.max_stake", max_stake, "Below min_stake"));
            }
        }

        if config.settlement.max_credit_attempts == 0 {
            return Err(invalid("settlement.max_credit_attempts", 0, "At least one attempt is required"));
        }
        if config.settlement.max_backoff_ms < config.settlement.initial_backoff_ms {
            return Err(invalid(
                "settlement.max_backoff_ms",
                config.settlement.max_backoff_ms,
                "Below initial_backoff_ms",
            ));
        }

        if config.store.backend == StoreBackend::Rocksdb && config.store.data_directory.is_empty() {
            return Err(ConfigurationError::MissingRequired("store.data_directory".to_string()).into());
        }
        if config.store.starting_credits < Credits::ZERO {
            return Err(invalid("store.starting_credits", config.store.starting_credits, "Cannot be negative"));
        }

        if config.store.op_retention == 0 {
            return Err(invalid("store.op_retention", 0, "At least one op id must be retained"));
        }

        if config.api.port == 0 {
            return Err(invalid("api.port", 0, "Port cannot be zero"));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &MinesConfig, path: &str) -> MinesResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, reason: &str) -> MinesResult<Option<T>> {
    match env::var(key) {
        Ok(value) => value.parse().map(Some).map_err(|_| {
            ConfigurationError::InvalidValue {
                field: key.to_string(),
                value,
                reason: reason.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(None),
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> crate::errors::MinesError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> MinesResult<()> {
    let mut config = MinesConfig::default();
    config
        .api
        .tokens
        .insert("change-me".to_string(), "demo-account".to_string());
    ConfigLoader::new().save(&config, path)
}

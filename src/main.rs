//! Mines binary
//!
//! `serve` runs the HTTP transport, `simulate` plays a fixed strategy against
//! an in-memory store, `init-config` writes a sample configuration.

use clap::{Parser, Subcommand};
use mines::{
    account_store::{AccountStore, InMemoryAccountStore, RocksAccountStore},
    api::ApiServer,
    config::{generate_sample_config, ConfigLoader, MinesConfig, StoreBackend},
    games::{grid::RandomMinefieldGenerator, AccountId, Credits, RoundState},
    identity::StaticTokenIdentity,
    service::{MinesService, RevealResult},
    MinesError,
};
use std::{error::Error, path::PathBuf, sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Mines game service
#[derive(Parser)]
#[command(name = "mines")]
#[command(about = "Minefield wagering game with atomic settlement")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Play rounds with a fixed strategy and report return-to-player
    Simulate {
        /// Number of rounds to play
        #[arg(short, long, default_value = "10000")]
        rounds: u32,

        /// Stake per round
        #[arg(short, long, default_value = "1.0")]
        stake: f64,

        /// Mines per board
        #[arg(short, long, default_value = "3")]
        mines: u32,

        /// Safe reveals to attempt before cashing out
        #[arg(short = 'g', long, default_value = "3")]
        reveals: u32,

        /// RNG seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write a sample configuration file
    InitConfig {
        #[arg(default_value = "mines.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "mines=debug,tower_http=debug"
    } else {
        "mines=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    if let Commands::InitConfig { path } = &cli.command {
        let path = path.to_string_lossy();
        generate_sample_config(&path)?;
        info!("Wrote sample configuration to {}", path);
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Simulate {
            rounds,
            stake,
            mines,
            reveals,
            seed,
        } => simulate(config, rounds, stake, mines, reveals, seed).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

async fn serve(mut config: MinesConfig, port: Option<u16>) -> Result<(), Box<dyn Error>> {
    if let Some(port) = port {
        config.api.port = port;
    }

    let store: Arc<dyn AccountStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory account store");
            Arc::new(InMemoryAccountStore::new().with_op_retention(config.store.op_retention))
        }
        StoreBackend::Rocksdb => {
            info!("Using RocksDB account store at {}", config.store.data_directory);
            Arc::new(
                RocksAccountStore::open(&config.store.data_directory)?
                    .with_op_retention(config.store.op_retention),
            )
        }
    };
    let identity = Arc::new(StaticTokenIdentity::from_table(&config.api.tokens));
    let service = Arc::new(MinesService::new(&config, identity, store));

    ApiServer::new(config.api.clone(), service)
        .with_reconcile_interval(Duration::from_secs(config.settlement.reconcile_interval_secs))
        .run()
        .await
}

#[derive(Default)]
struct SimulationStats {
    rounds: u32,
    busted: u32,
    cashed_out: u32,
    full_clears: u32,
    staked: Credits,
    paid: Credits,
}

async fn simulate(
    config: MinesConfig,
    rounds: u32,
    stake: f64,
    mines: u32,
    reveals: u32,
    seed: Option<u64>,
) -> Result<(), Box<dyn Error>> {
    if reveals == 0 {
        return Err(MinesError::InvalidBet("at least one reveal is needed to cash out".to_string()).into());
    }
    let stake_credits = Credits::try_from_decimal(stake)
        .ok_or_else(|| MinesError::InvalidBet(format!("stake {} is not a valid amount", stake)))?;
    let account = AccountId::new("simulator");
    let store = Arc::new(InMemoryAccountStore::new());
    store
        .open_account(&account, Credits::from_minor(stake_credits.minor().saturating_mul(rounds as i64)))
        .await?;

    let generator = match seed {
        Some(seed) => RandomMinefieldGenerator::seeded(seed),
        None => RandomMinefieldGenerator::new(),
    };
    let identity = Arc::new(StaticTokenIdentity::new().with_token("sim", account.clone()));
    let service = MinesService::new(&config, identity, store).with_generator(Arc::new(generator));
    let token = Some("sim");

    let size = config.game.board_size;
    let mut stats = SimulationStats::default();

    for _ in 0..rounds {
        service.start_round(token, stake, mines).await?;
        stats.rounds += 1;
        stats.staked = stats.staked.checked_add(stake_credits).unwrap_or(stats.staked);

        let mut gems = 0;
        'cells: for row in 0..size {
            for col in 0..size {
                if gems >= reveals {
                    break 'cells;
                }
                let report = service.reveal(token, row, col).await?;
                match report.result {
                    RevealResult::Gem => gems += 1,
                    RevealResult::Mine => {
                        stats.busted += 1;
                        break 'cells;
                    }
                    RevealResult::FullClear => {
                        stats.full_clears += 1;
                        let payout = report.round.payout.unwrap_or(Credits::ZERO);
                        stats.paid = stats.paid.checked_add(payout).unwrap_or(stats.paid);
                        break 'cells;
                    }
                }
            }
        }

        let still_playing = service
            .current_round(token)
            .await?
            .map(|r| r.state == RoundState::Playing)
            .unwrap_or(false);
        if still_playing {
            let report = service.cash_out(token).await?;
            stats.cashed_out += 1;
            stats.paid = stats.paid.checked_add(report.payout).unwrap_or(stats.paid);
        }
    }

    let rtp = if stats.staked.is_positive() {
        stats.paid.to_decimal() / stats.staked.to_decimal()
    } else {
        0.0
    };
    let balance = service.account(token).await?.credits;

    println!("Simulated {} rounds ({} mines, {} reveals)", stats.rounds, mines, reveals);
    println!("   Busted:      {}", stats.busted);
    println!("   Cashed out:  {}", stats.cashed_out);
    println!("   Full clears: {}", stats.full_clears);
    println!("   Staked:      {}", stats.staked);
    println!("   Paid:        {}", stats.paid);
    println!("   RTP:         {:.4}", rtp);
    println!("   Balance:     {}", balance);
    Ok(())
}

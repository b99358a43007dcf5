//! Automated market engine operator CLI
//!
//! Commands:
//! - `ping`: Check token data API connectivity
//! - `trending`: Show trending tokens with their milestone targets and battle pairs
//! - `create`: Run one creation cycle (manual trigger)
//! - `resolve`: Run one resolution pass
//! - `markets`: List markets in the local store
//! - `run`: Run both periodic tasks until Ctrl+C
//!
//! `create`, `resolve` and `run` open `--state-file` for writing: every change
//! is saved as it happens, and `<state-file>.lock` keeps a second writer out.
//! Only one of them may use a given state file at a time; `markets` and
//! `trending` only read it.
//!
//! # Usage
//! ```bash
//! # Next archetype in rotation
//! market_engine create
//!
//! # Force an archetype
//! market_engine create --type battle_race
//!
//! # Resolution pass over single-token rows only
//! market_engine resolve --scope single
//!
//! # Scheduler (state persisted to --state-file as it changes)
//! TOKEN_API_KEY=... market_engine run --creation-interval 3600
//! ```

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use memecoin_markets::builder::{battle_eligible, battle_targets, single_target, used_tokens};
use memecoin_markets::market_image::FileCompositor;
use memecoin_markets::matcher::find_battle_pair;
use memecoin_markets::milestone::format_usd;
use memecoin_markets::provider::{HttpTokenProvider, RateLimitedProvider, TokenDataProvider};
use memecoin_markets::publish::BroadcastPublisher;
use memecoin_markets::question::format_target;
use memecoin_markets::rotation::RotationState;
use memecoin_markets::store::{InMemoryMarketStore, MarketStore};
use memecoin_markets::{
    CheckScope, EngineConfig, EngineService, MarketBuilder, MarketType, ProviderCredentials, ResolutionChecker,
    TriggerSource, TrendingToken,
};

#[derive(Parser)]
#[command(name = "market_engine")]
#[command(about = "Automated memecoin market engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Token data API base URL
    #[arg(long, env = "MARKET_ENGINE_PROVIDER_URL", global = true)]
    provider_url: Option<String>,

    /// JSON snapshot of the local market store
    #[arg(long, env = "MARKET_ENGINE_STATE_FILE", global = true)]
    state_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check token data API connectivity
    Ping,

    /// Show trending tokens with milestone targets and battle pairs
    Trending {
        /// Maximum tokens to print
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Run one creation cycle
    Create {
        /// Archetype to create (market_cap, volume, holders, battle_race, battle_dump); default: rotation
        #[arg(long = "type", value_parser = parse_market_type)]
        market_type: Option<MarketType>,

        /// Output file for the report JSON (optional, defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run one resolution pass
    Resolve {
        /// Rows to check
        #[arg(long, value_enum, default_value = "all")]
        scope: ScopeArg,

        /// Output file for the report JSON (optional, defaults to stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List markets in the local store
    Markets {
        /// Only active markets
        #[arg(long, default_value = "false")]
        active: bool,
    },

    /// Run creation and resolution on their intervals until Ctrl+C
    Run {
        /// Creation interval in seconds
        #[arg(long)]
        creation_interval: Option<u64>,

        /// Resolution tick in seconds
        #[arg(long)]
        resolution_interval: Option<u64>,

        /// Battle check interval in seconds
        #[arg(long)]
        battle_interval: Option<u64>,

        /// Disable scheduled creation (resolution keeps running)
        #[arg(long, default_value = "false")]
        no_auto_create: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    All,
    Single,
}

impl From<ScopeArg> for CheckScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::All => CheckScope::All,
            ScopeArg::Single => CheckScope::SingleToken,
        }
    }
}

fn parse_market_type(s: &str) -> Result<MarketType, String> {
    MarketType::parse(s).ok_or_else(|| format!("unknown market type '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let mut config = EngineConfig::from_env()?;
    if let Some(url) = cli.provider_url {
        config.provider_base_url = url;
    }
    if let Some(path) = cli.state_file {
        config.state_file = path;
    }

    match cli.command {
        Commands::Ping => run_ping(&config).await,
        Commands::Trending { limit } => run_trending(&config, limit).await,
        Commands::Create { market_type, out } => run_create(&config, market_type, out).await,
        Commands::Resolve { scope, out } => run_resolve(&config, scope.into(), out).await,
        Commands::Markets { active } => run_markets(&config, active).await,
        Commands::Run { creation_interval, resolution_interval, battle_interval, no_auto_create } => {
            if let Some(secs) = creation_interval {
                config.creation_interval_secs = secs;
            }
            if let Some(secs) = resolution_interval {
                config.resolution_interval_secs = secs;
            }
            if let Some(secs) = battle_interval {
                config.battle_check_interval_secs = secs;
            }
            if no_auto_create {
                config.auto_create_enabled = false;
            }
            config.validate()?;
            run_engine(config).await
        }
    }
}

fn http_provider(config: &EngineConfig) -> Result<HttpTokenProvider> {
    let credentials = ProviderCredentials::from_env();
    if credentials.is_none() {
        warn!("TOKEN_API_KEY not set, calling provider without an API key");
    }
    HttpTokenProvider::with_base_url(&config.provider_base_url, credentials)
}

fn rotation_path(state_file: &Path) -> PathBuf {
    state_file.with_extension("rotation.json")
}

/// Engine over the write-through store; holds the state file lock until dropped
async fn build_engine(config: &EngineConfig) -> Result<EngineService> {
    let provider = Arc::new(RateLimitedProvider::with_interval(http_provider(config)?, config.provider_min_interval()));
    let store = Arc::new(InMemoryMarketStore::open(&config.state_file).await?);
    let publisher = Arc::new(BroadcastPublisher::new());
    let compositor = Arc::new(FileCompositor::new(config.image_dir.clone(), &config.image_url_prefix)?);

    let rotation_file = rotation_path(&config.state_file);
    let builder = MarketBuilder::new(provider.clone(), store.clone(), publisher.clone())
        .with_compositor(compositor)
        .with_rotation(RotationState::load(&rotation_file).await?);
    let checker = ResolutionChecker::new(provider, store, publisher)
        .with_window_secs(config.resolution_window_secs)
        .with_overdue_grace_secs(config.overdue_refund_grace_secs);

    Ok(EngineService::new(builder, checker, config.clone()).with_rotation_file(rotation_file))
}

async fn write_report(json: String, out: Option<PathBuf>) -> Result<()> {
    if let Some(out_path) = out {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&out_path, &json).await?;
        info!("Report written to: {}", out_path.display());
    } else {
        println!();
        println!("{}", json);
    }
    Ok(())
}

async fn run_ping(config: &EngineConfig) -> Result<()> {
    info!("Token API: {}", config.provider_base_url);
    let provider = http_provider(config)?;
    match provider.test_connectivity().await {
        Ok(()) => {
            info!("Provider reachable");
            Ok(())
        }
        Err(e) => {
            error!("Provider check failed: {:#}", e);
            Err(e)
        }
    }
}

async fn run_trending(config: &EngineConfig, limit: usize) -> Result<()> {
    let provider = http_provider(config)?;
    let store = InMemoryMarketStore::load(&config.state_file).await?;
    let now = Utc::now();

    let tokens = provider.list_trending().await?;
    info!("=== Trending tokens ({}) ===", tokens.len());

    let target = |t: MarketType, token: &TrendingToken| {
        single_target(t, token).map(|v| format_target(t, v)).unwrap_or_else(|| "-".to_string())
    };
    for token in tokens.iter().take(limit) {
        info!(
            "{:<16} mc={:<8} vol={:<8} holders={:<6} age={:.1}h | mc->{} vol->{} holders->{}",
            token.name,
            format_usd(token.market_cap),
            format_usd(token.volume_24h),
            token.holders,
            token.age_hours(now),
            target(MarketType::MarketCap, token),
            target(MarketType::Volume, token),
            target(MarketType::Holders, token),
        );
    }

    let used = used_tokens(&store.list_active_automated_markets().await?);
    info!("");
    for battle in [MarketType::BattleRace, MarketType::BattleDump] {
        let eligible: Vec<_> = tokens.iter().filter(|t| battle_eligible(battle, t)).cloned().collect();
        match find_battle_pair(&eligible, &used, now) {
            Some((a, b)) => {
                let (shown, t1, t2) = battle_targets(battle, a, b);
                info!(
                    "{}: {} vs {} (shown {}, targets {} / {})",
                    battle,
                    a.name,
                    b.name,
                    format_usd(shown),
                    format_usd(t1),
                    format_usd(t2)
                );
            }
            None => info!("{}: no comparable pair", battle),
        }
    }

    Ok(())
}

async fn run_create(config: &EngineConfig, market_type: Option<MarketType>, out: Option<PathBuf>) -> Result<()> {
    let engine = build_engine(config).await?;

    let report = match market_type {
        Some(t) => engine.trigger_creation_for(t).await,
        None => engine.trigger_creation(TriggerSource::Manual).await,
    };

    if report.market_created {
        info!("=== Market created ===");
    } else if report.success {
        info!("No market created: {}", report.message);
    } else {
        error!("Creation failed: {}", report.message);
    }
    write_report(serde_json::to_string_pretty(&report)?, out).await?;

    if !report.success {
        anyhow::bail!("Creation cycle failed");
    }
    Ok(())
}

async fn run_resolve(config: &EngineConfig, scope: CheckScope, out: Option<PathBuf>) -> Result<()> {
    let engine = build_engine(config).await?;

    let report = engine.trigger_resolution(scope).await;

    for failure in &report.failures {
        warn!("Market {} not resolved: {}", failure.market_id, failure.error);
    }
    write_report(serde_json::to_string_pretty(&report)?, out).await?;

    if !report.success {
        anyhow::bail!("Resolution pass failed");
    }
    Ok(())
}

async fn run_markets(config: &EngineConfig, active_only: bool) -> Result<()> {
    let store = InMemoryMarketStore::load(&config.state_file).await?;
    let markets = if active_only { store.list_active_automated_markets().await? } else { store.all_markets().await };

    for market in &markets {
        let market_type = market.archetype().map(|t| t.to_string()).unwrap_or_else(|| "?".to_string());
        info!(
            "{} [{:?}] {:<12} expires {} | {}",
            market.id, market.status, market_type, market.expires_at, market.question
        );
    }
    info!("{} markets", markets.len());
    Ok(())
}

async fn run_engine(config: EngineConfig) -> Result<()> {
    let engine = build_engine(&config).await?;
    info!("State file: {}", config.state_file.display());

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, shutting down...");
        shutdown_clone.store(true, Ordering::Relaxed);
    });

    engine.run(shutdown).await;
    Ok(())
}

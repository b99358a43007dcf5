//! Engine service - serialised entry points and the periodic task loops
//!
//! Creation and resolution each sit behind their own lock. A trigger that
//! finds its task busy returns immediately instead of queueing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::builder::MarketBuilder;
use crate::checker::{CheckScope, ResolutionChecker};
use crate::config::EngineConfig;
use crate::types::{CreationReport, MarketType, ResolutionReport};

/// How often the loops look at the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Who asked for a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    /// Operator / admin endpoint, always allowed
    Manual,
    /// Periodic task, gated by `auto_create_enabled`
    Scheduled,
}

pub struct EngineService {
    builder: Mutex<MarketBuilder>,
    checker: Mutex<ResolutionChecker>,
    config: EngineConfig,
    rotation_file: Option<PathBuf>,
}

impl EngineService {
    pub fn new(builder: MarketBuilder, checker: ResolutionChecker, config: EngineConfig) -> Self {
        Self { builder: Mutex::new(builder), checker: Mutex::new(checker), config, rotation_file: None }
    }

    /// Save the rotation state to `path` after every created market
    pub fn with_rotation_file(mut self, path: PathBuf) -> Self {
        self.rotation_file = Some(path);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn trigger_creation(&self, source: TriggerSource) -> CreationReport {
        if source == TriggerSource::Scheduled && !self.config.auto_create_enabled {
            return CreationReport::skipped(None, "Automatic market creation is disabled");
        }
        let Ok(mut builder) = self.builder.try_lock() else {
            warn!("Creation trigger ({:?}) ignored: cycle already running", source);
            return CreationReport::failed(None, "Creation cycle already running");
        };
        let report = builder.run_cycle(Utc::now()).await;
        self.persist_rotation(&builder, &report).await;
        report
    }

    /// Manual creation of one specific archetype
    pub async fn trigger_creation_for(&self, market_type: MarketType) -> CreationReport {
        let Ok(mut builder) = self.builder.try_lock() else {
            return CreationReport::failed(Some(market_type), "Creation cycle already running");
        };
        let report = builder.run_cycle_for(market_type, Utc::now()).await;
        self.persist_rotation(&builder, &report).await;
        report
    }

    async fn persist_rotation(&self, builder: &MarketBuilder, report: &CreationReport) {
        let Some(path) = &self.rotation_file else { return };
        if !report.market_created {
            return;
        }
        if let Err(e) = builder.rotation().save(path).await {
            warn!("Failed to save rotation state to {}: {:#}", path.display(), e);
        }
    }

    pub async fn trigger_resolution(&self, scope: CheckScope) -> ResolutionReport {
        let Ok(checker) = self.checker.try_lock() else {
            warn!("Resolution trigger ignored: cycle already running");
            return ResolutionReport::failed("Resolution cycle already running");
        };
        checker.check(Utc::now(), scope).await
    }

    /// Drive both periodic tasks until `shutdown` is set
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            "Engine started: creation every {}s, resolution every {}s, battle checks every {}s, auto-create {}",
            self.config.creation_interval_secs,
            self.config.resolution_interval_secs,
            self.config.battle_check_interval_secs,
            if self.config.auto_create_enabled { "on" } else { "off" }
        );

        tokio::join!(self.creation_loop(&shutdown), self.resolution_loop(&shutdown));
        info!("Engine stopped");
    }

    async fn creation_loop(&self, shutdown: &AtomicBool) {
        let mut ticks = ticker(self.config.creation_interval_secs);
        let mut poll = interval(SHUTDOWN_POLL);

        while !shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                _ = ticks.tick() => {
                    let report = self.trigger_creation(TriggerSource::Scheduled).await;
                    if !report.success {
                        warn!("Scheduled creation failed: {}", report.message);
                    }
                }
                _ = poll.tick() => {}
            }
        }
    }

    async fn resolution_loop(&self, shutdown: &AtomicBool) {
        let mut ticks = ticker(self.config.resolution_interval_secs);
        let mut battle_ticks = ticker(self.config.battle_check_interval_secs);
        let mut poll = interval(SHUTDOWN_POLL);

        while !shutdown.load(Ordering::Relaxed) {
            let scope = tokio::select! {
                biased;
                _ = battle_ticks.tick() => Some(CheckScope::All),
                _ = ticks.tick() => Some(CheckScope::SingleToken),
                _ = poll.tick() => None,
            };
            if let Some(scope) = scope {
                let report = self.trigger_resolution(scope).await;
                if !report.success {
                    warn!("Scheduled resolution failed: {}", report.message.unwrap_or_default());
                }
            }
        }
    }
}

fn ticker(secs: u64) -> Interval {
    let mut ticks = interval(Duration::from_secs(secs.max(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};

    use crate::provider::TokenDataProvider;
    use crate::publish::BroadcastPublisher;
    use crate::rotation::RotationState;
    use crate::store::{InMemoryMarketStore, MarketStore};
    use crate::types::{BattleKind, Candle, TokenDetail, TrendingToken};

    /// Two comparable tokens, empty charts
    #[derive(Default)]
    struct TwoTokens {
        chart_calls: AtomicUsize,
    }

    fn trending(tag: char, name: &str, market_cap: f64) -> TrendingToken {
        TrendingToken {
            address: tag.to_string().repeat(40),
            name: name.to_string(),
            symbol: None,
            market_cap,
            volume_24h: 100_000.0,
            holders: 400,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
            image: None,
        }
    }

    #[async_trait]
    impl TokenDataProvider for TwoTokens {
        async fn list_trending(&self) -> Result<Vec<TrendingToken>> {
            Ok(vec![trending('A', "Alpha", 300_000.0), trending('B', "Beta", 320_000.0)])
        }

        async fn lookup_batch(&self, _addresses: &[String]) -> Result<HashMap<String, TokenDetail>> {
            Ok(HashMap::new())
        }

        async fn chart(&self, _address: &str, _interval: &str, _limit: u32) -> Result<Vec<Candle>> {
            self.chart_calls.fetch_add(1, Ordering::Relaxed);
            Ok(Vec::new())
        }
    }

    fn service(config: EngineConfig) -> (EngineService, Arc<InMemoryMarketStore>, Arc<TwoTokens>) {
        let store = Arc::new(InMemoryMarketStore::new());
        let provider = Arc::new(TwoTokens::default());
        let publisher = Arc::new(BroadcastPublisher::new());
        let builder = MarketBuilder::new(provider.clone(), store.clone(), publisher.clone());
        let checker = ResolutionChecker::new(provider.clone(), store.clone(), publisher);
        (EngineService::new(builder, checker, config), store, provider)
    }

    async fn run_for(service: EngineService, duration: Duration) {
        let service = Arc::new(service);
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { service.run(shutdown).await })
        };

        tokio::time::sleep(duration).await;
        shutdown.store(true, Ordering::Relaxed);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_creation_respects_disable_flag() {
        let config = EngineConfig { auto_create_enabled: false, ..Default::default() };
        let (service, store, _) = service(config);

        let report = service.trigger_creation(TriggerSource::Scheduled).await;
        assert!(report.success);
        assert!(!report.market_created);
        assert!(store.all_markets().await.is_empty());

        let report = service.trigger_creation(TriggerSource::Manual).await;
        assert!(report.market_created);
    }

    #[tokio::test]
    async fn test_overlapping_creation_rejected() {
        let (service, _, _) = service(EngineConfig::default());

        let _running = service.builder.lock().await;
        let report = service.trigger_creation(TriggerSource::Manual).await;
        assert!(!report.success);
        assert!(report.message.contains("already running"));
    }

    #[tokio::test]
    async fn test_overlapping_resolution_rejected() {
        let (service, _, _) = service(EngineConfig::default());

        let _running = service.checker.lock().await;
        let report = service.trigger_resolution(CheckScope::All).await;
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_forced_archetype() {
        let (service, _, _) = service(EngineConfig::default());
        let report = service.trigger_creation_for(MarketType::Holders).await;
        assert!(report.market_created);
        assert_eq!(report.market_type, Some(MarketType::Holders));
    }

    #[tokio::test]
    async fn test_rotation_saved_after_battle_created() {
        let path = std::env::temp_dir().join(format!("rotation-{}.json", uuid::Uuid::new_v4()));
        let (service, _, _) = service(EngineConfig::default());
        let service = service.with_rotation_file(path.clone());

        let report = service.trigger_creation_for(MarketType::BattleRace).await;
        assert!(report.market_created);
        assert_eq!(RotationState::load(&path).await.unwrap().last_battle, Some(BattleKind::Race));

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_battle_rows_checked_on_battle_interval_only() {
        let config = EngineConfig { auto_create_enabled: false, ..Default::default() };
        let (service, _, provider) = service(config);
        assert!(service.trigger_creation_for(MarketType::BattleRace).await.market_created);

        run_for(service, Duration::from_secs(90 * 60 + 1)).await;

        // All-scope passes at 0, 30, 60 and 90 minutes, one chart per token;
        // the 60 s single-token ticks in between never fetch charts
        assert_eq!(provider.chart_calls.load(Ordering::Relaxed), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_creates_on_first_tick_and_stops() {
        let (service, store, _) = service(EngineConfig::default());
        run_for(service, Duration::from_secs(5)).await;

        let markets = store.list_active_automated_markets().await.unwrap();
        assert_eq!(markets.len(), 1);
        assert!(markets[0].expires_at > markets[0].created_at + ChronoDuration::minutes(119));
    }
}

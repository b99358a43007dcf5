//! Market Builder - one automated market creation cycle
//!
//! # Algorithm
//! 1. Read active automated markets, ask the Rotation Selector for an archetype
//! 2. Fetch trending tokens (one provider call)
//! 3. Single-token: first eligible unused token + milestone target
//!    Battle: first comparable unused pair + race/dump targets
//! 4. Question text, image, expiration
//! 5. Persist market + pending tracking row as one unit
//! 6. Advance rotation state, publish creation event
//!
//! "Nothing eligible" ends the cycle with `market_created = false`; only
//! provider and store failures make it unsuccessful.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{CycleError, CycleResult};
use crate::market_image::{battle_image, ImageCompositor};
use crate::matcher::{find_battle_pair, is_valid_address, UsedTokens};
use crate::milestone::{doubling_milestone, dump_target, holder_milestone, MAX_MILESTONE};
use crate::provider::TokenDataProvider;
use crate::publish::EventPublisher;
use crate::question::{battle_question, market_duration, single_question};
use crate::rotation::{select_archetype, RotationState};
use crate::store::MarketStore;
use crate::types::{CreationReport, EngineEvent, Market, MarketType, NewMarket, NewTracking, TrendingToken};

/// Target for a single-token market, if the token qualifies
pub fn single_target(market_type: MarketType, token: &TrendingToken) -> Option<f64> {
    match market_type {
        MarketType::MarketCap | MarketType::Volume => {
            let current = token.metric(market_type)?;
            if current <= 0.0 || current >= MAX_MILESTONE {
                return None;
            }
            Some(doubling_milestone(current))
        }
        MarketType::Holders => holder_milestone(token.holders).map(|h| h as f64),
        MarketType::BattleRace | MarketType::BattleDump => None,
    }
}

/// Whether a token can take part in a battle of this archetype
pub fn battle_eligible(market_type: MarketType, token: &TrendingToken) -> bool {
    let mc = token.market_cap;
    match market_type {
        MarketType::BattleRace => mc > 0.0 && mc < MAX_MILESTONE,
        // the dump target has to sit below the current cap
        MarketType::BattleDump => mc > 0.0 && dump_target(mc) < mc,
        _ => false,
    }
}

/// Battle targets: (shown in question, token 1, token 2)
pub fn battle_targets(market_type: MarketType, token_1: &TrendingToken, token_2: &TrendingToken) -> (f64, f64, f64) {
    match market_type {
        MarketType::BattleDump => {
            let shown = dump_target((token_1.market_cap + token_2.market_cap) / 2.0);
            (shown, dump_target(token_1.market_cap), dump_target(token_2.market_cap))
        }
        _ => {
            let target = doubling_milestone(token_1.market_cap.max(token_2.market_cap));
            (target, target, target)
        }
    }
}

/// Addresses of every active automated market, names of the single-token ones
pub fn used_tokens(active: &[Market]) -> UsedTokens {
    let mut used = UsedTokens::new();
    for market in active {
        used.add_address(&market.token_address);
        if let Some(address) = &market.token_address_2 {
            used.add_address(address);
        }
        let is_battle = market.archetype().map(|t| t.is_battle()).unwrap_or(false);
        if !is_battle {
            used.add_name(&market.token_name);
        }
    }
    used
}

/// Creates automated markets, one per cycle
pub struct MarketBuilder {
    provider: Arc<dyn TokenDataProvider>,
    store: Arc<dyn MarketStore>,
    publisher: Arc<dyn EventPublisher>,
    compositor: Option<Arc<dyn ImageCompositor>>,
    rotation: RotationState,
}

impl MarketBuilder {
    pub fn new(
        provider: Arc<dyn TokenDataProvider>,
        store: Arc<dyn MarketStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { provider, store, publisher, compositor: None, rotation: RotationState::new() }
    }

    pub fn with_compositor(mut self, compositor: Arc<dyn ImageCompositor>) -> Self {
        self.compositor = Some(compositor);
        self
    }

    pub fn with_rotation(mut self, rotation: RotationState) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn rotation(&self) -> &RotationState {
        &self.rotation
    }

    /// Run one creation cycle using the rotation order
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CreationReport {
        self.run(None, now).await
    }

    /// Run one creation cycle for a specific archetype (manual trigger).
    /// Still refuses an archetype that already has an active market.
    pub async fn run_cycle_for(&mut self, market_type: MarketType, now: DateTime<Utc>) -> CreationReport {
        self.run(Some(market_type), now).await
    }

    async fn run(&mut self, forced: Option<MarketType>, now: DateTime<Utc>) -> CreationReport {
        match self.try_cycle(forced, now).await {
            Ok(report) => report,
            Err(e) => {
                if e.is_persistence() {
                    warn!("Creation cycle failed after fetching data; re-run manually: {}", e);
                } else {
                    warn!("Creation cycle failed: {}", e);
                }
                CreationReport::failed(forced, e.to_string())
            }
        }
    }

    async fn try_cycle(&mut self, forced: Option<MarketType>, now: DateTime<Utc>) -> CycleResult<CreationReport> {
        let active = self.store.list_active_automated_markets().await.map_err(CycleError::Persistence)?;

        let market_type = match forced {
            Some(t) => {
                if !archetype_free(t, &active) {
                    return Ok(CreationReport::skipped(Some(t), format!("An active {} market already exists", t)));
                }
                t
            }
            None => match select_archetype(&self.rotation, &active) {
                Some(t) => t,
                None => return Ok(CreationReport::skipped(None, "All automated market slots are occupied")),
            },
        };
        info!("Creation cycle: archetype {} ({} active automated markets)", market_type, active.len());

        let tokens = self.provider.list_trending().await.map_err(CycleError::Provider)?;
        if tokens.is_empty() {
            return Ok(CreationReport::skipped(Some(market_type), "Trending token list is empty"));
        }
        debug!("Fetched {} trending tokens", tokens.len());

        let used = used_tokens(&active);
        let planned = if market_type.is_battle() {
            self.plan_battle(market_type, &tokens, &used, now).await
        } else {
            plan_single(market_type, &tokens, &used, now)
        };

        let (new_market, new_tracking) = match planned {
            Some(p) => p,
            None => {
                info!("No eligible tokens for {} market", market_type);
                return Ok(CreationReport::skipped(Some(market_type), format!("No eligible tokens for {}", market_type)));
            }
        };

        let (market, _tracking) = self
            .store
            .create_automated_market(new_market, new_tracking)
            .await
            .map_err(CycleError::Persistence)?;

        self.rotation.commit(market_type);
        info!("Created {} market {}: {}", market_type, market.id, market.question);

        self.publisher.publish(EngineEvent::MarketCreated {
            market_id: market.id.clone(),
            market_type,
            question: market.question.clone(),
            expires_at: market.expires_at,
        });

        Ok(CreationReport::created(market))
    }

    async fn plan_battle(
        &self,
        market_type: MarketType,
        tokens: &[TrendingToken],
        used: &UsedTokens,
        now: DateTime<Utc>,
    ) -> Option<(NewMarket, NewTracking)> {
        let eligible: Vec<TrendingToken> =
            tokens.iter().filter(|t| battle_eligible(market_type, t)).cloned().collect();
        let (token_1, token_2) = find_battle_pair(&eligible, used, now)?;

        let (shown, target_1, target_2) = battle_targets(market_type, token_1, token_2);
        let question = battle_question(market_type, &token_1.name, &token_2.name, shown);
        let image = battle_image(self.compositor.as_deref(), token_1.image.as_deref(), token_2.image.as_deref()).await;

        let market = NewMarket {
            question,
            market_type,
            token_address: token_1.address.clone(),
            token_name: token_1.name.clone(),
            token_address_2: Some(token_2.address.clone()),
            token_name_2: Some(token_2.name.clone()),
            image,
            created_at: now,
            expires_at: now + market_duration(market_type),
        };
        let tracking = NewTracking {
            market_type,
            target_value: shown,
            token_1_target: target_1,
            token_2_target: Some(target_2),
            token_address: token_1.address.clone(),
            token_address_2: Some(token_2.address.clone()),
        };
        Some((market, tracking))
    }
}

fn archetype_free(market_type: MarketType, active: &[Market]) -> bool {
    active.iter().filter_map(|m| m.archetype()).all(|t| {
        if market_type.is_battle() {
            !t.is_battle()
        } else {
            t != market_type
        }
    })
}

fn plan_single(
    market_type: MarketType,
    tokens: &[TrendingToken],
    used: &UsedTokens,
    now: DateTime<Utc>,
) -> Option<(NewMarket, NewTracking)> {
    let (token, target) = tokens
        .iter()
        .filter(|t| is_valid_address(&t.address) && !used.contains(t))
        .find_map(|t| single_target(market_type, t).map(|target| (t, target)))?;

    let question = single_question(market_type, &token.name, target)?;
    debug!("Selected {} for {} market, target {}", token.name, market_type, target);

    let market = NewMarket {
        question,
        market_type,
        token_address: token.address.clone(),
        token_name: token.name.clone(),
        token_address_2: None,
        token_name_2: None,
        image: token.image.clone(),
        created_at: now,
        expires_at: now + market_duration(market_type),
    };
    let tracking = NewTracking {
        market_type,
        target_value: target,
        token_1_target: target,
        token_2_target: None,
        token_address: token.address.clone(),
        token_address_2: None,
    };
    Some((market, tracking))
}

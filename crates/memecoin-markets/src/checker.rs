//! Resolution Checker - drives pending tracking rows to resolved or refunded
//!
//! # Single-token rows
//! Act only inside `expires_at ± window`: one batched lookup for every due
//! token, then `yes` when the current metric reached the target, else `no`.
//! Rows that missed the window by more than the grace period are refunded.
//!
//! # Battle rows
//! Every `CheckScope::All` pass pulls 5-minute market-cap candles since
//! creation for each token without a hit. Race hits on `high >= target`,
//! dump hits on `low <= target`. First hit wins (token 1 on a tie); no hit
//! by expiry means refund.
//!
//! A failing row is reported and skipped; the rest of the pass continues.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_OVERDUE_REFUND_GRACE_SECS, DEFAULT_RESOLUTION_WINDOW_SECS};
use crate::error::{CycleError, CycleResult};
use crate::provider::TokenDataProvider;
use crate::publish::EventPublisher;
use crate::store::MarketStore;
use crate::types::{
    BattleKind, Candle, EngineEvent, Outcome, ResolutionReport, ResolutionTracking, RowFailure, TokenDetail,
    TokenSlot,
};

/// Candle interval requested for battle checks
pub const CHART_INTERVAL: &str = "5m";

const CANDLE_MINUTES: f64 = 5.0;

/// Upper bound on candles per chart request
pub const MAX_CANDLES: u32 = 1000;

/// Which pending rows a pass looks at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckScope {
    /// Single-token and battle rows
    All,
    /// Single-token rows only (no chart lookups)
    SingleToken,
}

/// What to do with a single-token row at `now`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SingleAction {
    Wait,
    Resolve,
    Refund,
}

pub fn single_action(row: &ResolutionTracking, now: DateTime<Utc>, window: Duration, grace: Duration) -> SingleAction {
    let delta = now - row.expires_at;
    if delta.abs() <= window {
        SingleAction::Resolve
    } else if delta > window + grace {
        SingleAction::Refund
    } else {
        SingleAction::Wait
    }
}

/// Candles needed to cover `created_at..now` at the chart interval
pub fn chart_limit(created_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let elapsed_min = (now - created_at).num_seconds().max(0) as f64 / 60.0;
    let limit = (elapsed_min / CANDLE_MINUTES).ceil() as u32 + 1;
    limit.min(MAX_CANDLES)
}

/// Earliest candle inside `[from, until]` that crosses `target`
pub fn first_hit(
    kind: BattleKind,
    candles: &[Candle],
    target: f64,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    candles
        .iter()
        .filter(|c| match kind {
            BattleKind::Race => c.high >= target,
            BattleKind::Dump => c.low <= target,
        })
        .filter_map(|c| c.opened_at())
        .filter(|at| *at >= from && *at <= until)
        .min()
}

/// Winner once at least one token has a hit-time (`Yes` = token 1)
pub fn battle_winner(hit_1: Option<DateTime<Utc>>, hit_2: Option<DateTime<Utc>>) -> Option<Outcome> {
    match (hit_1, hit_2) {
        (Some(a), Some(b)) => Some(if a <= b { Outcome::Yes } else { Outcome::No }),
        (Some(_), None) => Some(Outcome::Yes),
        (None, Some(_)) => Some(Outcome::No),
        (None, None) => None,
    }
}

enum Transition {
    Resolved(Outcome),
    Refunded,
}

pub struct ResolutionChecker {
    provider: Arc<dyn TokenDataProvider>,
    store: Arc<dyn MarketStore>,
    publisher: Arc<dyn EventPublisher>,
    window: Duration,
    grace: Duration,
}

impl ResolutionChecker {
    pub fn new(
        provider: Arc<dyn TokenDataProvider>,
        store: Arc<dyn MarketStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            provider,
            store,
            publisher,
            window: Duration::seconds(DEFAULT_RESOLUTION_WINDOW_SECS),
            grace: Duration::seconds(DEFAULT_OVERDUE_REFUND_GRACE_SECS),
        }
    }

    pub fn with_window_secs(mut self, secs: i64) -> Self {
        self.window = Duration::seconds(secs);
        self
    }

    pub fn with_overdue_grace_secs(mut self, secs: i64) -> Self {
        self.grace = Duration::seconds(secs);
        self
    }

    /// Run one resolution pass
    pub async fn check(&self, now: DateTime<Utc>, scope: CheckScope) -> ResolutionReport {
        let rows = match self.store.list_pending_trackings().await {
            Ok(rows) => rows,
            Err(e) => {
                let err = CycleError::Persistence(e);
                warn!("Resolution pass aborted: {}", err);
                return ResolutionReport::failed(err.to_string());
            }
        };

        let mut report = ResolutionReport { success: true, ..Default::default() };
        let (battles, singles): (Vec<_>, Vec<_>) = rows.into_iter().partition(|r| r.market_type.is_battle());

        self.check_singles(&singles, now, &mut report).await;
        if scope == CheckScope::All {
            for row in &battles {
                report.checked += 1;
                let result = self.check_battle(row, now).await;
                self.apply(row, result, &mut report);
            }
        }

        info!(
            "Resolution pass ({:?}): checked={} resolved={} refunded={} failures={}",
            scope,
            report.checked,
            report.resolved,
            report.refunded,
            report.failures.len()
        );
        report
    }

    async fn check_singles(&self, rows: &[ResolutionTracking], now: DateTime<Utc>, report: &mut ResolutionReport) {
        let mut due = Vec::new();
        for row in rows {
            match single_action(row, now, self.window, self.grace) {
                SingleAction::Wait => {}
                SingleAction::Resolve => due.push(row),
                SingleAction::Refund => {
                    report.checked += 1;
                    warn!("Market {} missed its resolution window, refunding", row.market_id);
                    let result = self
                        .store
                        .mark_refunded(&row.market_id, now)
                        .await
                        .map(|_| Some(Transition::Refunded))
                        .map_err(CycleError::Persistence);
                    self.apply(row, result, report);
                }
            }
        }
        if due.is_empty() {
            return;
        }

        let mut addresses: Vec<String> = due.iter().map(|r| r.token_address.clone()).collect();
        addresses.sort();
        addresses.dedup();
        debug!("Looking up {} tokens for {} due markets", addresses.len(), due.len());

        let details = self.provider.lookup_batch(&addresses).await;
        for row in due {
            report.checked += 1;
            let result = match &details {
                Ok(details) => self.resolve_single(row, details, now).await,
                Err(e) => Err(CycleError::Provider(anyhow::anyhow!("{:#}", e))),
            };
            self.apply(row, result, report);
        }
    }

    async fn resolve_single(
        &self,
        row: &ResolutionTracking,
        details: &HashMap<String, TokenDetail>,
        now: DateTime<Utc>,
    ) -> CycleResult<Option<Transition>> {
        let detail = details.get(&row.token_address).ok_or_else(|| {
            CycleError::Provider(anyhow::anyhow!("No data returned for token {}", row.token_address))
        })?;
        let current = detail
            .metric(row.market_type)
            .ok_or_else(|| CycleError::Internal(format!("No metric for {}", row.market_type)))?;

        let outcome = if current >= row.target_value { Outcome::Yes } else { Outcome::No };
        debug!(
            "Market {}: {} current={} target={} -> {:?}",
            row.market_id, row.market_type, current, row.target_value, outcome
        );
        self.store.mark_resolved(&row.market_id, outcome, now).await.map_err(CycleError::Persistence)?;
        Ok(Some(Transition::Resolved(outcome)))
    }

    async fn check_battle(&self, row: &ResolutionTracking, now: DateTime<Utc>) -> CycleResult<Option<Transition>> {
        let kind = BattleKind::from_market_type(row.market_type)
            .ok_or_else(|| CycleError::Internal(format!("{} is not a battle", row.market_type)))?;

        let slots = [TokenSlot::First, TokenSlot::Second];
        let mut hits = slots.map(|slot| row.hit_at(slot));
        for (i, slot) in slots.into_iter().enumerate() {
            if hits[i].is_some() {
                continue;
            }
            let address = row
                .address(slot)
                .ok_or_else(|| CycleError::Internal(format!("Tracking {} has no {:?} token", row.id, slot)))?;
            let target = row
                .target(slot)
                .ok_or_else(|| CycleError::Internal(format!("Tracking {} has no {:?} target", row.id, slot)))?;

            let candles = self
                .provider
                .chart(address, CHART_INTERVAL, chart_limit(row.created_at, now))
                .await
                .map_err(CycleError::Provider)?;

            if let Some(at) = first_hit(kind, &candles, target, row.created_at, row.expires_at) {
                info!("Market {}: token {} hit {} at {}", row.market_id, address, target, at);
                self.store.record_hit_time(&row.id, slot, at).await.map_err(CycleError::Persistence)?;
                hits[i] = Some(at);
            }
        }

        if let Some(outcome) = battle_winner(hits[0], hits[1]) {
            self.store.mark_resolved(&row.market_id, outcome, now).await.map_err(CycleError::Persistence)?;
            return Ok(Some(Transition::Resolved(outcome)));
        }

        if now > row.expires_at {
            info!("Market {}: neither token hit before expiry, refunding", row.market_id);
            self.store.mark_refunded(&row.market_id, now).await.map_err(CycleError::Persistence)?;
            return Ok(Some(Transition::Refunded));
        }

        Ok(None)
    }

    fn apply(&self, row: &ResolutionTracking, result: CycleResult<Option<Transition>>, report: &mut ResolutionReport) {
        match result {
            Ok(Some(Transition::Resolved(outcome))) => {
                report.resolved += 1;
                self.publisher.publish(EngineEvent::MarketResolved { market_id: row.market_id.clone(), outcome });
            }
            Ok(Some(Transition::Refunded)) => {
                report.refunded += 1;
                self.publisher.publish(EngineEvent::MarketRefunded { market_id: row.market_id.clone() });
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Market {}: resolution failed: {}", row.market_id, e);
                report.failures.push(RowFailure {
                    tracking_id: row.id.clone(),
                    market_id: row.market_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

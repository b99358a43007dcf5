//! In-process Market Store with JSON snapshots
//!
//! Used by the CLI (snapshot in `state_file`) and by tests. Both maps live
//! under one lock so every write covers market and tracking together.
//!
//! A store opened with `open` writes the snapshot on every change, before the
//! change becomes visible, and holds `<state_file>.lock` until dropped. Only one
//! writer may use a snapshot at a time.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::MarketStore;
use crate::types::{
    Market, MarketStatus, NewMarket, NewTracking, Outcome, ResolutionTracking, TokenSlot, TrackingStatus,
    MARKET_CATEGORY, PAYOUT_TYPE,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoreState {
    markets: HashMap<String, Market>,
    trackings: HashMap<String, ResolutionTracking>,
}

impl StoreState {
    fn tracking_for_market_mut(&mut self, market_id: &str) -> Option<&mut ResolutionTracking> {
        self.trackings.values_mut().find(|t| t.market_id == market_id)
    }
}

/// Exclusive claim on a snapshot path, released on drop
struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    async fn acquire(snapshot: &Path) -> Result<Self> {
        let mut name = OsString::from(snapshot.as_os_str());
        name.push(".lock");
        let path = PathBuf::from(name);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => anyhow::bail!(
                "Store snapshot {} is in use by another engine process (remove {} if none is running)",
                snapshot.display(),
                path.display()
            ),
            Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

struct Snapshot {
    path: PathBuf,
    _lock: WriterLock,
}

#[derive(Default)]
pub struct InMemoryMarketStore {
    state: RwLock<StoreState>,
    snapshot: Option<Snapshot>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view of a snapshot; a missing file yields an empty store.
    /// Changes stay in memory.
    pub async fn load(path: &Path) -> Result<Self> {
        let state = read_snapshot(path).await?;
        Ok(Self { state: RwLock::new(state), snapshot: None })
    }

    /// Open a snapshot for writing: every change is persisted before it is
    /// visible. Fails while another store holds the same snapshot.
    pub async fn open(path: &Path) -> Result<Self> {
        let lock = WriterLock::acquire(path).await?;
        let state = read_snapshot(path).await?;
        Ok(Self { state: RwLock::new(state), snapshot: Some(Snapshot { path: path.to_path_buf(), _lock: lock }) })
    }

    pub async fn all_markets(&self) -> Vec<Market> {
        let mut markets: Vec<Market> = self.state.read().await.markets.values().cloned().collect();
        markets.sort_by_key(|m| m.created_at);
        markets
    }

    pub async fn tracking_for_market(&self, market_id: &str) -> Option<ResolutionTracking> {
        self.state.read().await.trackings.values().find(|t| t.market_id == market_id).cloned()
    }

    /// Persist `next` (when snapshot-backed), then swap it in
    async fn commit(&self, state: &mut StoreState, next: StoreState) -> Result<()> {
        if let Some(snapshot) = &self.snapshot {
            write_snapshot(&snapshot.path, &next).await?;
        }
        *state = next;
        Ok(())
    }

    async fn finish(&self, market_id: &str, status: MarketStatus, outcome: Outcome, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();

        let market = next.markets.get(market_id).with_context(|| format!("Unknown market {}", market_id))?;
        if market.status != MarketStatus::Active {
            anyhow::bail!("Market {} is already {:?}", market_id, market.status);
        }
        let tracking = next
            .tracking_for_market_mut(market_id)
            .with_context(|| format!("No tracking row for market {}", market_id))?;
        if tracking.status != TrackingStatus::Pending {
            anyhow::bail!("Tracking {} is already {:?}", tracking.id, tracking.status);
        }

        tracking.status = match status {
            MarketStatus::Refunded => TrackingStatus::Refunded,
            _ => TrackingStatus::Resolved,
        };
        tracking.resolved_at = Some(at);

        if let Some(market) = next.markets.get_mut(market_id) {
            market.status = status;
            market.outcome = Some(outcome);
        }
        self.commit(&mut state, next).await
    }
}

async fn read_snapshot(path: &Path) -> Result<StoreState> {
    let state = match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse store snapshot {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No store snapshot at {}, starting empty", path.display());
            StoreState::default()
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };
    info!("Loaded store snapshot: {} markets, {} tracking rows", state.markets.len(), state.trackings.len());
    Ok(state)
}

/// Temp file + rename, so a crash leaves the previous snapshot intact
async fn write_snapshot(path: &Path, state: &StoreState) -> Result<()> {
    let json = serde_json::to_vec_pretty(state)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await.with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path).await.with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn create_automated_market(
        &self,
        new_market: NewMarket,
        new_tracking: NewTracking,
    ) -> Result<(Market, ResolutionTracking)> {
        let market = Market {
            id: Uuid::new_v4().to_string(),
            question: new_market.question,
            category: MARKET_CATEGORY.to_string(),
            is_automated: true,
            market_type: Some(new_market.market_type),
            token_address: new_market.token_address,
            token_name: new_market.token_name,
            token_address_2: new_market.token_address_2,
            token_name_2: new_market.token_name_2,
            image: new_market.image,
            payout_type: PAYOUT_TYPE.to_string(),
            created_at: new_market.created_at,
            expires_at: new_market.expires_at,
            status: MarketStatus::Active,
            outcome: None,
        };

        let tracking = ResolutionTracking {
            id: Uuid::new_v4().to_string(),
            market_id: market.id.clone(),
            market_type: new_tracking.market_type,
            target_value: new_tracking.target_value,
            token_1_target: new_tracking.token_1_target,
            token_2_target: new_tracking.token_2_target,
            token_address: new_tracking.token_address,
            token_address_2: new_tracking.token_address_2,
            status: TrackingStatus::Pending,
            token_1_hit_at: None,
            token_2_hit_at: None,
            created_at: market.created_at,
            expires_at: market.expires_at,
            resolved_at: None,
        };

        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.markets.insert(market.id.clone(), market.clone());
        next.trackings.insert(tracking.id.clone(), tracking.clone());
        self.commit(&mut state, next).await?;
        Ok((market, tracking))
    }

    async fn list_active_automated_markets(&self) -> Result<Vec<Market>> {
        let state = self.state.read().await;
        let mut markets: Vec<Market> =
            state.markets.values().filter(|m| m.is_automated && m.is_active()).cloned().collect();
        markets.sort_by_key(|m| m.created_at);
        Ok(markets)
    }

    async fn list_pending_trackings(&self) -> Result<Vec<ResolutionTracking>> {
        let state = self.state.read().await;
        let mut rows: Vec<ResolutionTracking> = state.trackings.values().filter(|t| t.is_pending()).cloned().collect();
        rows.sort_by_key(|t| t.created_at);
        Ok(rows)
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>> {
        Ok(self.state.read().await.markets.get(market_id).cloned())
    }

    async fn record_hit_time(&self, tracking_id: &str, slot: TokenSlot, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let tracking =
            next.trackings.get_mut(tracking_id).with_context(|| format!("Unknown tracking row {}", tracking_id))?;
        let field = match slot {
            TokenSlot::First => &mut tracking.token_1_hit_at,
            TokenSlot::Second => &mut tracking.token_2_hit_at,
        };
        if field.is_some() {
            return Ok(());
        }
        *field = Some(at);
        self.commit(&mut state, next).await
    }

    async fn mark_resolved(&self, market_id: &str, outcome: Outcome, at: DateTime<Utc>) -> Result<()> {
        if outcome == Outcome::Refunded {
            return self.mark_refunded(market_id, at).await;
        }
        self.finish(market_id, MarketStatus::Resolved, outcome, at).await
    }

    async fn mark_refunded(&self, market_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.finish(market_id, MarketStatus::Refunded, Outcome::Refunded, at).await
    }
}

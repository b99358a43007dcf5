//! Market Store
//!
//! Persistence seam for markets and their resolution tracking rows. Creation
//! and both terminal transitions write market and tracking together; a market
//! without its tracking row (or the reverse) must never be observable.

mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Market, NewMarket, NewTracking, Outcome, ResolutionTracking, TokenSlot};

pub use memory::InMemoryMarketStore;

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Persist a new automated market and its pending tracking row as one unit
    async fn create_automated_market(
        &self,
        market: NewMarket,
        tracking: NewTracking,
    ) -> Result<(Market, ResolutionTracking)>;

    /// Active markets flagged `is_automated`
    async fn list_active_automated_markets(&self) -> Result<Vec<Market>>;

    /// Tracking rows still in `pending`
    async fn list_pending_trackings(&self) -> Result<Vec<ResolutionTracking>>;

    async fn get_market(&self, market_id: &str) -> Result<Option<Market>>;

    /// Record a battle token's hit-time; a slot that already has one is left alone
    async fn record_hit_time(&self, tracking_id: &str, slot: TokenSlot, at: DateTime<Utc>) -> Result<()>;

    /// Terminal transition to resolved; hands off to payout settlement
    async fn mark_resolved(&self, market_id: &str, outcome: Outcome, at: DateTime<Utc>) -> Result<()>;

    /// Terminal transition to refunded; hands off to refund settlement
    async fn mark_refunded(&self, market_id: &str, at: DateTime<Utc>) -> Result<()>;
}

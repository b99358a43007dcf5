//! Data model for the automated market lifecycle
//!
//! # Design Principles
//! 1. Archetype is an explicit column (`market_type`), never re-derived from prose
//!    unless the row predates the column
//! 2. Provider payloads keep unknown fields out of the way (`#[serde(default)]`)
//! 3. Store records are plain data; all transitions go through `MarketStore`
//!
//! # Records
//! - `Market`: the prediction market shown to users (owned by the Market Store)
//! - `ResolutionTracking`: mutable bookkeeping row driving pending -> resolved/refunded
//! - `TrendingToken` / `TokenDetail` / `Candle`: ephemeral provider data

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Category stamped on every automated market
pub const MARKET_CATEGORY: &str = "memecoins";

/// Payout model stamped on every automated market
pub const PAYOUT_TYPE: &str = "proportional";

// ============================================================================
// Archetypes
// ============================================================================

/// One of the five automated market templates
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    MarketCap,
    Volume,
    Holders,
    BattleRace,
    BattleDump,
}

impl MarketType {
    /// Single-token archetypes in rotation order
    pub const SINGLES: [MarketType; 3] = [MarketType::MarketCap, MarketType::Volume, MarketType::Holders];

    pub fn is_battle(&self) -> bool {
        matches!(self, MarketType::BattleRace | MarketType::BattleDump)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::MarketCap => "market_cap",
            MarketType::Volume => "volume",
            MarketType::Holders => "holders",
            MarketType::BattleRace => "battle_race",
            MarketType::BattleDump => "battle_dump",
        }
    }

    /// Parse from string (CLI / config input)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "market_cap" | "mcap" => Some(MarketType::MarketCap),
            "volume" => Some(MarketType::Volume),
            "holders" => Some(MarketType::Holders),
            "battle_race" | "race" => Some(MarketType::BattleRace),
            "battle_dump" | "dump" => Some(MarketType::BattleDump),
            _ => None,
        }
    }

    /// Infer the archetype from stored question text.
    ///
    /// Only used for rows written before `market_type` was stored explicitly.
    pub fn infer_from_question(question: &str) -> Option<Self> {
        let q = question.to_lowercase();

        if q.starts_with("which token will dump") {
            return Some(MarketType::BattleDump);
        }
        if q.starts_with("which token will reach") {
            return Some(MarketType::BattleRace);
        }
        if q.contains("market cap") && q.contains("120 minutes") {
            return Some(MarketType::MarketCap);
        }
        if q.contains("24h volume") && q.contains("1 day") {
            return Some(MarketType::Volume);
        }
        if q.contains("holders") && q.contains("1 day") {
            return Some(MarketType::Holders);
        }
        None
    }
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two battle archetypes, used for strict alternation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BattleKind {
    Race,
    Dump,
}

impl BattleKind {
    pub fn opposite(&self) -> Self {
        match self {
            BattleKind::Race => BattleKind::Dump,
            BattleKind::Dump => BattleKind::Race,
        }
    }

    pub fn from_market_type(market_type: MarketType) -> Option<Self> {
        match market_type {
            MarketType::BattleRace => Some(BattleKind::Race),
            MarketType::BattleDump => Some(BattleKind::Dump),
            _ => None,
        }
    }
}

impl From<BattleKind> for MarketType {
    fn from(kind: BattleKind) -> Self {
        match kind {
            BattleKind::Race => MarketType::BattleRace,
            BattleKind::Dump => MarketType::BattleDump,
        }
    }
}

// ============================================================================
// Market Store Records
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Active,
    Resolved,
    Refunded,
}

/// Resolved outcome of a market
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Yes,
    No,
    Refunded,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Pending,
    Resolved,
    Refunded,
}

/// Which token of a market a value belongs to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenSlot {
    First,
    Second,
}

/// Prediction market as persisted by the Market Store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub question: String,
    pub category: String,
    pub is_automated: bool,

    /// Explicit archetype. `None` only for legacy rows.
    #[serde(default)]
    pub market_type: Option<MarketType>,

    pub token_address: String,
    pub token_name: String,
    #[serde(default)]
    pub token_address_2: Option<String>,
    #[serde(default)]
    pub token_name_2: Option<String>,

    #[serde(default)]
    pub image: Option<String>,
    pub payout_type: String,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: MarketStatus,
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl Market {
    /// Archetype of this market: explicit column first, question text as fallback
    pub fn archetype(&self) -> Option<MarketType> {
        self.market_type.or_else(|| MarketType::infer_from_question(&self.question))
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }
}

/// Fields for a new automated market
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewMarket {
    pub question: String,
    pub market_type: MarketType,
    pub token_address: String,
    pub token_name: String,
    pub token_address_2: Option<String>,
    pub token_name_2: Option<String>,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Resolution bookkeeping for one automated market
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionTracking {
    pub id: String,
    pub market_id: String,
    pub market_type: MarketType,

    /// Target shown in the question text
    pub target_value: f64,
    /// Threshold token 1 must cross
    pub token_1_target: f64,
    /// Threshold token 2 must cross (battle only)
    #[serde(default)]
    pub token_2_target: Option<f64>,

    pub token_address: String,
    #[serde(default)]
    pub token_address_2: Option<String>,

    pub status: TrackingStatus,
    #[serde(default)]
    pub token_1_hit_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub token_2_hit_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ResolutionTracking {
    pub fn is_pending(&self) -> bool {
        self.status == TrackingStatus::Pending
    }

    pub fn address(&self, slot: TokenSlot) -> Option<&str> {
        match slot {
            TokenSlot::First => Some(self.token_address.as_str()),
            TokenSlot::Second => self.token_address_2.as_deref(),
        }
    }

    pub fn target(&self, slot: TokenSlot) -> Option<f64> {
        match slot {
            TokenSlot::First => Some(self.token_1_target),
            TokenSlot::Second => self.token_2_target,
        }
    }

    pub fn hit_at(&self, slot: TokenSlot) -> Option<DateTime<Utc>> {
        match slot {
            TokenSlot::First => self.token_1_hit_at,
            TokenSlot::Second => self.token_2_hit_at,
        }
    }
}

/// Fields for a new pending tracking row (market id assigned by the store)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTracking {
    pub market_type: MarketType,
    pub target_value: f64,
    pub token_1_target: f64,
    pub token_2_target: Option<f64>,
    pub token_address: String,
    pub token_address_2: Option<String>,
}

// ============================================================================
// Token Data Provider Types
// ============================================================================

/// Token from the trending listing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingToken {
    pub address: String,
    pub name: String,
    #[serde(default)]
    pub symbol: Option<String>,
    /// Market cap (USD)
    #[serde(default)]
    pub market_cap: f64,
    /// 24h volume (USD)
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub holders: u64,
    /// Creation time (Unix ms on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub image: Option<String>,
}

impl TrendingToken {
    /// Wall-clock age in hours at `now` (never negative)
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_seconds().max(0);
        secs as f64 / 3600.0
    }

    /// Current value of the metric a single-token archetype is judged on
    pub fn metric(&self, market_type: MarketType) -> Option<f64> {
        match market_type {
            MarketType::MarketCap => Some(self.market_cap),
            MarketType::Volume => Some(self.volume_24h),
            MarketType::Holders => Some(self.holders as f64),
            MarketType::BattleRace | MarketType::BattleDump => None,
        }
    }
}

/// Token detail from the batched lookup
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetail {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub market_cap: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub holders: u64,
}

impl TokenDetail {
    pub fn metric(&self, market_type: MarketType) -> Option<f64> {
        match market_type {
            MarketType::MarketCap => Some(self.market_cap),
            MarketType::Volume => Some(self.volume_24h),
            MarketType::Holders => Some(self.holders as f64),
            MarketType::BattleRace | MarketType::BattleDump => None,
        }
    }
}

/// OHLCV candle (market-cap denominated)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    /// Candle open time (Unix seconds)
    pub time: i64,
}

impl Candle {
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time, 0).single()
    }
}

// ============================================================================
// Events
// ============================================================================

/// Realtime event broadcast on creation/resolution
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    MarketCreated {
        market_id: String,
        market_type: MarketType,
        question: String,
        expires_at: DateTime<Utc>,
    },
    MarketResolved {
        market_id: String,
        outcome: Outcome,
    },
    MarketRefunded {
        market_id: String,
    },
}

// ============================================================================
// Cycle Reports
// ============================================================================

/// Result of one creation cycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationReport {
    pub success: bool,
    pub market_created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_type: Option<MarketType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<Market>,
    pub message: String,
}

impl CreationReport {
    pub fn created(market: Market) -> Self {
        Self {
            success: true,
            market_created: true,
            market_type: market.market_type,
            message: format!("Created market {}", market.id),
            market: Some(market),
        }
    }

    /// Cycle completed without creating anything (not a failure)
    pub fn skipped(market_type: Option<MarketType>, message: impl Into<String>) -> Self {
        Self { success: true, market_created: false, market_type, market: None, message: message.into() }
    }

    pub fn failed(market_type: Option<MarketType>, message: impl Into<String>) -> Self {
        Self { success: false, market_created: false, market_type, market: None, message: message.into() }
    }
}

/// Failure on one tracking row during a resolution pass
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub tracking_id: String,
    pub market_id: String,
    pub error: String,
}

/// Result of one resolution pass
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionReport {
    pub success: bool,
    pub checked: usize,
    pub resolved: usize,
    pub refunded: usize,
    pub failures: Vec<RowFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResolutionReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: Some(message.into()), ..Default::default() }
    }
}

//! Rotation Selector - decides which archetype the next creation cycle targets
//!
//! # Order
//! market_cap -> volume -> holders -> battle
//!
//! The first single-token archetype without an active automated market wins.
//! Once all three are occupied, a battle is chosen, alternating strictly
//! between race and dump. At most one battle is active at a time, which caps
//! concurrent automated markets at four.
//!
//! `RotationState` is advanced only by `commit`, after the market is persisted.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{BattleKind, Market, MarketType};

/// Alternation state carried between creation cycles
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RotationState {
    /// Battle kind created most recently (`None` until the first battle)
    pub last_battle: Option<BattleKind>,
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Battle kind the next battle cycle should use
    pub fn next_battle(&self) -> BattleKind {
        match self.last_battle {
            Some(last) => last.opposite(),
            None => BattleKind::Dump,
        }
    }

    /// Record a successfully persisted market
    pub fn commit(&mut self, created: MarketType) {
        if let Some(kind) = BattleKind::from_market_type(created) {
            self.last_battle = Some(kind);
        }
    }

    /// Read persisted state; a missing file yields the initial state
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse rotation state {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// Persist state (temp file + rename)
    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path).await.with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

/// Pick the archetype for the next market.
///
/// `active` are the currently active automated markets. Returns `None` when
/// every slot (three singles and one battle) is occupied.
pub fn select_archetype(state: &RotationState, active: &[Market]) -> Option<MarketType> {
    let occupied: Vec<MarketType> = active
        .iter()
        .filter(|m| m.is_automated && m.is_active())
        .filter_map(|m| m.archetype())
        .collect();

    for candidate in MarketType::SINGLES {
        if !occupied.contains(&candidate) {
            debug!("Rotation: {} slot is free", candidate);
            return Some(candidate);
        }
    }

    if occupied.iter().any(|t| t.is_battle()) {
        debug!("Rotation: all slots occupied");
        return None;
    }

    let battle = MarketType::from(state.next_battle());
    debug!("Rotation: singles occupied, next battle is {}", battle);
    Some(battle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketStatus, MARKET_CATEGORY, PAYOUT_TYPE};
    use chrono::Utc;

    fn active(market_type: MarketType) -> Market {
        Market {
            id: format!("m-{}", market_type),
            question: String::new(),
            category: MARKET_CATEGORY.to_string(),
            is_automated: true,
            market_type: Some(market_type),
            token_address: "x".repeat(32),
            token_name: "X".to_string(),
            token_address_2: None,
            token_name_2: None,
            image: None,
            payout_type: PAYOUT_TYPE.to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            status: MarketStatus::Active,
            outcome: None,
        }
    }

    #[test]
    fn test_selects_first_free_single() {
        let state = RotationState::new();
        assert_eq!(select_archetype(&state, &[]), Some(MarketType::MarketCap));
        assert_eq!(
            select_archetype(&state, &[active(MarketType::MarketCap)]),
            Some(MarketType::Volume)
        );
        assert_eq!(
            select_archetype(&state, &[active(MarketType::MarketCap), active(MarketType::Volume)]),
            Some(MarketType::Holders)
        );
    }

    #[test]
    fn test_never_selects_occupied_archetype() {
        let state = RotationState::new();
        let markets = [active(MarketType::Volume), active(MarketType::Holders)];
        assert_eq!(select_archetype(&state, &markets), Some(MarketType::MarketCap));
    }

    #[test]
    fn test_battle_defaults_to_dump() {
        let state = RotationState::new();
        let singles: Vec<Market> = MarketType::SINGLES.iter().map(|t| active(*t)).collect();
        assert_eq!(select_archetype(&state, &singles), Some(MarketType::BattleDump));
    }

    #[test]
    fn test_battle_strict_alternation() {
        let mut state = RotationState::new();
        let singles: Vec<Market> = MarketType::SINGLES.iter().map(|t| active(*t)).collect();

        let mut picks = Vec::new();
        for _ in 0..4 {
            let pick = select_archetype(&state, &singles).unwrap();
            state.commit(pick);
            picks.push(pick);
        }
        assert_eq!(
            picks,
            vec![
                MarketType::BattleDump,
                MarketType::BattleRace,
                MarketType::BattleDump,
                MarketType::BattleRace
            ]
        );
    }

    #[test]
    fn test_no_selection_when_battle_active() {
        let state = RotationState::new();
        let mut markets: Vec<Market> = MarketType::SINGLES.iter().map(|t| active(*t)).collect();
        markets.push(active(MarketType::BattleRace));
        assert_eq!(select_archetype(&state, &markets), None);
    }

    #[test]
    fn test_inactive_and_manual_markets_ignored() {
        let state = RotationState::new();
        let mut resolved = active(MarketType::MarketCap);
        resolved.status = MarketStatus::Resolved;
        let mut manual = active(MarketType::MarketCap);
        manual.is_automated = false;
        assert_eq!(select_archetype(&state, &[resolved, manual]), Some(MarketType::MarketCap));
    }

    #[test]
    fn test_legacy_rows_detected_from_question() {
        let state = RotationState::new();
        let mut legacy = active(MarketType::MarketCap);
        legacy.market_type = None;
        legacy.question = "Will FOO's current market cap be above $1M after 120 minutes?".to_string();
        assert_eq!(select_archetype(&state, &[legacy]), Some(MarketType::Volume));
    }

    #[test]
    fn test_commit_ignores_singles() {
        let mut state = RotationState::new();
        state.commit(MarketType::Holders);
        assert_eq!(state.last_battle, None);
    }

    #[tokio::test]
    async fn test_state_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("rotation-{}", uuid::Uuid::new_v4()));
        let path = dir.join("markets.rotation.json");

        assert_eq!(RotationState::load(&path).await.unwrap(), RotationState::new());

        let mut state = RotationState::new();
        state.commit(MarketType::BattleRace);
        state.save(&path).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(RotationState::load(&path).await.unwrap().next_battle(), BattleKind::Dump);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_corrupt_state_file_names_path() {
        let path = std::env::temp_dir().join(format!("rotation-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"{ not json").await.unwrap();

        let err = RotationState::load(&path).await.unwrap_err();
        assert!(format!("{:#}", err).contains(&path.display().to_string()));

        let _ = tokio::fs::remove_file(&path).await;
    }
}

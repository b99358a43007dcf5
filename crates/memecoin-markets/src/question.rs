//! Question templates and market durations per archetype

use chrono::Duration;

use crate::milestone::{format_count, format_usd};
use crate::types::MarketType;

/// How long a market of this archetype stays open
pub fn market_duration(market_type: MarketType) -> Duration {
    match market_type {
        MarketType::MarketCap => Duration::minutes(120),
        MarketType::Volume | MarketType::Holders => Duration::days(1),
        MarketType::BattleRace | MarketType::BattleDump => Duration::days(2),
    }
}

/// Target as it appears in question text
pub fn format_target(market_type: MarketType, target: f64) -> String {
    match market_type {
        MarketType::Holders => format_count(target.round() as u64),
        _ => format_usd(target),
    }
}

/// Question for a single-token archetype (`None` for battles)
pub fn single_question(market_type: MarketType, name: &str, target: f64) -> Option<String> {
    let target = format_target(market_type, target);
    let question = match market_type {
        MarketType::MarketCap => {
            format!("Will {}'s current market cap be above {} after 120 minutes?", name, target)
        }
        MarketType::Volume => format!("Will {}'s current 24h volume be above {} after 1 day?", name, target),
        MarketType::Holders => format!("Will {} have more than {} holders after 1 day?", name, target),
        MarketType::BattleRace | MarketType::BattleDump => return None,
    };
    Some(question)
}

/// Question for a battle archetype
pub fn battle_question(market_type: MarketType, name_1: &str, name_2: &str, target: f64) -> String {
    let target = format_usd(target);
    match market_type {
        MarketType::BattleDump => format!(
            "Which token will dump 50% first (to {} market cap): {} or {}?",
            target, name_1, name_2
        ),
        _ => format!("Which token will reach {} market cap first: {} or {}?", target, name_1, name_2),
    }
}

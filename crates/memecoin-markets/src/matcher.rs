//! Token Matcher - pairs trending tokens of comparable size and age for battles
//!
//! # Algorithm
//! 1. Scan unordered pairs (i < j) in trending order, so higher-ranked tokens pair first
//! 2. Relative market-cap and age differences must both be <= 30%
//! 3. Neither member may already be used by an active automated market
//! 4. Display names must differ case-insensitively

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::TrendingToken;

/// Maximum relative difference for market cap and age
pub const MAX_RELATIVE_DIFF: f64 = 0.30;

/// Valid token address length range (base58 Solana mints)
pub const MIN_ADDRESS_LEN: usize = 32;
pub const MAX_ADDRESS_LEN: usize = 44;

pub fn is_valid_address(address: &str) -> bool {
    (MIN_ADDRESS_LEN..=MAX_ADDRESS_LEN).contains(&address.len())
}

/// Case-insensitive name key used for duplicate checks
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Tokens currently claimed by active automated markets
#[derive(Clone, Debug, Default)]
pub struct UsedTokens {
    addresses: HashSet<String>,
    names: HashSet<String>,
}

impl UsedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_address(&mut self, address: &str) {
        self.addresses.insert(address.to_string());
    }

    pub fn add_name(&mut self, name: &str) {
        self.names.insert(normalize_name(name));
    }

    pub fn contains(&self, token: &TrendingToken) -> bool {
        self.addresses.contains(&token.address) || self.names.contains(&normalize_name(&token.name))
    }
}

/// Relative difference `|a - b| / avg(a, b)`; 0 when the average is 0
pub fn relative_diff(a: f64, b: f64) -> f64 {
    let avg = (a + b) / 2.0;
    if avg == 0.0 {
        return 0.0;
    }
    (a - b).abs() / avg
}

/// Whether two tokens are close enough in size and age to battle
pub fn is_comparable(a: &TrendingToken, b: &TrendingToken, now: DateTime<Utc>) -> bool {
    let mc_diff = relative_diff(a.market_cap, b.market_cap);
    let age_diff = relative_diff(a.age_hours(now), b.age_hours(now));
    mc_diff <= MAX_RELATIVE_DIFF && age_diff <= MAX_RELATIVE_DIFF
}

/// Find the first eligible battle pair in trending order
pub fn find_battle_pair<'a>(
    tokens: &'a [TrendingToken],
    used: &UsedTokens,
    now: DateTime<Utc>,
) -> Option<(&'a TrendingToken, &'a TrendingToken)> {
    let candidates: Vec<&TrendingToken> = tokens
        .iter()
        .filter(|t| is_valid_address(&t.address) && !used.contains(t))
        .collect();

    for (i, a) in candidates.iter().enumerate() {
        for b in &candidates[i + 1..] {
            if a.address == b.address || normalize_name(&a.name) == normalize_name(&b.name) {
                continue;
            }
            if is_comparable(a, b, now) {
                debug!(
                    "Battle pair found: {} ({}) vs {} ({})",
                    a.name, a.market_cap, b.name, b.market_cap
                );
                return Some((*a, *b));
            }
        }
    }

    None
}

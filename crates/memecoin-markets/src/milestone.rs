//! Milestone Calculator - forward-looking targets from a current metric
//!
//! All functions are pure and deterministic.
//!
//! # Rules
//! - Doubling: first ladder rung >= 2x current, clamped to the top rung
//! - Holders: same idea on the holder ladder, bumped to >= 1.1x current when
//!   the doubled rung would not be above the current count
//! - Dump: 50% of current, rounded to the nearest $100K, floor $100K

/// USD ladder for market cap, volume and battle-race targets
pub const DOUBLING_LADDER: [f64; 11] = [
    250_000.0,
    500_000.0,
    750_000.0,
    1_000_000.0,
    2_000_000.0,
    3_000_000.0,
    5_000_000.0,
    10_000_000.0,
    20_000_000.0,
    50_000_000.0,
    100_000_000.0,
];

/// Highest USD milestone; tokens at or above it get no market
pub const MAX_MILESTONE: f64 = 100_000_000.0;

/// Holder-count ladder
pub const HOLDER_LADDER: [u64; 5] = [500, 1_000, 2_000, 3_000, 5_000];

/// Tokens below this holder count never get a holders market
pub const MIN_HOLDERS: u64 = 100;

/// Dump targets are rounded to this step
pub const DUMP_ROUNDING: f64 = 100_000.0;

/// Minimum dump target
pub const DUMP_FLOOR: f64 = 100_000.0;

/// Next milestone at or above double the current value.
///
/// Callers skip tokens already at or above `MAX_MILESTONE`.
pub fn doubling_milestone(current: f64) -> f64 {
    let doubled = current * 2.0;
    DOUBLING_LADDER.iter().copied().find(|&rung| rung >= doubled).unwrap_or(MAX_MILESTONE)
}

/// Holder target for a token with `current` holders.
///
/// Returns `None` below `MIN_HOLDERS`.
pub fn holder_milestone(current: u64) -> Option<u64> {
    if current < MIN_HOLDERS {
        return None;
    }

    let top = HOLDER_LADDER[HOLDER_LADDER.len() - 1];
    let doubled = current.saturating_mul(2);
    let rung = HOLDER_LADDER.iter().copied().find(|&r| r >= doubled).unwrap_or(top);
    if rung > current {
        return Some(rung);
    }

    // Already past the useful rungs: aim for +10% instead
    // ceil(current * 1.1) in integer arithmetic
    let bumped = (current.saturating_mul(11) + 9) / 10;
    Some(HOLDER_LADDER.iter().copied().find(|&r| r >= bumped).unwrap_or(bumped))
}

/// Battle-dump target: half of `current`, nearest $100K, at least $100K
pub fn dump_target(current: f64) -> f64 {
    let rounded = (current * 0.5 / DUMP_ROUNDING).round() * DUMP_ROUNDING;
    rounded.max(DUMP_FLOOR)
}

/// Render a USD amount the way questions show it: `$750K`, `$1M`, `$2.5M`
pub fn format_usd(value: f64) -> String {
    if value >= 1_000_000_000.0 {
        format!("${}B", trim_decimal(value / 1_000_000_000.0))
    } else if value >= 1_000_000.0 {
        format!("${}M", trim_decimal(value / 1_000_000.0))
    } else if value >= 1_000.0 {
        format!("${}K", trim_decimal(value / 1_000.0))
    } else {
        format!("${}", trim_decimal(value))
    }
}

/// Render a count with thousands separators: `1,000`
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn trim_decimal(value: f64) -> String {
    let s = format!("{:.2}", value);
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_known_values() {
        assert_eq!(doubling_milestone(300_000.0), 750_000.0);
        assert_eq!(doubling_milestone(250_000.0), 500_000.0);
        assert_eq!(doubling_milestone(60_000_000.0), 100_000_000.0);
        assert_eq!(doubling_milestone(0.0), 250_000.0);
    }

    #[test]
    fn test_doubling_is_ladder_member_and_at_least_double() {
        let mut current = 0.0;
        while current < MAX_MILESTONE {
            let m = doubling_milestone(current);
            assert!(DOUBLING_LADDER.contains(&m), "{} -> {}", current, m);
            if current * 2.0 <= MAX_MILESTONE {
                assert!(m >= current * 2.0, "{} -> {}", current, m);
            } else {
                assert_eq!(m, MAX_MILESTONE);
            }
            current += 137_500.0;
        }
    }

    #[test]
    fn test_holder_milestone() {
        assert_eq!(holder_milestone(99), None);
        assert_eq!(holder_milestone(100), Some(500));
        assert_eq!(holder_milestone(400), Some(1_000));
        assert_eq!(holder_milestone(1_200), Some(3_000));
        assert_eq!(holder_milestone(2_800), Some(5_000));
    }

    #[test]
    fn test_holder_milestone_bumps_past_ladder() {
        // doubled clamps to 5000 which is not above current
        assert_eq!(holder_milestone(5_000), Some(5_500));
        assert_eq!(holder_milestone(6_000), Some(6_600));
        for current in [100u64, 750, 2_500, 4_999, 5_000, 12_345] {
            let target = holder_milestone(current).unwrap();
            assert!(target > current, "{} -> {}", current, target);
        }
    }

    #[test]
    fn test_dump_target() {
        assert_eq!(dump_target(800_000.0), 400_000.0);
        assert_eq!(dump_target(1_500_000.0), 800_000.0);
        assert_eq!(dump_target(150_000.0), 100_000.0);
        assert_eq!(dump_target(10_000.0), 100_000.0);
    }

    #[test]
    fn test_format_usd() {
        assert_eq!(format_usd(750_000.0), "$750K");
        assert_eq!(format_usd(1_000_000.0), "$1M");
        assert_eq!(format_usd(2_500_000.0), "$2.5M");
        assert_eq!(format_usd(100_000_000.0), "$100M");
        assert_eq!(format_usd(950.0), "$950");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(500), "500");
        assert_eq!(format_count(1_000), "1,000");
        assert_eq!(format_count(5_500), "5,500");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }
}

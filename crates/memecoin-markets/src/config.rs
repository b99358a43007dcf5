//! Engine configuration
//!
//! Defaults match the designed cadences. `EngineConfig::from_env` overlays
//! `MARKET_ENGINE_*` variables; the CLI applies its flags on top.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_TOKEN_API_BASE;

/// Half-width of the single-token resolution window (seconds)
pub const DEFAULT_RESOLUTION_WINDOW_SECS: i64 = 60;
/// Grace after a missed window before a single-token row is refunded (seconds)
pub const DEFAULT_OVERDUE_REFUND_GRACE_SECS: i64 = 3_600;

/// Runtime configuration for the market engine
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Token data API base URL
    pub provider_base_url: String,
    /// Minimum spacing between provider calls (ms)
    pub provider_min_interval_ms: u64,

    /// Creation cycle period (seconds)
    pub creation_interval_secs: u64,
    /// Resolution tick period (seconds); must be short enough to land inside the window
    pub resolution_interval_secs: u64,
    /// How often battle rows get a chart check (seconds)
    pub battle_check_interval_secs: u64,
    /// Gates scheduled creation; manual triggers ignore it
    pub auto_create_enabled: bool,

    /// Half-width of the single-token resolution window (seconds)
    pub resolution_window_secs: i64,
    /// Extra time after a missed window before a single-token row is refunded (seconds)
    pub overdue_refund_grace_secs: i64,

    /// Where composited battle images are written
    pub image_dir: PathBuf,
    /// Public URL prefix for composited battle images
    pub image_url_prefix: String,

    /// JSON snapshot used by the CLI's in-memory store
    pub state_file: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_base_url: DEFAULT_TOKEN_API_BASE.to_string(),
            provider_min_interval_ms: 1_000,
            creation_interval_secs: 3_600,
            resolution_interval_secs: 60,
            battle_check_interval_secs: 1_800,
            auto_create_enabled: true,
            resolution_window_secs: DEFAULT_RESOLUTION_WINDOW_SECS,
            overdue_refund_grace_secs: DEFAULT_OVERDUE_REFUND_GRACE_SECS,
            image_dir: PathBuf::from("data/images"),
            image_url_prefix: "/images".to_string(),
            state_file: PathBuf::from("data/markets.json"),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `MARKET_ENGINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("MARKET_ENGINE_PROVIDER_URL") {
            config.provider_base_url = v;
        }
        if let Some(v) = lookup("MARKET_ENGINE_PROVIDER_MIN_INTERVAL_MS") {
            config.provider_min_interval_ms = parse_var("MARKET_ENGINE_PROVIDER_MIN_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("MARKET_ENGINE_CREATION_INTERVAL_SECS") {
            config.creation_interval_secs = parse_var("MARKET_ENGINE_CREATION_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("MARKET_ENGINE_RESOLUTION_INTERVAL_SECS") {
            config.resolution_interval_secs = parse_var("MARKET_ENGINE_RESOLUTION_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("MARKET_ENGINE_BATTLE_CHECK_INTERVAL_SECS") {
            config.battle_check_interval_secs = parse_var("MARKET_ENGINE_BATTLE_CHECK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("MARKET_ENGINE_AUTO_CREATE") {
            config.auto_create_enabled = parse_var("MARKET_ENGINE_AUTO_CREATE", &v)?;
        }
        if let Some(v) = lookup("MARKET_ENGINE_IMAGE_DIR") {
            config.image_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MARKET_ENGINE_IMAGE_URL_PREFIX") {
            config.image_url_prefix = v;
        }
        if let Some(v) = lookup("MARKET_ENGINE_STATE_FILE") {
            config.state_file = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the single-token window unreachable
    pub fn validate(&self) -> Result<()> {
        if self.resolution_interval_secs == 0 || self.creation_interval_secs == 0 || self.battle_check_interval_secs == 0 {
            anyhow::bail!("Task intervals must be non-zero");
        }
        if self.resolution_interval_secs as i64 > self.resolution_window_secs * 2 {
            anyhow::bail!(
                "resolution_interval_secs ({}) exceeds the resolution window ({}s wide); single-token markets would be missed",
                self.resolution_interval_secs,
                self.resolution_window_secs * 2
            );
        }
        Ok(())
    }

    pub fn provider_min_interval(&self) -> Duration {
        Duration::from_millis(self.provider_min_interval_ms)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.trim().parse().with_context(|| format!("Invalid value for {}: '{}'", key, value))
}

/// Token data API credentials
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
}

impl ProviderCredentials {
    /// Read `TOKEN_API_KEY` from the environment
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("TOKEN_API_KEY").ok()?;
        Some(Self { api_key })
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty()
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("api_key", &format!("{}...", &self.api_key.chars().take(4).collect::<String>()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolution_window_secs, 60);
        assert_eq!(config.battle_check_interval_secs, 1_800);
        assert_eq!(config.provider_min_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_env_overlay() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("MARKET_ENGINE_AUTO_CREATE", "false"),
            ("MARKET_ENGINE_CREATION_INTERVAL_SECS", "900"),
            ("MARKET_ENGINE_PROVIDER_URL", "http://127.0.0.1:9000"),
        ]))
        .unwrap();
        assert!(!config.auto_create_enabled);
        assert_eq!(config.creation_interval_secs, 900);
        assert_eq!(config.provider_base_url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[("MARKET_ENGINE_CREATION_INTERVAL_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("MARKET_ENGINE_CREATION_INTERVAL_SECS"));
    }

    #[test]
    fn test_resolution_interval_must_fit_window() {
        let config = EngineConfig { resolution_interval_secs: 300, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = ProviderCredentials { api_key: "abcd-super-secret".to_string() };
        let debug_str = format!("{:?}", creds);
        assert!(!debug_str.contains("super-secret"));
        assert!(debug_str.contains("abcd"));
    }
}

//! Automated memecoin prediction-market lifecycle engine
//!
//! Two periodic tasks:
//! - creation: rotation -> trending tokens -> milestone / battle pair -> persist + publish
//! - resolution: pending tracking rows -> token metrics / candles -> resolved or refunded
//!
//! # Modules
//! - `rotation`, `milestone`, `matcher`, `question`: pure decision logic
//! - `builder`: Market Builder (one creation cycle)
//! - `checker`: Resolution Checker (one resolution pass)
//! - `provider`: token data API client and rate limiter
//! - `store`: Market Store seam and the in-memory snapshot store
//! - `publish`: realtime event fan-out
//! - `market_image`: battle image compositing
//! - `scheduler`: `EngineService`, serialised triggers and task loops

pub mod builder;
pub mod checker;
pub mod config;
pub mod error;
pub mod market_image;
pub mod matcher;
pub mod milestone;
pub mod provider;
pub mod publish;
pub mod question;
pub mod rotation;
pub mod scheduler;
pub mod store;
pub mod types;

pub use builder::MarketBuilder;
pub use checker::{CheckScope, ResolutionChecker};
pub use config::{EngineConfig, ProviderCredentials};
pub use error::{CycleError, CycleResult};
pub use scheduler::{EngineService, TriggerSource};
pub use types::*;

/// Default token data API base URL (local gateway in front of the upstream API)
pub const DEFAULT_TOKEN_API_BASE: &str = "http://localhost:8787";

//! Engine configuration
//!
//! The AI API key is resolved Database → ENV → TOML. Everything else comes
//! from the TOML bootstrap file with built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use verdant_common::config::{load_toml_config, write_toml_config, TomlConfig};
use verdant_common::{Error, Result, RetryPolicy};

use crate::models::DEFAULT_FREE_QUOTA;
use crate::services::auth_bootstrap::DEFAULT_AUTH_GUARD_TIMEOUT_MS;
use crate::services::reconciler::{DEFAULT_RECONCILE_DELAYS_MS, DEFAULT_REFETCH_DELAY_MS};
use crate::store::ApiKeyStore;

/// Environment variable holding the AI API key
pub const GEMINI_API_KEY_ENV: &str = "VERDANT_GEMINI_API_KEY";

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_LISTEN_PORT: u16 = 5741;

/// Resolve the generative AI API key
///
/// **Priority:** Database → ENV → TOML
pub async fn resolve_gemini_api_key(
    keys: &dyn ApiKeyStore,
    toml_config: &TomlConfig,
) -> Result<String> {
    let mut sources = Vec::new();

    let db_key = keys
        .gemini_api_key()
        .await?
        .filter(|key| is_valid_key(key));
    if db_key.is_some() {
        sources.push("database");
    }

    let env_key = std::env::var(GEMINI_API_KEY_ENV)
        .ok()
        .filter(|key| is_valid_key(key));
    if env_key.is_some() {
        sources.push("environment");
    }

    let toml_key = toml_config
        .gemini_api_key
        .clone()
        .filter(|key| is_valid_key(key));
    if toml_key.is_some() {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "AI API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("AI API key loaded from database");
        return Ok(key);
    }
    if let Some(key) = env_key {
        info!("AI API key loaded from environment variable");
        return Ok(key);
    }
    if let Some(key) = toml_key {
        info!("AI API key loaded from TOML config");
        return Ok(key);
    }

    Err(Error::Config(format!(
        "AI API key not configured. Configure using one of:\n\
         1. Environment: {}=your-key-here\n\
         2. TOML config: gemini_api_key = \"your-key\"",
        GEMINI_API_KEY_ENV
    )))
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Mirror the AI API key into the TOML file, keeping its other settings
pub fn sync_gemini_key_to_toml(key: &str, path: &Path) -> Result<()> {
    let mut config = load_toml_config(path)?;
    config.gemini_api_key = Some(key.to_string());
    write_toml_config(&config, path)?;
    info!("AI API key synced to TOML: {}", path.display());
    Ok(())
}

/// Runtime knobs for the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub language: String,
    pub free_quota: u32,
    pub reconcile_policy: RetryPolicy,
    pub refetch_delay: Duration,
    pub auth_guard_timeout: Duration,
    pub listen_port: u16,
    /// TOML file that key changes are mirrored into
    pub config_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            free_quota: DEFAULT_FREE_QUOTA,
            reconcile_policy: RetryPolicy::from_millis(&DEFAULT_RECONCILE_DELAYS_MS),
            refetch_delay: Duration::from_millis(DEFAULT_REFETCH_DELAY_MS),
            auth_guard_timeout: Duration::from_millis(DEFAULT_AUTH_GUARD_TIMEOUT_MS),
            listen_port: DEFAULT_LISTEN_PORT,
            config_path: None,
        }
    }
}

impl EngineSettings {
    pub fn from_toml(config: &TomlConfig) -> Self {
        let defaults = Self::default();

        let reconcile_policy = match config.reconcile_delays_ms.as_deref() {
            Some(delays) if !delays.is_empty() => RetryPolicy::from_millis(delays),
            Some(_) => {
                warn!("Empty reconcile_delays_ms in config, using defaults");
                defaults.reconcile_policy
            }
            None => defaults.reconcile_policy,
        };

        Self {
            language: config
                .language
                .clone()
                .filter(|lang| !lang.trim().is_empty())
                .unwrap_or(defaults.language),
            free_quota: config.free_quota.unwrap_or(defaults.free_quota),
            reconcile_policy,
            listen_port: config.listen_port.unwrap_or(defaults.listen_port),
            ..defaults
        }
    }
}

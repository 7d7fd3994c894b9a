//! TOML-based configuration.
//!
//! Supports a config file (cartograph.toml) with environment variable
//! expansion in path-like values.
//!
//! Example configuration:
//! ```toml
//! [store]
//! path = "${CARTOGRAPH_STATE_DIR}/state.db"
//!
//! [pipeline]
//! heartbeat_interval_secs = 15
//! orphan_multiplier = 3
//! stage_timeout_secs = 300
//! max_retries = 3
//!
//! [discovery]
//! min_forward_match_rate = 0.95
//! max_reverse_orphan_ratio = 0.5
//! arbitration_bypass_confidence = 0.95
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::pipeline::retry::RetryPolicy;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Durable store configuration.
    #[serde(default)]
    pub store: StoreSettings,

    /// Pipeline execution policy.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Relationship discovery thresholds.
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Sanity-check threshold ranges.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let d = &self.discovery;
        for (name, value) in [
            ("min_forward_match_rate", d.min_forward_match_rate),
            ("max_reverse_orphan_ratio", d.max_reverse_orphan_ratio),
            ("small_source_min_coverage", d.small_source_min_coverage),
            ("min_confidence", d.min_confidence),
            (
                "arbitration_bypass_confidence",
                d.arbitration_bypass_confidence,
            ),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SettingsError::InvalidConfig(format!(
                    "discovery.{} must be between 0.0 and 1.0, got {}",
                    name, value
                )));
            }
        }
        if self.pipeline.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "pipeline.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.pipeline.orphan_multiplier < 2 {
            return Err(SettingsError::InvalidConfig(
                "pipeline.orphan_multiplier must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the store path with environment variables expanded.
    pub fn resolved_store_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        match &self.store.path {
            Some(raw) => Ok(Some(PathBuf::from(expand_env_vars(raw)?))),
            None => Ok(None),
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Path to the state database (supports ${ENV_VAR} expansion).
    /// Defaults to `~/.cartograph/state.db` when unset.
    pub path: Option<String>,
}

/// Pipeline execution policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Interval between heartbeat writes while a run executes.
    pub heartbeat_interval_secs: u64,

    /// A run whose heartbeat is older than `interval * multiplier` is an
    /// orphan eligible for reclaim.
    pub orphan_multiplier: u32,

    /// Per-stage execution timeout.
    pub stage_timeout_secs: u64,

    /// Maximum retry attempts per stage for transient failures.
    pub max_retries: u32,

    /// Initial retry backoff delay.
    pub retry_initial_delay_ms: u64,

    /// Maximum retry backoff delay.
    pub retry_max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    pub retry_backoff_multiplier: f64,

    /// Concurrency cap for arbitration requests to the LLM collaborator.
    pub llm_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 15,
            orphan_multiplier: 3,
            stage_timeout_secs: 300,
            max_retries: 3,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 30_000,
            retry_backoff_multiplier: 2.0,
            llm_concurrency: 4,
        }
    }
}

impl PipelineSettings {
    /// Heartbeat staleness threshold for orphan detection.
    pub fn orphan_threshold_secs(&self) -> i64 {
        (self.heartbeat_interval_secs * u64::from(self.orphan_multiplier)) as i64
    }

    /// Heartbeat write cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Per-stage timeout.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Build the stage retry policy from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }
}

/// Relationship discovery thresholds.
///
/// One configurable policy gates arbitration bypass everywhere
/// (`arbitration_bypass_confidence`); there are no per-call-path overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Minimum forward match rate (source values found in target) for a
    /// candidate to be accepted.
    pub min_forward_match_rate: f64,

    /// Maximum tolerated `reverse_orphans / target_distinct`. Catches
    /// low-cardinality columns that trivially cover a sliver of a large
    /// auto-increment key range.
    pub max_reverse_orphan_ratio: f64,

    /// Source cardinality at or below which the coverage guard applies.
    pub small_source_max_distinct: i64,

    /// Minimum coverage of the target required from a small-cardinality
    /// source.
    pub small_source_min_coverage: f64,

    /// A source column accepted against more than this many distinct target
    /// tables is coincidental; all its candidates are discarded.
    pub max_target_tables: usize,

    /// Candidates below this confidence are dropped before arbitration.
    pub min_confidence: f64,

    /// Candidates at or above this confidence skip LLM arbitration.
    pub arbitration_bypass_confidence: f64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            min_forward_match_rate: 0.95,
            max_reverse_orphan_ratio: 0.5,
            small_source_max_distinct: 20,
            small_source_min_coverage: 0.5,
            max_target_tables: 2,
            min_confidence: 0.5,
            arbitration_bypass_confidence: 0.95,
        }
    }
}

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Expand `${VAR}` references in a string from the process environment.
pub fn expand_env_vars(input: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(input.len());
    let mut last = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        let name = &caps[1];
        let value =
            env::var(name).map_err(|_| SettingsError::MissingEnvVar(name.to_string()))?;
        result.push_str(&input[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }
    result.push_str(&input[last..]);
    Ok(result)
}

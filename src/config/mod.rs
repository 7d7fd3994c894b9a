//! Configuration for cartograph.
//!
//! Settings load from a TOML file with environment variable expansion.
//! All policy constants live here: heartbeat cadence, orphan detection,
//! retry bounds, stage timeouts, and the discovery thresholds.

mod settings;

pub use settings::{
    expand_env_vars, DiscoverySettings, PipelineSettings, Settings, SettingsError, StoreSettings,
};

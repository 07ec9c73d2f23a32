use serde::{Deserialize, Serialize};

use crate::error::{Result, SpillwayError};

/// How a partition cursor starts a new pass after the previous one ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RearmPolicy {
    /// The first `produce_next` after an end-of-partition signal begins a new pass.
    #[default]
    Auto,
    /// Every pass must be started with `begin_pass`.
    Explicit,
}

impl RearmPolicy {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "explicit" => Ok(Self::Explicit),
            other => Err(SpillwayError::InvalidConfig(format!(
                "unknown rearm policy '{other}' (expected 'auto' or 'explicit')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillConfig {
    pub spill_dir: String,
    pub rearm: RearmPolicy,
    /// Upper bound for waiting on a partition drain before teardown.
    /// `None` waits indefinitely.
    pub drain_timeout_ms: Option<u64>,
    /// Prune spill directories left empty by a partition release.
    pub remove_empty_dirs: bool,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            spill_dir: ".spillway_spill".to_string(),
            rearm: RearmPolicy::Auto,
            drain_timeout_ms: None,
            remove_empty_dirs: true,
        }
    }
}

impl SpillConfig {
    /// Defaults overlaid with `SPILLWAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut c = Self::default();
        if let Some(v) = lookup("SPILLWAY_SPILL_DIR") {
            if v.trim().is_empty() {
                return Err(SpillwayError::InvalidConfig(
                    "SPILLWAY_SPILL_DIR must not be empty".to_string(),
                ));
            }
            c.spill_dir = v;
        }
        if let Some(v) = lookup("SPILLWAY_REARM") {
            c.rearm = RearmPolicy::parse(&v)?;
        }
        if let Some(v) = lookup("SPILLWAY_DRAIN_TIMEOUT_MS") {
            let ms = v.trim().parse::<u64>().map_err(|e| {
                SpillwayError::InvalidConfig(format!("SPILLWAY_DRAIN_TIMEOUT_MS: {e}"))
            })?;
            c.drain_timeout_ms = Some(ms);
        }
        if let Some(v) = lookup("SPILLWAY_REMOVE_EMPTY_DIRS") {
            c.remove_empty_dirs = v.trim().parse::<bool>().map_err(|e| {
                SpillwayError::InvalidConfig(format!("SPILLWAY_REMOVE_EMPTY_DIRS: {e}"))
            })?;
        }
        Ok(c)
    }

    pub fn drain_timeout(&self) -> Option<std::time::Duration> {
        self.drain_timeout_ms.map(std::time::Duration::from_millis)
    }
}

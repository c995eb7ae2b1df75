//! Settings files and the live configuration snapshot

use crate::error::{MutatorError, MutatorResult};
use crate::log::LogSettings;
use crate::rule::{RuleConfig, RuleSet};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Everything a user can configure, as written in a settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutatorSettings {
    /// Global switch; a disabled mutator passes requests through untouched
    pub enabled: bool,
    /// Rules in declaration order
    pub rules: Vec<RuleConfig>,
    pub log: LogSettings,
}

impl Default for MutatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
            log: LogSettings::default(),
        }
    }
}

impl MutatorSettings {
    pub fn from_json_str(text: &str) -> MutatorResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_toml_str(text: &str) -> MutatorResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a file. `.toml` files are read as TOML, anything
    /// else as JSON.
    pub fn load(path: impl AsRef<Path>) -> MutatorResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));

        let settings = if is_toml {
            Self::from_toml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
        .map_err(|e| MutatorError::settings(format!("{}: {}", path.display(), e)))?;

        info!("Loaded {} rules from {}", settings.rules.len(), path.display());
        Ok(settings)
    }
}

/// Immutable configuration observed by one pipeline run
#[derive(Debug, Clone, Default)]
pub struct MutatorConfig {
    pub rules: RuleSet,
    pub enabled: bool,
}

impl MutatorConfig {
    /// Compile the rules of a settings value. Invalid patterns are reported
    /// here, before any request sees the configuration.
    pub fn from_settings(settings: &MutatorSettings) -> MutatorResult<Self> {
        Ok(Self {
            rules: RuleSet::compile(&settings.rules)?,
            enabled: settings.enabled,
        })
    }

    /// Disabled configuration with no rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether a run with this configuration can change anything
    pub fn is_active(&self) -> bool {
        self.enabled && !self.rules.is_empty()
    }
}

/// Shared holder of the current configuration.
///
/// Readers take an `Arc` to the current snapshot without locking and keep
/// using it for the whole run; `store` publishes a new snapshot atomically
/// without affecting them.
#[derive(Debug)]
pub struct ConfigHandle {
    current: ArcSwap<MutatorConfig>,
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(MutatorConfig::empty())
    }
}

impl ConfigHandle {
    pub fn new(config: MutatorConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// The current snapshot
    pub fn load(&self) -> Arc<MutatorConfig> {
        self.current.load_full()
    }

    /// Replace the snapshot wholesale
    pub fn store(&self, config: MutatorConfig) {
        self.current.store(Arc::new(config));
    }

    /// Compile `settings` and publish the result. On error the current
    /// snapshot stays in place.
    pub fn apply(&self, settings: &MutatorSettings) -> MutatorResult<()> {
        let config = MutatorConfig::from_settings(settings)?;
        info!(
            "Applying configuration: enabled={}, rules={}",
            config.enabled,
            config.rules.len()
        );
        self.store(config);
        Ok(())
    }
}

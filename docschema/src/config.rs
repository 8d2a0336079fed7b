use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// How deep a sampling pass reads into a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStrategy {
    #[default]
    Fast,
    Medium,
    Full,
}

impl ScanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStrategy::Fast => "fast",
            ScanStrategy::Medium => "medium",
            ScanStrategy::Full => "full",
        }
    }
}

impl FromStr for ScanStrategy {
    type Err = crate::DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(ScanStrategy::Fast),
            "medium" => Ok(ScanStrategy::Medium),
            "full" => Ok(ScanStrategy::Full),
            other => Err(crate::DiscoveryError::Config(format!(
                "Unknown scan strategy '{other}' (expected fast, medium or full)"
            ))),
        }
    }
}

/// Sample sizes for the bounded strategies.
/// `first` documents are read straight from the cursor head, then up to
/// `probe` more are taken with skip-and-double probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSizes {
    pub first: u64,
    pub probe: u64,
}

/// Tunables for schema discovery, usually loaded from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub strategy: ScanStrategy,
    /// Wall-clock ceiling for one sampling pass.
    pub time_budget_ms: u64,
    /// Collection-wide ceiling on discovered fields.
    pub max_fields: usize,
    /// Documents read per probe between two skips.
    pub probe_batch: u64,
    pub fast: SampleSizes,
    pub medium: SampleSizes,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            strategy: ScanStrategy::Fast,
            time_budget_ms: 5_000,
            max_fields: 1_000,
            probe_batch: 20,
            fast: SampleSizes {
                first: 300,
                probe: 300,
            },
            medium: SampleSizes {
                first: 3_000,
                probe: 3_000,
            },
        }
    }
}

impl DiscoveryConfig {
    /// Parse a config from a YAML string. Missing keys fall back to defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(DiscoveryConfig::default());
        }
        let config: DiscoveryConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Read and parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_strategy(mut self, strategy: ScanStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    /// Sample sizes for the configured strategy; `None` means read everything.
    pub fn sample_sizes(&self) -> Option<SampleSizes> {
        match self.strategy {
            ScanStrategy::Fast => Some(self.fast),
            ScanStrategy::Medium => Some(self.medium),
            ScanStrategy::Full => None,
        }
    }
}

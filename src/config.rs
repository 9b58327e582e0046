//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.cohortwise.toml` files. The pseudonymization salt is deliberately not
//! part of this file; it only comes from the command line or environment.

use crate::models::TrendCategory;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".cohortwise.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Contribution builder settings.
    #[serde(default)]
    pub builder: BuilderConfig,

    /// Trend aggregation settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Directory holding the consent registry, records and output stores.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of users processed concurrently by the builder.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_concurrency() -> usize {
    8
}

/// Contribution builder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuilderConfig {
    /// A pseudonym contributes at most once per this many days.
    #[serde(default = "default_cadence_days")]
    pub cadence_days: i64,

    /// Records fetched per domain per user.
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Maximum members of any list in a contribution.
    #[serde(default = "default_max_list_len")]
    pub max_list_len: usize,

    /// Maximum characters of a normalized free-text value.
    #[serde(default = "default_max_text_len")]
    pub max_text_len: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            cadence_days: default_cadence_days(),
            fetch_limit: default_fetch_limit(),
            max_list_len: default_max_list_len(),
            max_text_len: default_max_text_len(),
        }
    }
}

fn default_cadence_days() -> i64 {
    7
}

fn default_fetch_limit() -> usize {
    50
}

fn default_max_list_len() -> usize {
    30
}

fn default_max_text_len() -> usize {
    80
}

/// Trend aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregationConfig {
    /// Rolling window of contributions considered.
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// Contributions older than this are never aggregated.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Minimum contributions in the window before anything is published.
    #[serde(default = "default_global_floor")]
    pub global_floor: usize,

    /// Flag-frequency list length.
    #[serde(default = "default_top_flags")]
    pub top_flags: usize,

    /// Per-category minimum cohort sizes.
    #[serde(default)]
    pub floors: CohortFloors,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            retention_days: default_retention_days(),
            global_floor: default_global_floor(),
            top_flags: default_top_flags(),
            floors: CohortFloors::default(),
        }
    }
}

fn default_window_days() -> i64 {
    90
}

fn default_retention_days() -> i64 {
    90
}

fn default_global_floor() -> usize {
    10
}

fn default_top_flags() -> usize {
    20
}

/// Minimum distinct contributors per subgroup, by category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CohortFloors {
    pub bloodwork_by_experience: usize,
    pub bloodwork_by_age: usize,
    pub bloodwork_by_goal: usize,
    pub protocol_age: usize,
    pub compound_interest: usize,
    pub side_effects: usize,
    pub counterfeit_product_type: usize,
    pub counterfeit_flags: usize,
}

impl Default for CohortFloors {
    fn default() -> Self {
        Self {
            bloodwork_by_experience: 10,
            bloodwork_by_age: 5,
            bloodwork_by_goal: 5,
            protocol_age: 5,
            compound_interest: 5,
            side_effects: 5,
            counterfeit_product_type: 3,
            counterfeit_flags: 3,
        }
    }
}

impl CohortFloors {
    /// Floor for one category.
    pub fn for_category(&self, category: TrendCategory) -> usize {
        match category {
            TrendCategory::BloodworkByExperience => self.bloodwork_by_experience,
            TrendCategory::BloodworkByAge => self.bloodwork_by_age,
            TrendCategory::BloodworkByGoal => self.bloodwork_by_goal,
            TrendCategory::ProtocolAge => self.protocol_age,
            TrendCategory::CompoundInterest => self.compound_interest,
            TrendCategory::SideEffects => self.side_effects,
            TrendCategory::CounterfeitProductType => self.counterfeit_product_type,
            TrendCategory::CounterfeitFlags => self.counterfeit_flags,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref data_dir) = args.data_dir {
            self.general.data_dir = data_dir.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if let Some(window_days) = args.window_days {
            self.aggregation.window_days = window_days;
        }
    }

    /// Check values that would make a run unsafe or meaningless.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.general.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        if self.builder.cadence_days < 1 {
            return Err("builder.cadence_days must be at least 1".to_string());
        }
        if self.builder.fetch_limit == 0 || self.builder.max_list_len == 0 {
            return Err("builder limits must be at least 1".to_string());
        }
        if self.builder.max_text_len == 0 {
            return Err("builder.max_text_len must be at least 1".to_string());
        }
        if self.aggregation.window_days < 1 || self.aggregation.retention_days < 1 {
            return Err("aggregation window and retention must be at least 1 day".to_string());
        }
        if self.aggregation.top_flags == 0 {
            return Err("aggregation.top_flags must be at least 1".to_string());
        }
        if let Some(category) = TrendCategory::ALL
            .iter()
            .find(|c| self.aggregation.floors.for_category(**c) == 0)
        {
            return Err(format!("cohort floor for {} must be at least 1", category));
        }
        Ok(())
    }

    /// Effective aggregation window: never longer than retention.
    pub fn effective_window_days(&self) -> i64 {
        self.aggregation
            .window_days
            .min(self.aggregation.retention_days)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::types::{FunnelDefinition, RankBy};

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `FUNNEL_REPORT__`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunnelConfig {
    #[serde(default = "default_funnel_name")]
    pub name: String,
    /// Ordered event types, at least two and all distinct.
    #[serde(default)]
    pub funnel_steps: Vec<String>,
    #[serde(default = "default_top_n_groups")]
    pub top_n_groups: i64,
    #[serde(default = "default_unknown_group_label")]
    pub unknown_group_label: String,
    #[serde(default)]
    pub rank_by: RankBy,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_dropped_samples")]
    pub max_dropped_samples: usize,
    #[serde(default)]
    pub fields: FieldMapping,
}

/// Names of the raw fields each canonical field is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldMapping {
    #[serde(default = "default_user_id_field")]
    pub user_id: String,
    #[serde(default = "default_event_type_field")]
    pub event_type: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp: String,
    #[serde(default = "default_group_field")]
    pub group: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default)]
    pub format: InputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Csv,
    Jsonl,
}

// Default functions
fn default_funnel_name() -> String {
    "default".to_string()
}
fn default_top_n_groups() -> i64 {
    3
}
fn default_unknown_group_label() -> String {
    "UNKNOWN".to_string()
}
fn default_max_dropped_samples() -> usize {
    10
}
fn default_user_id_field() -> String {
    "user_id".to_string()
}
fn default_event_type_field() -> String {
    "event_type".to_string()
}
fn default_timestamp_field() -> String {
    "timestamp".to_string()
}
fn default_group_field() -> String {
    "group".to_string()
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            name: default_funnel_name(),
            funnel_steps: Vec::new(),
            top_n_groups: default_top_n_groups(),
            unknown_group_label: default_unknown_group_label(),
            rank_by: RankBy::default(),
            parallel: false,
            max_dropped_samples: default_max_dropped_samples(),
            fields: FieldMapping::default(),
        }
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            user_id: default_user_id_field(),
            event_type: default_event_type_field(),
            timestamp: default_timestamp_field(),
            group: default_group_field(),
        }
    }
}

impl FunnelConfig {
    /// Build the funnel definition described by `name` and `funnel_steps`.
    pub fn definition(&self) -> Result<FunnelDefinition, ConfigurationError> {
        FunnelDefinition::new(self.name.clone(), self.funnel_steps.iter().cloned())
    }

    pub fn top_n(&self) -> Result<usize, ConfigurationError> {
        parse_top_n(self.top_n_groups)
    }

    /// Check every rule up front so a bad config fails before any input is read.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.definition()?;
        self.top_n()?;
        if self.unknown_group_label.trim().is_empty() {
            return Err(ConfigurationError::BlankUnknownLabel);
        }
        Ok(())
    }
}

/// A group count must be a positive integer.
pub fn parse_top_n(top_n: i64) -> Result<usize, ConfigurationError> {
    if top_n <= 0 {
        return Err(ConfigurationError::InvalidTopN(top_n));
    }
    usize::try_from(top_n).map_err(|_| ConfigurationError::InvalidTopN(top_n))
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("FUNNEL_REPORT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("funnel.funnel_steps"),
            )
            .build()?;
        config.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

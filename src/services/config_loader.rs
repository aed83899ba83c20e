use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::services::points::PointsConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesConfig {
    /// Label used in reports for the series.
    #[serde(default = "default_series_name")]
    pub name: String,
    /// Number of stage columns rendered in the ranking table, even before
    /// every stage has been scheduled.
    #[serde(default = "default_stage_columns")]
    pub stage_columns: usize,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            name: default_series_name(),
            stage_columns: default_stage_columns(),
        }
    }
}

/// How results from different stages are joined to the same athlete.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Trimmed, lowercased full name. Distinct athletes sharing a name merge.
    #[default]
    NormalizedName,
    /// Explicit athlete id from the upload, falling back to the normalized
    /// name for records that carry none.
    AthleteId,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgeBracket {
    pub label: String,
    pub min: u32,
    /// Inclusive upper bound; open-ended when absent.
    #[serde(default)]
    pub max: Option<u32>,
}

impl AgeBracket {
    pub fn contains(&self, age: u32) -> bool {
        age >= self.min && self.max.is_none_or(|max| age <= max)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_min_search_len")]
    pub min_search_len: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_search_len: default_min_search_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CopaConfig {
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub identity: IdentityPolicy,
    #[serde(default)]
    pub points: PointsConfig,
    /// Checked in order; the first bracket containing the age wins.
    #[serde(default = "default_age_brackets")]
    pub age_brackets: Vec<AgeBracket>,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Default for CopaConfig {
    fn default() -> Self {
        Self {
            series: SeriesConfig::default(),
            identity: IdentityPolicy::default(),
            points: PointsConfig::default(),
            age_brackets: default_age_brackets(),
            query: QueryConfig::default(),
        }
    }
}

fn default_series_name() -> String {
    "Copa".to_string()
}

fn default_stage_columns() -> usize {
    4
}

fn default_min_search_len() -> usize {
    3
}

fn default_age_brackets() -> Vec<AgeBracket> {
    let mut brackets = vec![AgeBracket {
        label: "18-24".to_string(),
        min: 18,
        max: Some(24),
    }];
    for start in (25..60).step_by(5) {
        brackets.push(AgeBracket {
            label: format!("{}-{}", start, start + 4),
            min: start,
            max: Some(start + 4),
        });
    }
    brackets.push(AgeBracket {
        label: "60+".to_string(),
        min: 60,
        max: None,
    });
    brackets
}

pub fn load_copa_config(data_dir: &Path) -> Result<CopaConfig> {
    let config_path = data_dir.join("config.toml");
    if !config_path.exists() {
        info!(
            "config.toml not found in data folder, using defaults: {}",
            config_path.display()
        );
        return Ok(CopaConfig::default());
    }

    let raw = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config.toml at {}", config_path.display()))?;

    parse_copa_config(&raw)
        .with_context(|| format!("Failed to parse config.toml at {}", config_path.display()))
}

pub fn parse_copa_config(raw: &str) -> Result<CopaConfig> {
    let config = toml::from_str::<CopaConfig>(raw)?;
    info!(
        "Loaded config: identity {:?}, {} age brackets, points {:?}",
        config.identity,
        config.age_brackets.len(),
        config.points
    );
    Ok(config)
}

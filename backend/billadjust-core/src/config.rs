// src/config.rs
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

pub const ENV_PREFIX: &str = "BILLADJUST_";
pub const DEFAULT_PROJECT_LABEL: &str = "Code France";
pub const DEFAULT_SNAPSHOT_DIR: &str = "./billadjust_snapshots";
pub const DEFAULT_OUTPUT_DIR: &str = "./billadjust_output";

/// What label a time entry gets when its project code is not in the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmappedCodePolicy {
    /// Use `EngineConfig::default_label`.
    DefaultLabel,
    /// Use the raw project code as its own label.
    RawCode,
}

/// Which side drives the project summary when attaching budget estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateJoin {
    /// Every budgeted project appears, even with no logged hours.
    EstimateLeft,
    /// Every project with logged hours appears, estimate 0 when absent.
    HoursLeft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_label")]
    pub default_label: String,
    #[serde(default = "default_unmapped_policy")]
    pub unmapped_policy: UnmappedCodePolicy,
    #[serde(default = "default_estimate_join")]
    pub estimate_join: EstimateJoin,
    #[serde(default = "default_true")]
    pub floor_enabled: bool,
    #[serde(default = "default_floor_ratio")]
    pub floor_ratio: Decimal,
    #[serde(default)]
    pub allow_empty_mapping: bool,
    // Number of banner lines above the header row in the budget extract
    #[serde(default)]
    pub budget_header_row: usize,
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_label() -> String {
    DEFAULT_PROJECT_LABEL.to_string()
}

fn default_unmapped_policy() -> UnmappedCodePolicy {
    UnmappedCodePolicy::DefaultLabel
}

fn default_estimate_join() -> EstimateJoin {
    EstimateJoin::EstimateLeft
}

fn default_true() -> bool {
    true
}

fn default_floor_ratio() -> Decimal {
    dec!(0.3)
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SNAPSHOT_DIR)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_label: default_label(),
            unmapped_policy: default_unmapped_policy(),
            estimate_join: default_estimate_join(),
            floor_enabled: true,
            floor_ratio: default_floor_ratio(),
            allow_empty_mapping: false,
            budget_header_row: 0,
            snapshot_dir: default_snapshot_dir(),
            output_dir: default_output_dir(),
        }
    }
}

impl EngineConfig {
    /// Loads `BILLADJUST_*` variables (and a `.env` file if present).
    /// Unset variables fall back to the defaults above.
    pub fn from_env() -> EngineResult<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Like [`EngineConfig::from_env`] over an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config = envy::prefixed(ENV_PREFIX).from_iter::<_, EngineConfig>(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.floor_ratio < Decimal::ZERO || self.floor_ratio > Decimal::ONE {
            return Err(EngineError::InvalidConfig {
                field: "floor_ratio".to_string(),
                reason: format!("must be between 0 and 1, got {}", self.floor_ratio),
            });
        }
        Ok(())
    }

    /// Label used for a code the mapping does not know.
    pub fn fallback_label(&self, project_code: &str) -> String {
        match self.unmapped_policy {
            UnmappedCodePolicy::DefaultLabel => self.default_label.clone(),
            UnmappedCodePolicy::RawCode => project_code.to_string(),
        }
    }
}

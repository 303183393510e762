// ⚙️ Pipeline configuration
// Tolerance + anomaly quantile, loadable from JSON and overridable from the CLI

use crate::error::{ReconError, ReconResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_TOLERANCE: f64 = 1000.0;
pub const DEFAULT_ANOMALY_QUANTILE: f64 = 0.99;

// ============================================================================
// PIPELINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Absolute currency amount; |difference| must exceed it to count as a mismatch
    pub tolerance: f64,

    /// Percentile (0..=1) of abs_difference above which a row is an anomaly
    pub anomaly_quantile: f64,

    /// Fail instead of fanning out when the risk table repeats a LoanID
    pub strict_risk_keys: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            tolerance: DEFAULT_TOLERANCE,
            anomaly_quantile: DEFAULT_ANOMALY_QUANTILE,
            strict_risk_keys: false,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> ReconResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ReconResult<()> {
        validate_tolerance(self.tolerance)?;
        validate_quantile(self.anomaly_quantile)?;
        Ok(())
    }
}

pub(crate) fn validate_tolerance(tolerance: f64) -> ReconResult<()> {
    if !tolerance.is_finite() || tolerance < 0.0 {
        return Err(ReconError::InvalidConfig(format!(
            "tolerance must be a finite amount >= 0, got {}",
            tolerance
        )));
    }
    Ok(())
}

pub(crate) fn validate_quantile(quantile: f64) -> ReconResult<()> {
    if !quantile.is_finite() || !(0.0..=1.0).contains(&quantile) {
        return Err(ReconError::InvalidConfig(format!(
            "anomaly quantile must be within [0, 1], got {}",
            quantile
        )));
    }
    Ok(())
}

// ============================================================================
// RUN PATHS
// ============================================================================

/// Where a run reads its inputs and publishes its reports.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub archive_db: Option<PathBuf>,
}

impl RunPaths {
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        RunPaths {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            archive_db: None,
        }
    }

    pub fn with_archive(mut self, archive_db: impl Into<PathBuf>) -> Self {
        self.archive_db = Some(archive_db.into());
        self
    }
}

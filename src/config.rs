/// Analysis configuration
///
/// Loaded from a JSON file (every field optional, missing ones take the
/// defaults below) and/or overridden from the command line. The config is
/// passed explicitly through the pipeline; nothing reads global state.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::baseline::BaselineParams;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minutes trimmed after each cycle start
    pub left_margin: f64,
    /// Minutes trimmed before each cycle end
    pub right_margin: f64,
    pub peak_prominence: f64,
    pub baseline_lambda: f64,
    pub baseline_asymmetry: f64,
    pub baseline_max_iter: usize,
    /// Write one CSV per segment
    pub save_segments: bool,
    pub correct_baseline: bool,
    /// Only effective together with `correct_baseline`
    pub extract_peaks: bool,
    /// Write one overlay CSV per cycle index
    pub draw_overlay: bool,
    pub write_logs: bool,
    /// Worker threads for per-file processing
    pub jobs: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let baseline = BaselineParams::default();
        Self {
            left_margin: 1.9,
            right_margin: 1.9,
            peak_prominence: 0.15,
            baseline_lambda: baseline.lambda,
            baseline_asymmetry: baseline.asymmetry,
            baseline_max_iter: baseline.max_iter,
            save_segments: true,
            correct_baseline: true,
            extract_peaks: true,
            draw_overlay: true,
            write_logs: true,
            jobs: 1,
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            }
        }

        if !(self.left_margin.is_finite() && self.left_margin >= 0.0) {
            return Err(invalid("left_margin", "must be a finite value >= 0"));
        }
        if !(self.right_margin.is_finite() && self.right_margin >= 0.0) {
            return Err(invalid("right_margin", "must be a finite value >= 0"));
        }
        if !(self.peak_prominence.is_finite() && self.peak_prominence >= 0.0) {
            return Err(invalid("peak_prominence", "must be a finite value >= 0"));
        }
        if !(self.baseline_lambda.is_finite() && self.baseline_lambda > 0.0) {
            return Err(invalid("baseline_lambda", "must be > 0"));
        }
        if !(self.baseline_asymmetry > 0.0 && self.baseline_asymmetry < 1.0) {
            return Err(invalid("baseline_asymmetry", "must lie strictly between 0 and 1"));
        }
        if self.baseline_max_iter == 0 {
            return Err(invalid("baseline_max_iter", "must be at least 1"));
        }
        if self.jobs == 0 {
            return Err(invalid("jobs", "must be at least 1"));
        }
        Ok(())
    }

    pub fn baseline_params(&self) -> BaselineParams {
        BaselineParams {
            lambda: self.baseline_lambda,
            asymmetry: self.baseline_asymmetry,
            max_iter: self.baseline_max_iter,
        }
    }

    /// One-line parameter summary for the processing log
    pub fn summary(&self) -> String {
        format!(
            "margins L={:.2} R={:.2} min, prominence={}, λ={:e}, p={}, iter={}",
            self.left_margin,
            self.right_margin,
            self.peak_prominence,
            self.baseline_lambda,
            self.baseline_asymmetry,
            self.baseline_max_iter
        )
    }
}

//! Run configuration.
//!
//! One serde struct per stage, gathered in [`PipelineConfig`]. Every field
//! has a default, so a JSON file only needs the values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::correct::CorrectionConfig;
use crate::error::{PipelineError, Result};
use crate::extract::ExtractConfig;
use crate::scan::ScanConfig;
use crate::stream::StreamConfig;

/// Top-level configuration of a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scan: ScanConfig,
    pub extract: ExtractConfig,
    pub correction: CorrectionConfig,
    pub stream: StreamConfig,
}

impl PipelineConfig {
    /// Load from a JSON file and validate.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        self.scan
            .validate()
            .and_then(|_| self.extract.validate())
            .and_then(|_| self.correction.validate())
            .and_then(|_| self.stream.validate())
            .map_err(PipelineError::invalid_config)
    }
}

use crate::error::{PipelineError, Result};
use crate::{atomic_write_json_pretty, load_json_file};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PROGRESS_SCHEMA_VERSION: &str = "prod_progress_v1";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub schema_version: String,
    pub system: String,
    pub last_completed_run: u32,
    pub updated_at: String,
}

impl ProgressMarker {
    pub fn new(system: &str, last_completed_run: u32) -> Self {
        Self {
            schema_version: PROGRESS_SCHEMA_VERSION.to_string(),
            system: system.to_string(),
            last_completed_run,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let value = load_json_file(path)?;
        let marker: ProgressMarker = serde_json::from_value(value)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        if marker.schema_version != PROGRESS_SCHEMA_VERSION {
            return Err(PipelineError::Config(format!(
                "{}: unsupported schema_version {}",
                path.display(),
                marker.schema_version
            )));
        }
        Ok(Some(marker))
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let value = serde_json::to_value(self)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        atomic_write_json_pretty(path, &value)
    }
}

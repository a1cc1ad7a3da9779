use crate::error::{PipelineError, Result};
use crate::stage::Stage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "mdflow.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    /// `None` runs the engine executable directly.
    pub launcher: Option<LauncherConfig>,
    pub steps: StepLengths,
    pub files: FileConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            launcher: Some(LauncherConfig::default()),
            steps: StepLengths::default(),
            files: FileConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub home_env: String,
    pub device_env: String,
    pub preproduction_executable: String,
    pub production_executable: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home_env: "AMBERHOME".to_string(),
            device_env: "CUDA_VISIBLE_DEVICES".to_string(),
            preproduction_executable: "pmemd.MPI".to_string(),
            production_executable: "pmemd.cuda.MPI".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub program: String,
    pub workers_flag: String,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "mpirun".to_string(),
            workers_flag: "-np".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StepLengths {
    pub min_cycles: u64,
    pub heat_nstlim: u64,
    pub equil_nstlim: u64,
    pub prod_nstlim: u64,
    pub ntpr: u64,
    pub ntwx: u64,
    pub ntwr: u64,
}

impl Default for StepLengths {
    fn default() -> Self {
        Self {
            min_cycles: 5000,
            heat_nstlim: 25000,
            equil_nstlim: 50000,
            prod_nstlim: 500000,
            ntpr: 1000,
            ntwx: 5000,
            ntwr: 5000,
        }
    }
}

impl StepLengths {
    pub fn for_stage(&self, stage: Stage) -> u64 {
        match stage {
            Stage::Minimize => self.min_cycles,
            Stage::Heat => self.heat_nstlim,
            Stage::Equilibrate => self.equil_nstlim,
            Stage::Produce => self.prod_nstlim,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub topology_ext: String,
    pub initial_ext: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            topology_ext: "prmtop".to_string(),
            initial_ext: "inpcrd".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_yaml_str(&raw)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }
        let candidate = root.join(DEFAULT_CONFIG_FILE);
        if candidate.exists() {
            Self::load_file(&candidate)
        } else {
            Ok(Self::default())
        }
    }
}

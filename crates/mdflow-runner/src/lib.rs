pub mod config;
pub mod error;
pub mod launcher;
pub mod layout;
pub mod progress;
pub mod sequencer;
pub mod stage;
pub mod template;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use launcher::{EngineEnv, JobInvocation, JobLauncher, JobStatus, ProcessLauncher};
pub use layout::{
    cleanup, generate, status, CleanupReport, LayoutManifest, LayoutRequest, LayoutStatus,
};
pub use sequencer::{Mode, ResumePolicy, RunRequest, RunSummary, Sequencer};
pub use stage::{ExperimentPaths, Stage, SubStep};

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;

pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))
}

pub(crate) fn sha256_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&tmp);
        return Err(PipelineError::io(path, e));
    }
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

pub(crate) fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
    atomic_write_bytes(path, &bytes)
}

pub(crate) fn load_json_file(path: &Path) -> Result<Value> {
    let raw = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    serde_json::from_slice(&raw)
        .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
}

use crate::config::{PipelineConfig, StepLengths};
use crate::error::{PipelineError, Result};
use crate::progress::ProgressMarker;
use crate::stage::{ExperimentPaths, Stage, StageScope};
use crate::template::{DescriptorRenderer, ResidueRange};
use crate::{
    atomic_write_bytes, atomic_write_json_pretty, ensure_dir, load_json_file, sha256_bytes,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const LAYOUT_SCHEMA_VERSION: &str = "layout_v1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LayoutRequest {
    pub residue_start: u32,
    pub residue_end: u32,
    pub trajectories: u32,
}

impl LayoutRequest {
    pub fn validate(&self) -> Result<ResidueRange> {
        if self.residue_start == 0 {
            return Err(PipelineError::invalid(
                "residueStart",
                "must be a positive integer",
            ));
        }
        if self.residue_end == 0 {
            return Err(PipelineError::invalid(
                "residueEnd",
                "must be a positive integer",
            ));
        }
        if self.trajectories == 0 {
            return Err(PipelineError::invalid(
                "trajectoryCount",
                "must be a positive integer",
            ));
        }
        if self.residue_end < self.residue_start {
            return Err(PipelineError::invalid(
                "residueEnd",
                format!(
                    "must not be smaller than residueStart ({} < {})",
                    self.residue_end, self.residue_start
                ),
            ));
        }
        Ok(ResidueRange {
            start: self.residue_start,
            end: self.residue_end,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutManifest {
    pub schema_version: String,
    pub residue_start: u32,
    pub residue_end: u32,
    pub trajectories: u32,
    pub steps: StepLengths,
    pub descriptors: BTreeMap<String, String>,
    pub created_at: String,
}

impl LayoutManifest {
    pub fn load(paths: &ExperimentPaths) -> Result<Option<Self>> {
        let path = paths.layout_manifest();
        if !path.exists() {
            return Ok(None);
        }
        let value = load_json_file(&path)?;
        let manifest: LayoutManifest = serde_json::from_value(value)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        if manifest.schema_version != LAYOUT_SCHEMA_VERSION {
            return Err(PipelineError::Config(format!(
                "{}: unsupported schema_version {}",
                path.display(),
                manifest.schema_version
            )));
        }
        Ok(Some(manifest))
    }
}

struct PlannedDescriptor {
    dir: PathBuf,
    file: String,
    contents: String,
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn create_stage_dir(dir: &Path) -> Result<()> {
    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(PipelineError::AlreadyExists(dir.to_path_buf()))
        }
        Err(e) => Err(PipelineError::io(dir, e)),
    }
}

pub fn generate(
    root: &Path,
    request: &LayoutRequest,
    config: &PipelineConfig,
) -> Result<LayoutManifest> {
    let residues = request.validate()?;
    let paths = ExperimentPaths::new(root);

    let mut targets: Vec<PathBuf> = paths.shared_dirs();
    for traj in 1..=request.trajectories {
        targets.extend(paths.trajectory_stage_dirs(traj));
    }
    let manifest_path = paths.layout_manifest();
    for target in targets.iter().chain(std::iter::once(&manifest_path)) {
        if target.exists() {
            return Err(PipelineError::AlreadyExists(target.clone()));
        }
    }

    let renderer = DescriptorRenderer::new()?;
    let mut planned = Vec::new();
    for stage in Stage::ALL {
        let dirs: Vec<PathBuf> = match stage.scope() {
            StageScope::Shared => vec![paths.stage_dir(stage, 0)],
            StageScope::PerTrajectory => (1..=request.trajectories)
                .map(|traj| paths.stage_dir(stage, traj))
                .collect(),
        };
        for step in stage.sub_steps() {
            let contents = renderer.render(step, residues, &config.steps)?;
            for dir in &dirs {
                planned.push(PlannedDescriptor {
                    dir: dir.clone(),
                    file: step.descriptor_file(),
                    contents: contents.clone(),
                });
            }
        }
    }

    ensure_dir(root)?;
    for target in &targets {
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        create_stage_dir(target)?;
    }

    let mut descriptors = BTreeMap::new();
    for descriptor in &planned {
        let path = descriptor.dir.join(&descriptor.file);
        atomic_write_bytes(&path, descriptor.contents.as_bytes())?;
        descriptors.insert(
            relative_key(root, &path),
            sha256_bytes(descriptor.contents.as_bytes()),
        );
    }

    let manifest = LayoutManifest {
        schema_version: LAYOUT_SCHEMA_VERSION.to_string(),
        residue_start: request.residue_start,
        residue_end: request.residue_end,
        trajectories: request.trajectories,
        steps: config.steps.clone(),
        descriptors,
        created_at: Utc::now().to_rfc3339(),
    };
    let value = serde_json::to_value(&manifest)
        .map_err(|e| PipelineError::Config(format!("layout manifest: {}", e)))?;
    atomic_write_json_pretty(&manifest_path, &value)?;

    info!(
        root = %root.display(),
        residues = %residues.mask(),
        trajectories = request.trajectories,
        descriptors = manifest.descriptors.len(),
        "layout generated"
    );
    Ok(manifest)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CleanupReport {
    pub trajectories: u32,
    pub removed: Vec<PathBuf>,
}

fn remove_path(path: &Path, removed: &mut Vec<PathBuf>) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => {
            removed.push(path.to_path_buf());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::io(path, e)),
    }
}

/// With `trajectories == None` the count recorded at generation time is used.
pub fn cleanup(root: &Path, trajectories: Option<u32>) -> Result<CleanupReport> {
    let paths = ExperimentPaths::new(root);
    let manifest = LayoutManifest::load(&paths)?;
    let count = match (trajectories, &manifest) {
        (Some(0), _) => {
            return Err(PipelineError::invalid(
                "trajectoryCount",
                "must be a positive integer",
            ))
        }
        (Some(n), Some(m)) => {
            if n != m.trajectories {
                warn!(
                    requested = n,
                    recorded = m.trajectories,
                    "cleanup count differs from the generated layout"
                );
            }
            n
        }
        (Some(n), None) => n,
        (None, Some(m)) => m.trajectories,
        (None, None) => {
            return Err(PipelineError::invalid(
                "trajectoryCount",
                format!(
                    "no layout.json under {}; pass the count explicitly",
                    root.display()
                ),
            ))
        }
    };

    let mut removed = Vec::new();
    for dir in paths.shared_dirs() {
        remove_path(&dir, &mut removed)?;
    }
    for traj in 1..=count {
        remove_path(&paths.trajectory_dir(traj), &mut removed)?;
    }
    remove_path(&paths.layout_manifest(), &mut removed)?;

    info!(
        root = %root.display(),
        trajectories = count,
        removed = removed.len(),
        "layout cleaned up"
    );
    Ok(CleanupReport {
        trajectories: count,
        removed,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrajectoryStatus {
    pub index: u32,
    pub present: bool,
    pub last_completed_run: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LayoutStatus {
    pub manifest: LayoutManifest,
    pub trajectories: Vec<TrajectoryStatus>,
    pub modified_descriptors: Vec<String>,
    pub missing_descriptors: Vec<String>,
}

pub fn status(root: &Path) -> Result<LayoutStatus> {
    let paths = ExperimentPaths::new(root);
    let manifest = LayoutManifest::load(&paths)?
        .ok_or_else(|| PipelineError::DirectoryNotFound(paths.layout_manifest()))?;

    let mut modified_descriptors = Vec::new();
    let mut missing_descriptors = Vec::new();
    for (key, digest) in &manifest.descriptors {
        let path = root.join(key);
        match fs::read(&path) {
            Ok(bytes) if sha256_bytes(&bytes) != *digest => modified_descriptors.push(key.clone()),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                missing_descriptors.push(key.clone())
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        }
    }

    let mut trajectories = Vec::new();
    for index in 1..=manifest.trajectories {
        let present = paths.trajectory_stage_dirs(index).iter().all(|d| d.is_dir());
        let last_completed_run =
            ProgressMarker::load(&paths.progress_marker(index))?.map(|m| m.last_completed_run);
        trajectories.push(TrajectoryStatus {
            index,
            present,
            last_completed_run,
        });
    }

    Ok(LayoutStatus {
        manifest,
        trajectories,
        modified_descriptors,
        missing_descriptors,
    })
}

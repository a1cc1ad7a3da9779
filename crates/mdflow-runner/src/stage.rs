use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Minimize,
    Heat,
    Equilibrate,
    Produce,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageScope {
    Shared,
    PerTrajectory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubStep {
    pub stage: Stage,
    pub name: &'static str,
    pub restrained: bool,
    pub dynamics: bool,
}

const MINIMIZE_STEPS: &[SubStep] = &[SubStep {
    stage: Stage::Minimize,
    name: "min",
    restrained: true,
    dynamics: false,
}];

const HEAT_STEPS: &[SubStep] = &[
    SubStep {
        stage: Stage::Heat,
        name: "heat1",
        restrained: true,
        dynamics: true,
    },
    SubStep {
        stage: Stage::Heat,
        name: "heat2",
        restrained: true,
        dynamics: true,
    },
];

const EQUILIBRATE_STEPS: &[SubStep] = &[
    SubStep {
        stage: Stage::Equilibrate,
        name: "equil1",
        restrained: true,
        dynamics: true,
    },
    SubStep {
        stage: Stage::Equilibrate,
        name: "equil2",
        restrained: true,
        dynamics: true,
    },
    SubStep {
        stage: Stage::Equilibrate,
        name: "equil3",
        restrained: true,
        dynamics: true,
    },
    SubStep {
        stage: Stage::Equilibrate,
        name: "equil4",
        restrained: true,
        dynamics: true,
    },
    SubStep {
        stage: Stage::Equilibrate,
        name: "equil5",
        restrained: true,
        dynamics: true,
    },
];

const PRODUCE_STEPS: &[SubStep] = &[SubStep {
    stage: Stage::Produce,
    name: "prod",
    restrained: false,
    dynamics: true,
}];

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Minimize,
        Stage::Heat,
        Stage::Equilibrate,
        Stage::Produce,
    ];

    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Minimize => "001.min",
            Stage::Heat => "002.heat",
            Stage::Equilibrate => "003.equil",
            Stage::Produce => "004.prod",
        }
    }

    pub fn scope(self) -> StageScope {
        match self {
            Stage::Minimize | Stage::Heat => StageScope::Shared,
            Stage::Equilibrate | Stage::Produce => StageScope::PerTrajectory,
        }
    }

    pub fn sub_steps(self) -> &'static [SubStep] {
        match self {
            Stage::Minimize => MINIMIZE_STEPS,
            Stage::Heat => HEAT_STEPS,
            Stage::Equilibrate => EQUILIBRATE_STEPS,
            Stage::Produce => PRODUCE_STEPS,
        }
    }

    pub fn shared() -> impl Iterator<Item = Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| s.scope() == StageScope::Shared)
    }

    pub fn per_trajectory() -> impl Iterator<Item = Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| s.scope() == StageScope::PerTrajectory)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl SubStep {
    pub fn descriptor_file(&self) -> String {
        format!("{}.in", self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepOutputs {
    pub log: String,
    pub info: String,
    pub trajectory: String,
    pub restart: String,
}

impl StepOutputs {
    pub fn new(system: &str, tag: &str) -> Self {
        Self {
            log: format!("{}_{}.out", system, tag),
            info: format!("{}_{}.mdinfo", system, tag),
            trajectory: format!("{}_{}.nc", system, tag),
            restart: format!("{}_{}.rst", system, tag),
        }
    }

    pub fn for_step(system: &str, step: &SubStep) -> Self {
        Self::new(system, step.name)
    }

    pub fn for_run(system: &str, run: u32) -> Self {
        Self::new(system, &format!("prod_{}", run))
    }
}

#[derive(Clone, Debug)]
pub struct ExperimentPaths {
    root: PathBuf,
}

impl ExperimentPaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trajectory_dir(&self, trajectory: u32) -> PathBuf {
        self.root.join(format!("Traj{}", trajectory))
    }

    /// Directory of `stage`; `trajectory` is ignored for shared stages.
    pub fn stage_dir(&self, stage: Stage, trajectory: u32) -> PathBuf {
        match stage.scope() {
            StageScope::Shared => self.root.join(stage.dir_name()),
            StageScope::PerTrajectory => self.trajectory_dir(trajectory).join(stage.dir_name()),
        }
    }

    pub fn shared_dirs(&self) -> Vec<PathBuf> {
        Stage::shared().map(|s| self.stage_dir(s, 0)).collect()
    }

    pub fn trajectory_stage_dirs(&self, trajectory: u32) -> Vec<PathBuf> {
        Stage::per_trajectory()
            .map(|s| self.stage_dir(s, trajectory))
            .collect()
    }

    pub fn layout_manifest(&self) -> PathBuf {
        self.root.join("layout.json")
    }

    pub fn progress_marker(&self, trajectory: u32) -> PathBuf {
        self.stage_dir(Stage::Produce, trajectory)
            .join("progress.json")
    }

    pub fn topology(&self, system: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", system, extension))
    }

    pub fn initial_structure(&self, system: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", system, extension))
    }
}

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::launcher::{EngineEnv, JobInvocation, JobLauncher};
use crate::progress::ProgressMarker;
use crate::stage::{ExperimentPaths, Stage, StepOutputs, SubStep};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Preproduction,
    Production,
}

impl Mode {
    pub fn from_code(code: &str) -> Option<Mode> {
        match code {
            "0" => Some(Mode::Preproduction),
            "1" => Some(Mode::Production),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    #[default]
    Trust,
    Verify,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    pub mode: Mode,
    pub system: String,
    pub workers: u32,
    pub device: Option<u32>,
    pub run_start: Option<u32>,
    pub run_stop: Option<u32>,
    pub trajectory: Option<u32>,
    pub resume_policy: ResumePolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ProductionPlan {
    device: u32,
    run_start: u32,
    run_stop: u32,
    trajectory: u32,
}

impl RunRequest {
    pub fn preproduction(system: &str, workers: u32) -> Self {
        Self {
            mode: Mode::Preproduction,
            system: system.to_string(),
            workers,
            device: None,
            run_start: None,
            run_stop: None,
            trajectory: None,
            resume_policy: ResumePolicy::Trust,
        }
    }

    pub fn production(
        system: &str,
        workers: u32,
        device: u32,
        run_start: u32,
        run_stop: u32,
        trajectory: u32,
    ) -> Self {
        Self {
            mode: Mode::Production,
            device: Some(device),
            run_start: Some(run_start),
            run_stop: Some(run_stop),
            trajectory: Some(trajectory),
            ..Self::preproduction(system, workers)
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.production_plan().map(|_| ())
    }

    fn production_plan(&self) -> Result<Option<ProductionPlan>> {
        if self.system.trim().is_empty() {
            return Err(PipelineError::invalid("systemName", "must not be empty"));
        }
        if self.workers == 0 {
            return Err(PipelineError::invalid(
                "workerCount",
                "must be a positive integer",
            ));
        }
        if self.mode == Mode::Preproduction {
            return Ok(None);
        }
        let device = self
            .device
            .ok_or(PipelineError::MissingArgument("deviceIndex"))?;
        let run_start = self
            .run_start
            .ok_or(PipelineError::MissingArgument("runStart"))?;
        let run_stop = self
            .run_stop
            .ok_or(PipelineError::MissingArgument("runStop"))?;
        let trajectory = self
            .trajectory
            .ok_or(PipelineError::MissingArgument("trajectoryIndex"))?;
        if trajectory == 0 {
            return Err(PipelineError::invalid(
                "trajectoryIndex",
                "must be a positive integer",
            ));
        }
        Ok(Some(ProductionPlan {
            device,
            run_start,
            run_stop,
            trajectory,
        }))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub last_completed_run: Option<u32>,
}

pub struct Sequencer<'a, L: JobLauncher> {
    paths: ExperimentPaths,
    config: &'a PipelineConfig,
    engine: EngineEnv,
    launcher: L,
}

impl<'a, L: JobLauncher> Sequencer<'a, L> {
    pub fn new(root: &Path, config: &'a PipelineConfig, engine: EngineEnv, launcher: L) -> Self {
        Self {
            paths: ExperimentPaths::new(root),
            config,
            engine,
            launcher,
        }
    }

    pub fn run(&self, request: &RunRequest) -> Result<RunSummary> {
        match request.production_plan()? {
            None => self.run_preproduction(request),
            Some(plan) => self.run_production(request, plan),
        }
    }

    fn run_preproduction(&self, request: &RunRequest) -> Result<RunSummary> {
        let system = request.system.as_str();
        for stage in Stage::shared() {
            require_dir(&self.paths.stage_dir(stage, 0))?;
        }
        let topology = self.topology(system);
        let mut input = self
            .paths
            .initial_structure(system, &self.config.files.initial_ext);
        require_artifact("001.min/min", &topology)?;
        require_artifact("001.min/min", &input)?;

        let executable = &self.config.engine.preproduction_executable;
        let mut summary = RunSummary::default();
        for stage in Stage::shared() {
            let dir = self.paths.stage_dir(stage, 0);
            for step in stage.sub_steps() {
                let job = self.invocation(JobSpec {
                    step,
                    tag: step.name,
                    trajectory: None,
                    dir: &dir,
                    input: &input,
                    topology: &topology,
                    system,
                    workers: request.workers,
                    device: None,
                    executable,
                });
                self.execute(&job)?;
                summary.completed.push(job.describe());
                input = job.restart;
            }
        }
        info!(system, "preproduction complete");
        Ok(summary)
    }

    fn run_production(&self, request: &RunRequest, plan: ProductionPlan) -> Result<RunSummary> {
        let system = request.system.as_str();
        let traj = plan.trajectory;
        let equil_dir = self.paths.stage_dir(Stage::Equilibrate, traj);
        let prod_dir = self.paths.stage_dir(Stage::Produce, traj);
        require_dir(&equil_dir)?;
        require_dir(&prod_dir)?;
        if request.resume_policy == ResumePolicy::Verify {
            self.verify_resume(system, plan)?;
        }
        let topology = self.topology(system);
        require_artifact(&format!("Traj{}/003.equil", traj), &topology)?;

        let executable = &self.config.engine.production_executable;
        let marker_path = self.paths.progress_marker(traj);
        let prod_step = &Stage::Produce.sub_steps()[0];
        let mut summary = RunSummary::default();

        let mut input = self.final_restart(Stage::Heat, 0, system);
        require_artifact(&format!("Traj{}/003.equil", traj), &input)?;
        for step in Stage::Equilibrate.sub_steps() {
            let job = self.invocation(JobSpec {
                step,
                tag: step.name,
                trajectory: Some(traj),
                dir: &equil_dir,
                input: &input,
                topology: &topology,
                system,
                workers: request.workers,
                device: Some(plan.device),
                executable,
            });
            self.execute(&job)?;
            summary.completed.push(job.describe());
            input = job.restart;
        }

        let first_run = if plan.run_start == 0 {
            let tag = run_tag(0);
            let job = self.invocation(JobSpec {
                step: prod_step,
                tag: &tag,
                trajectory: Some(traj),
                dir: &prod_dir,
                input: &input,
                topology: &topology,
                system,
                workers: request.workers,
                device: Some(plan.device),
                executable,
            });
            self.execute(&job)?;
            ProgressMarker::new(system, 0).store(&marker_path)?;
            summary.completed.push(job.describe());
            summary.last_completed_run = Some(0);
            1
        } else {
            info!(
                trajectory = traj,
                run_start = plan.run_start,
                "resuming production run loop"
            );
            plan.run_start
        };

        if plan.run_start > plan.run_stop {
            warn!(
                run_start = plan.run_start,
                run_stop = plan.run_stop,
                "run range is empty; no further production runs"
            );
        }
        for nrun in first_run..=plan.run_stop {
            let prev = nrun - 1;
            let input = prod_dir.join(StepOutputs::for_run(system, prev).restart);
            let tag = run_tag(nrun);
            let job = self.invocation(JobSpec {
                step: prod_step,
                tag: &tag,
                trajectory: Some(traj),
                dir: &prod_dir,
                input: &input,
                topology: &topology,
                system,
                workers: request.workers,
                device: Some(plan.device),
                executable,
            });
            self.execute(&job)?;
            ProgressMarker::new(system, nrun).store(&marker_path)?;
            summary.completed.push(job.describe());
            summary.last_completed_run = Some(nrun);
        }

        info!(
            system,
            trajectory = traj,
            last_completed_run = ?summary.last_completed_run,
            "production complete"
        );
        Ok(summary)
    }

    fn verify_resume(&self, system: &str, plan: ProductionPlan) -> Result<()> {
        let marker_path = self.paths.progress_marker(plan.trajectory);
        let recorded = ProgressMarker::load(&marker_path)?;
        if plan.run_start == 0 {
            if let Some(marker) = recorded {
                warn!(
                    system = %marker.system,
                    last_completed_run = marker.last_completed_run,
                    "restarting from run 0; recorded runs will be overwritten"
                );
            }
            return Ok(());
        }
        let marker = recorded.ok_or_else(|| {
            PipelineError::ResumeRejected(format!(
                "no progress marker at {}; runs before {} cannot be verified",
                marker_path.display(),
                plan.run_start
            ))
        })?;
        if marker.system != system {
            return Err(PipelineError::ResumeRejected(format!(
                "progress marker belongs to system {}, not {}",
                marker.system, system
            )));
        }
        let needed = plan.run_start - 1;
        if marker.last_completed_run < needed {
            return Err(PipelineError::ResumeRejected(format!(
                "last completed run is {}; runStart {} would skip unverified runs",
                marker.last_completed_run, plan.run_start
            )));
        }
        if marker.last_completed_run > needed {
            warn!(
                last_completed_run = marker.last_completed_run,
                run_start = plan.run_start,
                "resuming before the last completed run; later runs will be overwritten"
            );
        }
        let prev = self
            .paths
            .stage_dir(Stage::Produce, plan.trajectory)
            .join(StepOutputs::for_run(system, needed).restart);
        if !prev.exists() {
            return Err(PipelineError::ResumeRejected(format!(
                "restart artifact of run {} is missing: {}",
                needed,
                prev.display()
            )));
        }
        Ok(())
    }

    fn topology(&self, system: &str) -> PathBuf {
        self.paths
            .topology(system, &self.config.files.topology_ext)
    }

    fn final_restart(&self, stage: Stage, trajectory: u32, system: &str) -> PathBuf {
        let steps = stage.sub_steps();
        let last = &steps[steps.len() - 1];
        self.paths
            .stage_dir(stage, trajectory)
            .join(StepOutputs::for_step(system, last).restart)
    }

    fn invocation(&self, spec: JobSpec<'_>) -> JobInvocation {
        let outputs = StepOutputs::new(spec.system, spec.tag);
        let mut engine_args: Vec<String> = vec![
            "-O".to_string(),
            "-i".to_string(),
            spec.step.descriptor_file(),
            "-o".to_string(),
            outputs.log.clone(),
            "-p".to_string(),
            path_arg(spec.topology),
            "-c".to_string(),
            path_arg(spec.input),
            "-r".to_string(),
            outputs.restart.clone(),
            "-inf".to_string(),
            outputs.info.clone(),
        ];
        if spec.step.dynamics {
            engine_args.push("-x".to_string());
            engine_args.push(outputs.trajectory.clone());
        }
        if spec.step.restrained {
            engine_args.push("-ref".to_string());
            engine_args.push(path_arg(spec.input));
        }

        let engine_path = path_arg(&self.engine.executable(spec.executable));
        let (program, args) = match &self.config.launcher {
            Some(launcher) => {
                let mut args = vec![
                    launcher.workers_flag.clone(),
                    spec.workers.to_string(),
                    engine_path,
                ];
                args.extend(engine_args);
                (launcher.program.clone(), args)
            }
            None => (engine_path, engine_args),
        };

        let env = spec
            .device
            .map(|d| vec![(self.config.engine.device_env.clone(), d.to_string())])
            .unwrap_or_default();

        JobInvocation {
            stage: spec.step.stage,
            tag: spec.tag.to_string(),
            trajectory: spec.trajectory,
            program,
            args,
            working_dir: spec.dir.to_path_buf(),
            env,
            input: spec.input.to_path_buf(),
            restart: spec.dir.join(&outputs.restart),
        }
    }

    fn execute(&self, job: &JobInvocation) -> Result<()> {
        info!(step = %job.describe(), command = %job.command_line(), "launching");
        let status = self.launcher.launch(job)?;
        if !status.success() {
            return Err(PipelineError::StageFailure {
                step: job.describe(),
                detail: status.describe(),
            });
        }
        if !job.restart.exists() {
            return Err(PipelineError::StageFailure {
                step: job.describe(),
                detail: format!(
                    "exited with status 0 but wrote no restart artifact {}",
                    job.restart.display()
                ),
            });
        }
        info!(step = %job.describe(), "completed");
        Ok(())
    }
}

struct JobSpec<'s> {
    step: &'s SubStep,
    tag: &'s str,
    trajectory: Option<u32>,
    dir: &'s Path,
    input: &'s Path,
    topology: &'s Path,
    system: &'s str,
    workers: u32,
    device: Option<u32>,
    executable: &'s str,
}

fn run_tag(run: u32) -> String {
    format!("prod_{}", run)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn require_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::DirectoryNotFound(dir.to_path_buf()))
    }
}

fn require_artifact(step: &str, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(PipelineError::MissingArtifact {
            step: step.to_string(),
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::mock::RecordingLauncher;
    use crate::layout::{generate, LayoutRequest};
    use std::fs;

    const SYSTEM: &str = "prot";
    const EQUIL: [&str; 5] = ["equil1", "equil2", "equil3", "equil4", "equil5"];

    fn with_equil(runs: &[&str]) -> Vec<String> {
        EQUIL
            .iter()
            .chain(runs.iter())
            .map(|t| t.to_string())
            .collect()
    }

    fn experiment(trajectories: u32) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        generate(
            dir.path(),
            &LayoutRequest {
                residue_start: 1,
                residue_end: 120,
                trajectories,
            },
            &PipelineConfig::default(),
        )
        .expect("layout");
        fs::write(dir.path().join("prot.prmtop"), "top").expect("prmtop");
        fs::write(dir.path().join("prot.inpcrd"), "crd").expect("inpcrd");
        dir
    }

    fn engine() -> EngineEnv {
        EngineEnv::new(Path::new("/opt/amber"))
    }

    fn arg_after<'j>(job: &'j JobInvocation, flag: &str) -> &'j str {
        let pos = job
            .args
            .iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("{} missing in {:?}", flag, job.args));
        &job.args[pos + 1]
    }

    fn preproduce(root: &Path, config: &PipelineConfig) {
        let launcher = RecordingLauncher::new();
        Sequencer::new(root, config, engine(), &launcher)
            .run(&RunRequest::preproduction(SYSTEM, 4))
            .expect("preproduction");
    }

    #[test]
    fn preproduction_chains_restart_artifacts() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        let launcher = RecordingLauncher::new();
        let summary = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::preproduction(SYSTEM, 4))
            .expect("run");

        assert_eq!(launcher.tags(), vec!["min", "heat1", "heat2"]);
        assert_eq!(
            summary.completed,
            vec!["001.min/min", "002.heat/heat1", "002.heat/heat2"]
        );
        let jobs = launcher.invocations();
        assert_eq!(jobs[0].program, "mpirun");
        assert_eq!(&jobs[0].args[..3], &["-np", "4", "/opt/amber/bin/pmemd.MPI"]);
        assert_eq!(jobs[0].input, exp.path().join("prot.inpcrd"));
        assert_eq!(jobs[1].input, exp.path().join("001.min").join("prot_min.rst"));
        assert_eq!(jobs[2].input, jobs[1].restart);
        assert_eq!(arg_after(&jobs[2], "-ref"), arg_after(&jobs[2], "-c"));
        assert_eq!(arg_after(&jobs[1], "-i"), "heat1.in");
        assert_eq!(jobs[1].working_dir, exp.path().join("002.heat"));
        assert!(!jobs[0].args.contains(&"-x".to_string()));
        assert!(jobs.iter().all(|j| j.env.is_empty()));
    }

    #[test]
    fn preproduction_halts_on_failed_sub_step() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        let launcher = RecordingLauncher::new().failing_on("heat1");
        let err = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::preproduction(SYSTEM, 2))
            .expect_err("heat1 fails");

        assert_eq!(launcher.tags(), vec!["min", "heat1"]);
        match &err {
            PipelineError::StageFailure { step, detail } => {
                assert_eq!(step, "002.heat/heat1");
                assert!(detail.contains("status 1"), "{}", detail);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_ne!(err.exit_code(), 0);
    }

    #[test]
    fn zero_exit_without_restart_is_a_failure() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        let launcher = RecordingLauncher::new().without_restart_for("min");
        let err = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::preproduction(SYSTEM, 1))
            .expect_err("no restart");
        assert_eq!(launcher.tags(), vec!["min"]);
        assert!(err.to_string().contains("no restart artifact"), "{}", err);
    }

    #[test]
    fn production_requires_all_arguments_before_launching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig::default();
        let full = RunRequest::production(SYSTEM, 1, 0, 0, 2, 1);
        let cases: Vec<(RunRequest, &str)> = vec![
            (
                RunRequest {
                    device: None,
                    ..full.clone()
                },
                "deviceIndex",
            ),
            (
                RunRequest {
                    run_start: None,
                    ..full.clone()
                },
                "runStart",
            ),
            (
                RunRequest {
                    run_stop: None,
                    ..full.clone()
                },
                "runStop",
            ),
            (
                RunRequest {
                    trajectory: None,
                    ..full.clone()
                },
                "trajectoryIndex",
            ),
        ];
        for (request, missing) in cases {
            let launcher = RecordingLauncher::new();
            let err = Sequencer::new(dir.path(), &config, engine(), &launcher)
                .run(&request)
                .expect_err("missing argument");
            match err {
                PipelineError::MissingArgument(name) => assert_eq!(name, missing),
                other => panic!("unexpected error: {}", other),
            }
            assert!(launcher.invocations().is_empty());
        }
    }

    #[test]
    fn production_needs_generated_trajectory() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        let launcher = RecordingLauncher::new();
        let err = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 1, 0, 0, 1, 2))
            .expect_err("Traj2 absent");
        assert!(matches!(err, PipelineError::DirectoryNotFound(_)), "{}", err);
        assert!(launcher.invocations().is_empty());
    }

    #[test]
    fn production_without_heat_artifact_is_refused() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        let launcher = RecordingLauncher::new();
        let err = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 1, 0, 0, 1, 1))
            .expect_err("heat2 restart missing");
        assert!(matches!(err, PipelineError::MissingArtifact { .. }), "{}", err);
        assert!(launcher.invocations().is_empty());
    }

    #[test]
    fn production_runs_chain_and_resume() {
        let exp = experiment(2);
        let config = PipelineConfig::default();
        preproduce(exp.path(), &config);

        let launcher = RecordingLauncher::new();
        let summary = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 2, 1, 0, 2, 2))
            .expect("first session");
        assert_eq!(launcher.tags(), with_equil(&["prod_0", "prod_1", "prod_2"]));
        assert_eq!(summary.last_completed_run, Some(2));

        let jobs = launcher.invocations();
        let heat2 = exp.path().join("002.heat").join("prot_heat2.rst");
        assert_eq!(jobs[0].input, heat2);
        assert_eq!(jobs[5].input, jobs[4].restart);
        assert_eq!(jobs[6].input, jobs[5].restart);
        assert_eq!(jobs[7].input, jobs[6].restart);
        let prod_dir = exp.path().join("Traj2").join("004.prod");
        assert_eq!(jobs[7].working_dir, prod_dir);
        assert_eq!(jobs[7].restart, prod_dir.join("prot_prod_2.rst"));
        assert_eq!(
            &jobs[7].args[..3],
            &["-np", "2", "/opt/amber/bin/pmemd.cuda.MPI"]
        );
        assert!(!jobs[7].args.contains(&"-ref".to_string()));
        for job in &jobs {
            assert_eq!(
                job.env,
                vec![("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string())]
            );
        }
        let marker = ProgressMarker::load(&prod_dir.join("progress.json"))
            .expect("marker")
            .expect("present");
        assert_eq!(marker.last_completed_run, 2);

        let resumed = RecordingLauncher::new();
        Sequencer::new(exp.path(), &config, engine(), &resumed)
            .run(&RunRequest::production(SYSTEM, 2, 1, 3, 4, 2))
            .expect("resumed session");
        assert_eq!(resumed.tags(), with_equil(&["prod_3", "prod_4"]));
        let jobs = resumed.invocations();
        assert_eq!(jobs[0].input, heat2);
        assert_eq!(jobs[5].input, prod_dir.join("prot_prod_2.rst"));
        assert_eq!(jobs[6].input, prod_dir.join("prot_prod_3.rst"));
        assert!(!exp
            .path()
            .join("Traj1")
            .join("004.prod")
            .join("progress.json")
            .exists());
    }

    #[test]
    fn failed_run_leaves_previous_run_as_last_known_good() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        preproduce(exp.path(), &config);

        let launcher = RecordingLauncher::new().failing_on("prod_2");
        let err = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 1, 0, 0, 5, 1))
            .expect_err("run 2 fails");
        assert!(err.to_string().contains("Traj1/004.prod/prod_2"), "{}", err);
        assert_eq!(launcher.tags().last().map(String::as_str), Some("prod_2"));
        let marker = ProgressMarker::load(&ExperimentPaths::new(exp.path()).progress_marker(1))
            .expect("marker")
            .expect("present");
        assert_eq!(marker.last_completed_run, 1);

        let retry = RecordingLauncher::new();
        Sequencer::new(exp.path(), &config, engine(), &retry)
            .run(&RunRequest {
                resume_policy: ResumePolicy::Verify,
                ..RunRequest::production(SYSTEM, 1, 0, 2, 3, 1)
            })
            .expect("verified resume");
        assert_eq!(retry.tags(), with_equil(&["prod_2", "prod_3"]));
    }

    #[test]
    fn verify_policy_rejects_skipped_runs() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        preproduce(exp.path(), &config);
        let launcher = RecordingLauncher::new();
        Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 1, 0, 0, 1, 1))
            .expect("runs 0..1");

        let verify = |start: u32, system: &str| {
            let l = RecordingLauncher::new();
            let result = Sequencer::new(exp.path(), &config, engine(), &l).run(&RunRequest {
                resume_policy: ResumePolicy::Verify,
                ..RunRequest::production(system, 1, 0, start, start, 1)
            });
            (result, l.tags())
        };

        let (result, tags) = verify(5, SYSTEM);
        assert!(matches!(result, Err(PipelineError::ResumeRejected(_))));
        assert!(tags.is_empty());

        let (result, tags) = verify(2, "other");
        assert!(matches!(result, Err(PipelineError::ResumeRejected(_))));
        assert!(tags.is_empty());

        let (result, tags) = verify(2, SYSTEM);
        result.expect("run 2 follows run 1");
        assert_eq!(tags, with_equil(&["prod_2"]));
    }

    #[test]
    fn trust_policy_accepts_unverified_resume() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        preproduce(exp.path(), &config);
        let launcher = RecordingLauncher::new();
        Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 1, 0, 4, 4, 1))
            .expect("trusted");
        let jobs = launcher.invocations();
        assert_eq!(launcher.tags(), with_equil(&["prod_4"]));
        assert!(jobs[5].input.ends_with("prot_prod_3.rst"));

        let rejected = RecordingLauncher::new();
        let err = Sequencer::new(exp.path(), &config, engine(), &rejected)
            .run(&RunRequest {
                resume_policy: ResumePolicy::Verify,
                ..RunRequest::production(SYSTEM, 1, 0, 6, 6, 1)
            })
            .expect_err("marker says 4");
        assert!(matches!(err, PipelineError::ResumeRejected(_)), "{}", err);
    }

    #[test]
    fn resumed_production_repeats_equilibration_before_run_loop() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        preproduce(exp.path(), &config);
        let launcher = RecordingLauncher::new();
        let summary = Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::production(SYSTEM, 1, 0, 3, 4, 1))
            .expect("resume at 3");

        assert_eq!(launcher.tags(), with_equil(&["prod_3", "prod_4"]));
        assert_eq!(summary.completed[0], "Traj1/003.equil/equil1");
        assert_eq!(summary.last_completed_run, Some(4));
        let jobs = launcher.invocations();
        let equil_dir = exp.path().join("Traj1").join("003.equil");
        assert!(jobs[..5].iter().all(|j| j.working_dir == equil_dir));
        assert_eq!(jobs[4].restart, equil_dir.join("prot_equil5.rst"));
        assert!(jobs[5].input.ends_with("prot_prod_2.rst"));
    }

    #[test]
    fn verify_policy_allows_restart_from_zero_over_recorded_runs() {
        let exp = experiment(1);
        let config = PipelineConfig::default();
        preproduce(exp.path(), &config);
        let marker_path = ExperimentPaths::new(exp.path()).progress_marker(1);
        Sequencer::new(exp.path(), &config, engine(), RecordingLauncher::new())
            .run(&RunRequest::production(SYSTEM, 1, 0, 0, 3, 1))
            .expect("runs 0..3");

        let again = RecordingLauncher::new();
        let summary = Sequencer::new(exp.path(), &config, engine(), &again)
            .run(&RunRequest {
                resume_policy: ResumePolicy::Verify,
                ..RunRequest::production(SYSTEM, 1, 0, 0, 1, 1)
            })
            .expect("re-run from zero");
        assert_eq!(again.tags(), with_equil(&["prod_0", "prod_1"]));
        assert_eq!(summary.last_completed_run, Some(1));
        let marker = ProgressMarker::load(&marker_path)
            .expect("marker")
            .expect("present");
        assert_eq!(marker.last_completed_run, 1);
    }

    #[test]
    fn engine_runs_directly_without_launcher() {
        let exp = experiment(1);
        let config = PipelineConfig {
            launcher: None,
            ..PipelineConfig::default()
        };
        let launcher = RecordingLauncher::new();
        Sequencer::new(exp.path(), &config, engine(), &launcher)
            .run(&RunRequest::preproduction(SYSTEM, 8))
            .expect("run");
        let jobs = launcher.invocations();
        assert_eq!(jobs[0].program, "/opt/amber/bin/pmemd.MPI");
        assert_eq!(jobs[0].args[0], "-O");
    }

    #[test]
    fn mode_codes() {
        assert_eq!(Mode::from_code("0"), Some(Mode::Preproduction));
        assert_eq!(Mode::from_code("1"), Some(Mode::Production));
        assert_eq!(Mode::from_code("2"), None);
    }

    #[test]
    fn invalid_request_fields_are_named() {
        let err = RunRequest::preproduction("", 1).validate().expect_err("empty");
        assert!(err.to_string().contains("systemName"));
        let err = RunRequest::preproduction("s", 0).validate().expect_err("zero");
        assert!(err.to_string().contains("workerCount"));
        let err = RunRequest::production("s", 1, 0, 0, 1, 0)
            .validate()
            .expect_err("traj 0");
        assert!(err.to_string().contains("trajectoryIndex"));
    }
}

use crate::config::EngineConfig;
use crate::error::{PipelineError, Result};
use crate::stage::Stage;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineEnv {
    pub home: PathBuf,
}

impl EngineEnv {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    pub fn from_env(config: &EngineConfig) -> Result<Self> {
        match std::env::var_os(&config.home_env) {
            Some(home) if !home.is_empty() => Ok(Self {
                home: PathBuf::from(home),
            }),
            _ => Err(PipelineError::Environment(format!(
                "{} is not set; point it at the engine installation",
                config.home_env
            ))),
        }
    }

    pub fn executable(&self, name: &str) -> PathBuf {
        self.home.join("bin").join(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobInvocation {
    pub stage: Stage,
    pub tag: String,
    pub trajectory: Option<u32>,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub input: PathBuf,
    pub restart: PathBuf,
}

impl JobInvocation {
    pub fn describe(&self) -> String {
        match self.trajectory {
            Some(traj) => format!("Traj{}/{}/{}", traj, self.stage.dir_name(), self.tag),
            None => format!("{}/{}", self.stage.dir_name(), self.tag),
        }
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobStatus {
    pub code: Option<i32>,
}

impl JobStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

pub trait JobLauncher {
    /// Runs the job to completion. Errors are reserved for jobs that could not
    /// be started at all; a job that ran and failed returns its status.
    fn launch(&self, job: &JobInvocation) -> Result<JobStatus>;
}

impl<T: JobLauncher + ?Sized> JobLauncher for &T {
    fn launch(&self, job: &JobInvocation) -> Result<JobStatus> {
        (**self).launch(job)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessLauncher;

impl JobLauncher for ProcessLauncher {
    fn launch(&self, job: &JobInvocation) -> Result<JobStatus> {
        let mut cmd = Command::new(&job.program);
        cmd.args(&job.args);
        cmd.current_dir(&job.working_dir);
        for (key, value) in &job.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        let status = cmd.status().map_err(|e| PipelineError::StageFailure {
            step: job.describe(),
            detail: format!("could not start {}: {}", job.program, e),
        })?;
        Ok(JobStatus {
            code: status.code(),
        })
    }
}

pub mod mock {
    use super::*;
    use std::fs;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingLauncher {
        calls: Mutex<Vec<JobInvocation>>,
        fail_on: Option<String>,
        no_restart_for: Option<String>,
    }

    impl RecordingLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(mut self, tag: &str) -> Self {
            self.fail_on = Some(tag.to_string());
            self
        }

        pub fn without_restart_for(mut self, tag: &str) -> Self {
            self.no_restart_for = Some(tag.to_string());
            self
        }

        pub fn invocations(&self) -> Vec<JobInvocation> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        pub fn tags(&self) -> Vec<String> {
            self.invocations().into_iter().map(|j| j.tag).collect()
        }
    }

    impl JobLauncher for RecordingLauncher {
        fn launch(&self, job: &JobInvocation) -> Result<JobStatus> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(job.clone());
            }
            if self.fail_on.as_deref() == Some(job.tag.as_str()) {
                return Ok(JobStatus { code: Some(1) });
            }
            if self.no_restart_for.as_deref() != Some(job.tag.as_str()) {
                if let Some(parent) = job.restart.parent() {
                    fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
                }
                fs::write(&job.restart, job.tag.as_bytes())
                    .map_err(|e| PipelineError::io(&job.restart, e))?;
            }
            Ok(JobStatus { code: Some(0) })
        }
    }
}

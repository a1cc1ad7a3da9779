use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use mdflow_runner::{
    cleanup, generate, status, EngineEnv, LayoutRequest, Mode, PipelineConfig, PipelineError,
    ProcessLauncher, ResumePolicy, RunRequest, Sequencer,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mdflow", version, about = "Staged MD pipeline: layout generation and sequencing")]
struct Cli {
    /// Experiment root holding the stage directories
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    /// Pipeline configuration (defaults to <root>/mdflow.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ResumePolicyArg {
    #[value(name = "trust")]
    Trust,
    #[value(name = "verify")]
    Verify,
}

impl From<ResumePolicyArg> for ResumePolicy {
    fn from(value: ResumePolicyArg) -> Self {
        match value {
            ResumePolicyArg::Trust => ResumePolicy::Trust,
            ResumePolicyArg::Verify => ResumePolicy::Verify,
        }
    }
}

fn parse_mode(raw: &str) -> std::result::Result<Mode, String> {
    Mode::from_code(raw)
        .ok_or_else(|| format!("unknown mode '{}': use 0 (preproduction) or 1 (production)", raw))
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create stage directories and job descriptors
    Generate {
        #[arg(value_name = "residueStart")]
        residue_start: u32,
        #[arg(value_name = "residueEnd")]
        residue_end: u32,
        #[arg(value_name = "trajectoryCount")]
        trajectory_count: u32,
    },
    /// Delete shared stages and trajectories 1..N (N defaults to the generated count)
    Cleanup {
        #[arg(value_name = "trajectoryCount")]
        trajectory_count: Option<u32>,
    },
    /// Execute preproduction (mode 0) or one trajectory's production (mode 1)
    Run {
        #[arg(value_name = "systemName")]
        system_name: String,
        #[arg(value_name = "workerCount")]
        worker_count: u32,
        #[arg(value_name = "mode", value_parser = parse_mode)]
        mode: Mode,
        #[arg(value_name = "deviceIndex")]
        device_index: Option<u32>,
        #[arg(value_name = "runStart")]
        run_start: Option<u32>,
        #[arg(value_name = "runStop")]
        run_stop: Option<u32>,
        #[arg(value_name = "trajectoryIndex")]
        trajectory_index: Option<u32>,
        #[arg(long, value_enum, default_value = "trust")]
        resume_policy: ResumePolicyArg,
    },
    /// Show the generated layout and production progress
    Status {
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Generate { .. } => "generate",
            Commands::Cleanup { .. } => "cleanup",
            Commands::Run { .. } => "run",
            Commands::Status { .. } => "status",
        }
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json_mode = matches!(cli.command, Commands::Status { json: true });
    match run_command(&cli) {
        Ok(Some(payload)) => emit_json(&payload),
        Ok(None) => {}
        Err(err) => {
            error!("{} failed: {:#}", cli.command.name(), err);
            if json_mode {
                emit_json(&json_error(&err));
            }
            if is_usage_error(&err) {
                let mut command = Cli::command();
                if let Some(sub) = command.find_subcommand_mut(cli.command.name()) {
                    eprintln!("{}", sub.render_usage());
                }
            }
            std::process::exit(exit_code(&err));
        }
    }
}

fn run_command(cli: &Cli) -> Result<Option<Value>> {
    match &cli.command {
        Commands::Generate {
            residue_start,
            residue_end,
            trajectory_count,
        } => {
            let request = LayoutRequest {
                residue_start: *residue_start,
                residue_end: *residue_end,
                trajectories: *trajectory_count,
            };
            request.validate()?;
            let config = PipelineConfig::load(&cli.root, cli.config.as_deref())?;
            let manifest = generate(&cli.root, &request, &config)?;
            println!("root: {}", cli.root.display());
            println!(
                "residues: {}-{}",
                manifest.residue_start, manifest.residue_end
            );
            println!("trajectories: {}", manifest.trajectories);
            println!("descriptors: {}", manifest.descriptors.len());
        }
        Commands::Cleanup { trajectory_count } => {
            let report = cleanup(&cli.root, *trajectory_count)?;
            for path in &report.removed {
                println!("removed: {}", path.display());
            }
            println!("trajectories: {}", report.trajectories);
        }
        Commands::Run {
            system_name,
            worker_count,
            mode,
            device_index,
            run_start,
            run_stop,
            trajectory_index,
            resume_policy,
        } => {
            let request = RunRequest {
                mode: *mode,
                system: system_name.clone(),
                workers: *worker_count,
                device: *device_index,
                run_start: *run_start,
                run_stop: *run_stop,
                trajectory: *trajectory_index,
                resume_policy: (*resume_policy).into(),
            };
            request.validate()?;
            let root = absolute_root(&cli.root)?;
            let config = PipelineConfig::load(&root, cli.config.as_deref())?;
            let engine = EngineEnv::from_env(&config.engine)?;
            let sequencer = Sequencer::new(&root, &config, engine, ProcessLauncher);
            let summary = sequencer.run(&request)?;
            for step in &summary.completed {
                println!("completed: {}", step);
            }
            if let Some(run) = summary.last_completed_run {
                println!("last_completed_run: {}", run);
            }
        }
        Commands::Status { json } => {
            let st = status(&cli.root)?;
            if *json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "status": serde_json::to_value(&st)?,
                })));
            }
            println!(
                "residues: {}-{}",
                st.manifest.residue_start, st.manifest.residue_end
            );
            println!("created_at: {}", st.manifest.created_at);
            for traj in &st.trajectories {
                let last = traj
                    .last_completed_run
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "none".to_string());
                println!(
                    "Traj{}: present={} last_completed_run={}",
                    traj.index, traj.present, last
                );
            }
            for key in &st.modified_descriptors {
                println!("modified: {}", key);
            }
            for key in &st.missing_descriptors {
                println!("missing: {}", key);
            }
        }
    }
    Ok(None)
}

// Jobs run in their own working directory; engine paths must be absolute.
fn absolute_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize()
        .map_err(|_| PipelineError::DirectoryNotFound(root.to_path_buf()).into())
}

fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.downcast_ref::<PipelineError>()
}

fn is_usage_error(err: &anyhow::Error) -> bool {
    pipeline_error(err).map(|e| e.is_usage()).unwrap_or(false)
}

fn exit_code(err: &anyhow::Error) -> i32 {
    pipeline_error(err).map(|e| e.exit_code()).unwrap_or(1)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(err: &anyhow::Error) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": "command_failed",
            "message": err.to_string(),
            "exit_code": exit_code(err),
        }
    })
}

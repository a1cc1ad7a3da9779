use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid_argument: {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("missing_argument: production mode requires {0}")]
    MissingArgument(&'static str),

    #[error("already_exists: {} (run cleanup first or choose another root)", .0.display())]
    AlreadyExists(PathBuf),

    #[error("directory_not_found: {} (was the layout generated?)", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("missing_artifact: {} required before launching {step}", path.display())]
    MissingArtifact { step: String, path: PathBuf },

    #[error("stage_failure: {step} {detail}")]
    StageFailure { step: String, detail: String },

    #[error("resume_rejected: {0}")]
    ResumeRejected(String),

    #[error("config: {0}")]
    Config(String),

    #[error("environment: {0}")]
    Environment(String),

    #[error("template: {0}")]
    Template(String),

    #[error("io: {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::InvalidArgument { .. } | PipelineError::MissingArgument(_) => 2,
            PipelineError::AlreadyExists(_) => 3,
            PipelineError::DirectoryNotFound(_) | PipelineError::MissingArtifact { .. } => 4,
            PipelineError::StageFailure { .. } => 5,
            PipelineError::ResumeRejected(_) => 6,
            PipelineError::Config(_)
            | PipelineError::Environment(_)
            | PipelineError::Template(_)
            | PipelineError::Io { .. } => 1,
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidArgument { .. } | PipelineError::MissingArgument(_)
        )
    }
}

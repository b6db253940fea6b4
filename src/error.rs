use std::path::PathBuf;

use crate::model::LaunchMethod;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure surface of the engine. Fetch, commit, and launch errors propagate
/// to the caller as-is and are safe to retry manually; teardown-phase
/// container errors are logged inside the dispatcher and never reach here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown app, method, platform, node, or analysis record.
    #[error("{0} not found")]
    NotFound(String),

    /// The selected launch method is declared but its probe fails right now.
    #[error("{method} launcher for {app} is not available on this host")]
    MethodUnavailable { app: String, method: LaunchMethod },

    #[error("download of {filename} from {container_id} failed: {reason}")]
    CacheFetch {
        container_id: String,
        filename: String,
        reason: String,
    },

    #[error("rendering {} failed: {reason}", .template.display())]
    TemplateRender { template: PathBuf, reason: String },

    /// A cached input path cannot be mapped back to a remote file reference.
    #[error("cannot resolve {} back to a remote file reference", .path.display())]
    CommitResolution { path: PathBuf },

    #[error("remote service: {0}")]
    RemoteService(String),

    #[error("container runtime: {0}")]
    ContainerRuntime(String),

    #[error("failed to start {command}: {source}")]
    LaunchExecution {
        command: String,
        source: std::io::Error,
    },

    /// Cache-root layout or configuration problems.
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

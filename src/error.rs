use std::path::PathBuf;

use thiserror::Error;

use crate::backend::LaunchStrategy;

/// Everything that can keep the backend from coming up.
/// None of these are fatal to the host; the UI shows "backend unavailable".
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend executable not found in any of {} candidate locations", .candidates.len())]
    ExecutableNotFound { candidates: Vec<PathBuf> },

    #[error("port {port} is in use but not by a responding backend")]
    PortOccupied { port: u16 },

    #[error("failed to spawn backend via {strategy}: {source}")]
    Spawn {
        strategy: LaunchStrategy,
        #[source]
        source: std::io::Error,
    },

    #[error("backend spawned via {strategy} did not report a process id")]
    NoPid { strategy: LaunchStrategy },

    #[error("backend did not become healthy after {attempts} attempts ({elapsed_ms} ms)")]
    Unhealthy { attempts: u32, elapsed_ms: u64 },

    #[error("backend exited during startup (code {code:?}, signal {signal:?})")]
    ExitedDuringStartup {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("backend startup was cancelled")]
    Cancelled,

    #[error("failed to read supervisor config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse supervisor config {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;

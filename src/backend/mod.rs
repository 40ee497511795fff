/// Backend lifecycle supervision
/// The host owns one packaged backend executable. This module finds it,
/// prepares its environment, launches it with a strategy that survives
/// GUI launches on macOS, waits for its `/health` endpoint, and tears the
/// whole process tree down again on shutdown.

pub mod controller;
pub mod environment;
pub mod health;
pub mod launch;
pub mod paths;
pub mod script;

pub use controller::{BackendStatus, BackendSupervisor, StartOutcome, SupervisorState};
pub use environment::{build_launch_environment, LaunchEnvironment};
pub use health::{HealthCheckResult, HealthMonitor, HealthPolicy, HealthReport};
pub use launch::{LaunchStrategy, Launcher, SpawnPlan};
pub use paths::{resolve_executable_path, LaunchCandidate, PackagingLayout};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::app::{APP_ID, BACKEND_EXECUTABLE_NAME, BACKEND_PORT, CONFIG_FILE_NAME};
use crate::error::{Result, SupervisorError};

/// Operating system family the supervisor makes launch decisions for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    MacOs,
    Windows,
    Linux,
    Other,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else {
            Platform::Other
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }

    /// Separator between PATH entries
    pub fn path_list_separator(&self) -> char {
        if self.is_windows() {
            ';'
        } else {
            ':'
        }
    }
}

/// How to decide whether the host was started from a terminal.
/// A GUI launch on macOS (Finder, Dock, Launchpad) has no TERM,
/// but that is a heuristic, so it can be pinned either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalDetection {
    /// `TERM` set and non-empty, and `LAUNCHED_FROM_FINDER` is not `1`
    TermVariable,
    Always,
    Never,
}

impl TerminalDetection {
    pub fn launched_from_terminal(&self, env: &HashMap<String, String>) -> bool {
        match self {
            TerminalDetection::Always => true,
            TerminalDetection::Never => false,
            TerminalDetection::TermVariable => {
                let has_term = env.get("TERM").map(|t| !t.trim().is_empty()).unwrap_or(false);
                let finder_flag = env.get("LAUNCHED_FROM_FINDER").map(|v| v == "1").unwrap_or(false);
                has_term && !finder_flag
            }
        }
    }
}

/// Supervisor configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Fixed backend port
    pub port: u16,

    /// Health probing policy
    pub health: HealthConfig,

    /// Launch strategy settings
    pub launch: LaunchConfig,

    /// Filesystem layout overrides
    pub paths: PathsConfig,

    /// Unpackaged build: the backend is run by hand and never spawned.
    /// Defaults to debug builds.
    pub development: Option<bool>,

    /// Pretend to be another platform (diagnostics and tests)
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Host part of the health URL
    pub host: String,

    /// Per-request timeout
    pub probe_timeout_ms: u64,

    /// Attempts while waiting for a freshly spawned backend
    pub startup_attempts: u32,

    /// Delay between failed attempts
    pub interval_ms: u64,

    /// Attempts when re-validating an occupant of the port
    pub conflict_attempts: u32,

    /// Attempts for a status query
    pub status_attempts: u32,

    /// Wall-clock cap on the whole startup wait
    pub startup_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Backend file name without the Windows `.exe` suffix
    pub executable_name: String,

    pub terminal_detection: TerminalDetection,

    /// How long a shell-script launch may take to answer before falling back
    pub shell_script_window_secs: u64,

    /// Grace period between the polite and the forceful kill
    pub stop_grace_ms: u64,

    /// Directories placed first on the child's PATH
    pub system_path_dirs: Vec<String>,

    /// Where the launch script looks for the speech engine
    pub speech_library_candidates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Explicit backend path, tried before every packaged location
    pub executable: Option<PathBuf>,

    /// Packaged resources root
    pub resources_dir: Option<PathBuf>,

    /// Application root directory
    pub app_root: Option<PathBuf>,

    /// Writable per-user storage handed to the backend
    pub app_data_dir: Option<PathBuf>,

    /// Where the launch script is written (OS temp dir by default)
    pub script_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port: BACKEND_PORT,
            health: HealthConfig::default(),
            launch: LaunchConfig::default(),
            paths: PathsConfig::default(),
            development: None,
            platform: None,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            probe_timeout_ms: 1_000,
            startup_attempts: 600, // ~5 minutes at 500ms
            interval_ms: 500,
            conflict_attempts: 240,
            status_attempts: 2,
            startup_timeout_secs: 300,
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let system_path_dirs = if cfg!(target_os = "windows") {
            Vec::new()
        } else {
            [
                "/opt/homebrew/bin",
                "/usr/local/bin",
                "/usr/bin",
                "/bin",
                "/usr/sbin",
                "/sbin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        };

        Self {
            executable_name: BACKEND_EXECUTABLE_NAME.to_string(),
            terminal_detection: TerminalDetection::TermVariable,
            shell_script_window_secs: 180,
            stop_grace_ms: 3_000,
            system_path_dirs,
            speech_library_candidates: vec![
                "/opt/homebrew/bin/espeak".to_string(),
                "/usr/local/bin/espeak".to_string(),
                "/usr/bin/espeak".to_string(),
            ],
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from file, then apply environment overrides.
    /// A missing or broken file falls back to defaults.
    pub fn load() -> Self {
        let mut config = match Self::get_config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => {
                    info!("Loaded supervisor config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("{}, using defaults", e);
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        let env = crate::backend::environment::inherited_environment();
        config.apply_env_overrides(&env);
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| SupervisorError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| SupervisorError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `COMPANIO_BACKEND_PORT`, `COMPANIO_BACKEND_PATH` and `COMPANIO_DEV`
    pub fn apply_env_overrides(&mut self, env: &HashMap<String, String>) {
        if let Some(port) = env.get("COMPANIO_BACKEND_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid COMPANIO_BACKEND_PORT={:?}", port),
            }
        }
        if let Some(path) = env.get("COMPANIO_BACKEND_PATH").filter(|p| !p.trim().is_empty()) {
            self.paths.executable = Some(PathBuf::from(path));
        }
        if let Some(dev) = env.get("COMPANIO_DEV") {
            self.development = Some(matches!(dev.trim(), "1" | "true" | "yes"));
        }
    }

    /// Get the configuration file path
    pub fn get_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_ID).join(CONFIG_FILE_NAME))
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_else(Platform::current)
    }

    pub fn is_development(&self) -> bool {
        self.development.unwrap_or(cfg!(debug_assertions))
    }

    /// Writable per-user storage: override, else the OS data dir
    pub fn app_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.paths.app_data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_ID)
    }

    pub fn script_dir(&self) -> PathBuf {
        self.paths.script_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

impl LaunchConfig {
    pub fn shell_script_window(&self) -> Duration {
        Duration::from_secs(self.shell_script_window_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

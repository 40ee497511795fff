/// Backend lifecycle controller
/// idle -> starting -> (healthy | failed) -> stopping -> idle
///
/// One instance owns at most one backend process. `start()` is serialized by
/// an async mutex; `stop()` never waits for it and instead cancels the
/// in-flight start through its token.
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::backend::environment::{build_launch_environment, inherited_environment};
use crate::backend::health::{HealthMonitor, HealthPolicy};
use crate::backend::launch::{clear_slot, terminate_tree, LaunchStrategy, Launcher};
use crate::backend::paths::{candidate_paths, report_missing, resolve_executable_path, PackagingLayout};
use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::logging::HostLog;
use crate::port_manager::{check_port, PortStatus};
use crate::process::{registry, Liveness, ProcessSlot, SupervisedProcess, TermSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Starting,
    Healthy,
    Failed,
    Stopping,
}

/// What the UI sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub running: bool,
    pub responding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StartOutcome {
    /// Development build; the backend is run by hand
    Skipped,
    /// A healthy backend already answers on the port
    AlreadyRunning,
    Started { pid: u32, strategy: LaunchStrategy },
}

pub struct BackendSupervisor {
    config: SupervisorConfig,
    layout: PackagingLayout,
    log: HostLog,
    health: HealthMonitor,
    process: ProcessSlot,
    state: Mutex<SupervisorState>,
    cancel: Mutex<CancellationToken>,
    start_lock: tokio::sync::Mutex<()>,
    inherited_env: HashMap<String, String>,
}

impl BackendSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let layout = PackagingLayout::detect(&config);
        let log = HostLog::in_dir(&config.app_data_dir());
        let health = HealthMonitor::from_config(&config.health);

        Self {
            config,
            layout,
            log,
            health,
            process: Arc::new(Mutex::new(None)),
            state: Mutex::new(SupervisorState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
            start_lock: tokio::sync::Mutex::new(()),
            inherited_env: inherited_environment(),
        }
    }

    /// Use the packager's resource directory instead of the detected one
    pub fn with_layout(mut self, layout: PackagingLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Replace the environment the backend inherits
    pub fn with_environment(mut self, inherited_env: HashMap<String, String>) -> Self {
        self.inherited_env = inherited_env;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn layout(&self) -> &PackagingLayout {
        &self.layout
    }

    pub fn log(&self) -> &HostLog {
        &self.log
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    pub fn process(&self) -> Option<Arc<SupervisedProcess>> {
        self.process.lock().clone()
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock() = state;
    }

    /// Bring the backend up, or confirm one is already up
    pub async fn start(&self) -> Result<StartOutcome> {
        if self.config.is_development() {
            self.log
                .info("Development mode: start the backend manually (not spawning)");
            return Ok(StartOutcome::Skipped);
        }

        let _guard = self.start_lock.lock().await;

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.set_state(SupervisorState::Starting);

        match self.run_start(&cancel).await {
            Ok(outcome) => {
                self.set_state(SupervisorState::Healthy);
                self.log.info(&format!("Backend ready: {:?}", outcome));
                Ok(outcome)
            }
            Err(SupervisorError::Cancelled) => {
                self.log.warn("Backend startup cancelled");
                self.teardown().await;
                self.set_state(SupervisorState::Idle);
                Err(SupervisorError::Cancelled)
            }
            Err(e) => {
                self.log.error(&format!("Backend startup failed: {}", e));
                self.teardown().await;
                self.set_state(SupervisorState::Failed);
                Err(e)
            }
        }
    }

    async fn run_start(&self, cancel: &CancellationToken) -> Result<StartOutcome> {
        let port = self.config.port;
        let interval = self.config.health.interval();

        // At most one process: a previous one must answer or go
        if let Some(existing) = self.process() {
            if !existing.has_exited() {
                let policy = HealthPolicy::new(self.config.health.status_attempts, interval);
                if self.health.poll(port, policy, cancel).await.healthy {
                    existing.set_liveness(Liveness::Healthy);
                    self.log.info(&format!(
                        "Backend PID {} is already running and healthy",
                        existing.pid()
                    ));
                    return Ok(StartOutcome::AlreadyRunning);
                }
                self.log.warn(&format!(
                    "Previous backend PID {} is not responding, replacing it",
                    existing.pid()
                ));
                terminate_tree(&existing, self.config.launch.stop_grace(), &self.log).await;
            }
            clear_slot(&self.process, &existing);
        }

        if check_port(port) == PortStatus::Occupied {
            self.log.warn(&format!(
                "Port {} is already in use, checking for a running backend",
                port
            ));
            let policy = HealthPolicy::new(self.config.health.conflict_attempts, interval);
            let report = self
                .health
                .poll_within(port, policy, self.config.health.startup_timeout(), cancel)
                .await;
            if report.cancelled {
                return Err(SupervisorError::Cancelled);
            }
            if report.healthy {
                self.log.info(&format!(
                    "Existing backend on port {} is responding, not spawning another",
                    port
                ));
                return Ok(StartOutcome::AlreadyRunning);
            }
            self.log.error(&format!(
                "Port {} is in use but not by a responding backend",
                port
            ));
            return Err(SupervisorError::PortOccupied { port });
        }

        let platform = self.config.platform();
        let candidates = candidate_paths(
            &self.layout,
            &self.config.launch.executable_name,
            platform,
            self.config.paths.executable.as_deref(),
        );
        let executable = match resolve_executable_path(&candidates, platform, &self.log) {
            Some(candidate) => candidate.path,
            None => {
                report_missing(&candidates, &self.layout, &self.log);
                return Err(SupervisorError::ExecutableNotFound { candidates });
            }
        };

        let env = build_launch_environment(
            &self.inherited_env,
            platform,
            &self.config.launch.system_path_dirs,
            &self.config.app_data_dir(),
        );

        let launcher = Launcher::new(
            &self.config,
            &self.inherited_env,
            &self.health,
            &self.log,
            &self.process,
            cancel,
        );
        let process = launcher.launch(&executable, &env).await?;
        let started = StartOutcome::Started {
            pid: process.pid(),
            strategy: process.strategy(),
        };

        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }
        // The shell-script strategy already waited for health
        if process.liveness() == Liveness::Healthy {
            return Ok(started);
        }

        let startup_timeout = self.config.health.startup_timeout();
        let policy = HealthPolicy::new(self.config.health.startup_attempts, interval);
        let report = tokio::select! {
            report = self.health.poll_within(port, policy, startup_timeout, cancel) => report,
            true = process.wait_for_exit(startup_timeout) => {
                if cancel.is_cancelled() {
                    return Err(SupervisorError::Cancelled);
                }
                let record = process.exit_record();
                return Err(SupervisorError::ExitedDuringStartup {
                    code: record.and_then(|r| r.code),
                    signal: record.and_then(|r| r.signal),
                });
            }
        };

        if report.cancelled {
            return Err(SupervisorError::Cancelled);
        }
        if !report.healthy {
            process.set_liveness(Liveness::Unresponsive);
            return Err(SupervisorError::Unhealthy {
                attempts: report.attempts,
                elapsed_ms: report.elapsed.as_millis() as u64,
            });
        }

        process.set_liveness(Liveness::Healthy);
        Ok(started)
    }

    /// `{running, responding, pid}` from a quick probe
    pub async fn status(&self) -> BackendStatus {
        let process = match self.process() {
            Some(process) if !process.has_exited() => process,
            _ => {
                return BackendStatus {
                    running: false,
                    responding: false,
                    pid: None,
                }
            }
        };

        let policy = HealthPolicy::new(self.config.health.status_attempts, self.config.health.interval());
        let responding = self
            .health
            .poll(self.config.port, policy, &CancellationToken::new())
            .await
            .healthy;
        process.set_liveness(if responding {
            Liveness::Healthy
        } else {
            Liveness::Unresponsive
        });

        BackendStatus {
            running: true,
            responding,
            pid: Some(process.pid()),
        }
    }

    /// Cancel any in-flight start and kill the process tree. Idempotent.
    pub async fn stop(&self) {
        if self.process().is_some() {
            self.set_state(SupervisorState::Stopping);
        }
        self.teardown().await;
        self.set_state(SupervisorState::Idle);
    }

    /// Final stop on host shutdown
    pub async fn dispose(&self) {
        self.stop().await;
        self.log.info("Backend supervisor disposed");
    }

    /// Last `max_lines` lines of the host log
    pub fn logs(&self, max_lines: usize) -> String {
        self.log.tail(max_lines)
    }

    async fn teardown(&self) {
        self.cancel.lock().cancel();

        let process = self.process.lock().take();
        if let Some(process) = process {
            terminate_tree(&process, self.config.launch.stop_grace(), &self.log).await;
        }
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        self.cancel.lock().cancel();
        if let Some(process) = self.process.lock().take() {
            if !process.has_exited() || process.leads_group() {
                let _ = process.terminate(TermSignal::Force);
            }
            registry::unregister(process.pid());
        }
    }
}

/// Launching the backend
/// A strategy is picked by a pure function, turned into a `SpawnPlan`,
/// and only then executed. The shell-script strategy gets a bounded health
/// window and falls back to the exec-string strategy.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::app::{BACKEND_LAUNCH_LOG_FILE, LAUNCH_SCRIPT_NAME};
use crate::backend::environment::LaunchEnvironment;
use crate::backend::health::{HealthMonitor, HealthPolicy};
use crate::backend::script::{backend_launch_script, shell_quote, ShellScript};
use crate::config::{Platform, SupervisorConfig};
use crate::error::{Result, SupervisorError};
use crate::logging::HostLog;
use crate::process::{registry, ExitRecord, Liveness, ProcessSlot, SupervisedProcess, TermSignal};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchStrategy {
    /// Run the executable directly
    DirectSpawn,
    /// Run a generated script in its own process group (GUI launch on macOS)
    ShellScriptSpawn,
    /// `cd <dir> && <exe>` through the command interpreter
    ExecStringSpawn,
}

impl LaunchStrategy {
    /// First strategy for a platform. Only a GUI launch on macOS needs the script:
    /// such processes start with a bare environment and the wrong working directory.
    pub fn select(platform: Platform, launched_from_terminal: bool) -> Self {
        match platform {
            Platform::MacOs if !launched_from_terminal => LaunchStrategy::ShellScriptSpawn,
            _ => LaunchStrategy::DirectSpawn,
        }
    }

    pub fn fallback(&self) -> Option<Self> {
        match self {
            LaunchStrategy::ShellScriptSpawn => Some(LaunchStrategy::ExecStringSpawn),
            LaunchStrategy::DirectSpawn | LaunchStrategy::ExecStringSpawn => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchStrategy::DirectSpawn => "direct spawn",
            LaunchStrategy::ShellScriptSpawn => "shell-script spawn",
            LaunchStrategy::ExecStringSpawn => "exec-string spawn",
        }
    }
}

impl fmt::Display for LaunchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A script that must be on disk before the plan runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    pub path: PathBuf,
    pub script: ShellScript,
}

/// Everything needed to start one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlan {
    pub strategy: LaunchStrategy,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: LaunchEnvironment,
    /// Own process group, so the whole tree can be signalled at once
    pub detached: bool,
    pub script: Option<ScriptFile>,
}

fn executable_dir(executable: &Path) -> PathBuf {
    executable
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn direct_spawn_plan(executable: &Path, env: &LaunchEnvironment) -> SpawnPlan {
    let dir = executable_dir(executable);
    SpawnPlan {
        strategy: LaunchStrategy::DirectSpawn,
        program: executable.to_path_buf(),
        args: Vec::new(),
        env: env.with("PWD", dir.to_string_lossy()),
        working_dir: Some(dir),
        detached: false,
        script: None,
    }
}

pub fn shell_script_plan(
    executable: &Path,
    env: &LaunchEnvironment,
    config: &SupervisorConfig,
) -> SpawnPlan {
    // A GUI launch has a minimal PATH; look for bash on the repaired one
    let interpreter = which::which_in("bash", env.path(), executable_dir(executable))
        .unwrap_or_else(|_| PathBuf::from("/bin/sh"));
    let script_path = config.script_dir().join(LAUNCH_SCRIPT_NAME);
    let log_file = config.app_data_dir().join(BACKEND_LAUNCH_LOG_FILE);

    let script = backend_launch_script(
        &interpreter,
        executable,
        env,
        &config.launch.speech_library_candidates,
        &log_file,
    );

    SpawnPlan {
        strategy: LaunchStrategy::ShellScriptSpawn,
        program: interpreter,
        args: vec![script_path.to_string_lossy().to_string()],
        working_dir: None,
        env: env.clone(),
        detached: true,
        script: Some(ScriptFile {
            path: script_path,
            script,
        }),
    }
}

pub fn exec_string_plan(executable: &Path, env: &LaunchEnvironment, platform: Platform) -> SpawnPlan {
    let dir = executable_dir(executable);
    let (program, args) = if platform.is_windows() {
        (
            PathBuf::from("cmd"),
            vec![
                "/C".to_string(),
                format!("cd /d \"{}\" && \"{}\"", dir.display(), executable.display()),
            ],
        )
    } else {
        (
            PathBuf::from("/bin/sh"),
            vec![
                "-c".to_string(),
                format!(
                    "cd {} && {}",
                    shell_quote(&dir.to_string_lossy()),
                    shell_quote(&executable.to_string_lossy())
                ),
            ],
        )
    };

    SpawnPlan {
        strategy: LaunchStrategy::ExecStringSpawn,
        program,
        args,
        working_dir: None,
        env: env.clone(),
        detached: false,
        script: None,
    }
}

/// Clears the slot only if it still points at `process`
pub(crate) fn clear_slot(slot: &ProcessSlot, process: &Arc<SupervisedProcess>) {
    let mut guard = slot.lock();
    if guard.as_ref().map(|p| Arc::ptr_eq(p, process)).unwrap_or(false) {
        *guard = None;
    }
}

/// Graceful signal to the whole tree, then force after `grace`.
/// Errors are logged, never returned.
pub async fn terminate_tree(process: &SupervisedProcess, grace: Duration, log: &HostLog) {
    let pid = process.pid();

    if process.has_exited() {
        // Root is gone but a detached group may have survivors
        if process.leads_group() {
            let _ = process.terminate(TermSignal::Force);
        }
        return;
    }

    log.info(&format!("Stopping backend process tree rooted at PID {}", pid));
    if let Err(e) = process.terminate(TermSignal::Graceful) {
        log.warn(&format!("Graceful termination of PID {} failed: {}", pid, e));
    }
    if process.wait_for_exit(grace).await {
        log.info(&format!("Backend PID {} exited", pid));
        return;
    }

    log.warn(&format!(
        "Backend PID {} still running after {:?}, forcing",
        pid, grace
    ));
    if let Err(e) = process.terminate(TermSignal::Force) {
        log.error(&format!("Forced termination of PID {} failed: {}", pid, e));
    }
    if !process.wait_for_exit(grace).await {
        log.error(&format!("Backend PID {} did not exit after SIGKILL", pid));
    }
}

/// Runs the strategy chain for one `start()`
pub struct Launcher<'a> {
    config: &'a SupervisorConfig,
    platform: Platform,
    launched_from_terminal: bool,
    health: &'a HealthMonitor,
    log: &'a HostLog,
    slot: &'a ProcessSlot,
    cancel: &'a CancellationToken,
}

impl<'a> Launcher<'a> {
    pub fn new(
        config: &'a SupervisorConfig,
        inherited_env: &HashMap<String, String>,
        health: &'a HealthMonitor,
        log: &'a HostLog,
        slot: &'a ProcessSlot,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            platform: config.platform(),
            launched_from_terminal: config
                .launch
                .terminal_detection
                .launched_from_terminal(inherited_env),
            health,
            log,
            slot,
            cancel,
        }
    }

    pub fn first_strategy(&self) -> LaunchStrategy {
        LaunchStrategy::select(self.platform, self.launched_from_terminal)
    }

    pub fn plan(&self, strategy: LaunchStrategy, executable: &Path, env: &LaunchEnvironment) -> SpawnPlan {
        match strategy {
            LaunchStrategy::DirectSpawn => direct_spawn_plan(executable, env),
            LaunchStrategy::ShellScriptSpawn => shell_script_plan(executable, env, self.config),
            LaunchStrategy::ExecStringSpawn => exec_string_plan(executable, env, self.platform),
        }
    }

    /// `launch(execPath, env)`: try strategies until one produces a process
    pub async fn launch(&self, executable: &Path, env: &LaunchEnvironment) -> Result<Arc<SupervisedProcess>> {
        let mut strategy = self.first_strategy();
        self.log.info(&format!(
            "Launching backend via {} (platform: {:?}, from terminal: {})",
            strategy, self.platform, self.launched_from_terminal
        ));

        loop {
            if self.cancel.is_cancelled() {
                return Err(SupervisorError::Cancelled);
            }

            let plan = self.plan(strategy, executable, env);
            let error = match self.attempt(&plan).await {
                Ok(process) => return Ok(process),
                Err(SupervisorError::Cancelled) => return Err(SupervisorError::Cancelled),
                Err(e) => e,
            };

            match strategy.fallback() {
                Some(next) => {
                    self.log.warn(&format!("{} failed ({}), falling back to {}", strategy, error, next));
                    strategy = next;
                }
                None => {
                    self.log.error(&format!("{} failed: {}", strategy, error));
                    return Err(error);
                }
            }
        }
    }

    async fn attempt(&self, plan: &SpawnPlan) -> Result<Arc<SupervisedProcess>> {
        let process = self.spawn(plan).await?;
        if plan.strategy != LaunchStrategy::ShellScriptSpawn {
            return Ok(process);
        }

        let window = self.config.launch.shell_script_window();
        self.log.info(&format!(
            "Waiting up to {:?} for the script-launched backend on port {}",
            window, self.config.port
        ));
        let policy = HealthPolicy::new(self.config.health.startup_attempts, self.config.health.interval());
        let report = tokio::select! {
            report = self.health.poll_within(self.config.port, policy, window, self.cancel) => report,
            true = process.wait_for_exit(window) => {
                // The group may still hold children the script started
                clear_slot(self.slot, &process);
                terminate_tree(&process, self.config.launch.stop_grace(), self.log).await;
                if self.cancel.is_cancelled() {
                    return Err(SupervisorError::Cancelled);
                }
                let record = process.exit_record().unwrap_or(ExitRecord {
                    code: None,
                    signal: None,
                });
                self.log.warn(&format!(
                    "Launch script exited with code {:?} and signal {:?} before the backend became healthy",
                    record.code, record.signal
                ));
                return Err(SupervisorError::ExitedDuringStartup {
                    code: record.code,
                    signal: record.signal,
                });
            }
        };

        if report.healthy {
            process.set_liveness(Liveness::Healthy);
            return Ok(process);
        }

        process.set_liveness(Liveness::Unresponsive);
        terminate_tree(&process, self.config.launch.stop_grace(), self.log).await;
        clear_slot(self.slot, &process);

        if report.cancelled {
            return Err(SupervisorError::Cancelled);
        }
        Err(SupervisorError::Unhealthy {
            attempts: report.attempts,
            elapsed_ms: report.elapsed.as_millis() as u64,
        })
    }

    /// Start the plan's process, publish it in the slot and attach the
    /// output forwarders and the exit observer
    pub async fn spawn(&self, plan: &SpawnPlan) -> Result<Arc<SupervisedProcess>> {
        let strategy = plan.strategy;
        let spawn_error = |source: std::io::Error| SupervisorError::Spawn { strategy, source };

        if let Some(file) = &plan.script {
            for dir in [file.path.parent(), file.script.log_file().parent()].into_iter().flatten() {
                std::fs::create_dir_all(dir).map_err(spawn_error)?;
            }
            file.script.write_to(&file.path).map_err(spawn_error)?;
            self.log.info(&format!("Wrote launch script to {}", file.path.display()));
        }

        let mut cmd = Command::new(&plan.program);
        #[cfg(windows)]
        {
            for arg in &plan.args {
                cmd.raw_arg(arg);
            }
        }
        #[cfg(not(windows))]
        cmd.args(&plan.args);

        cmd.env_clear()
            .envs(plan.env.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &plan.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            if plan.detached {
                // New session: the backend outlives the terminal and leads its own group
                unsafe {
                    cmd.pre_exec(|| {
                        if libc::setsid() == -1 {
                            return Err(std::io::Error::last_os_error());
                        }
                        Ok(())
                    });
                }
            }
        }

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn().map_err(spawn_error)?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let _ = child.start_kill();
                return Err(SupervisorError::NoPid { strategy });
            }
        };

        // CRITICAL: register before anything else can fail
        registry::register(pid, plan.detached);
        let process = Arc::new(SupervisedProcess::new(pid, strategy, plan.detached));
        *self.slot.lock() = Some(process.clone());
        self.log.info(&format!("Backend spawned via {} with PID {}", strategy, pid));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, self.log.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, self.log.clone(), true));
        }

        let log = self.log.clone();
        let slot = self.slot.clone();
        let observed = process.clone();
        tokio::spawn(async move {
            let record = match child.wait().await {
                Ok(status) => ExitRecord::from_status(&status),
                Err(e) => {
                    log.error(&format!("Failed to wait for backend PID {}: {}", pid, e));
                    ExitRecord {
                        code: None,
                        signal: None,
                    }
                }
            };
            log.info(&format!(
                "Backend process {} exited with code {:?} and signal {:?}",
                pid, record.code, record.signal
            ));
            registry::unregister(pid);
            clear_slot(&slot, &observed);
            observed.mark_exited(record);
        });

        Ok(process)
    }
}

/// Mirror one backend pipe into the host log until EOF. Bytes that are not
/// UTF-8 are replaced, never fatal: closing the pipe early would hand the
/// backend a SIGPIPE on its next write.
async fn forward_output<R: AsyncRead + Unpin>(reader: R, log: HostLog, is_stderr: bool) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if is_stderr {
                    log.error(&format!("Backend ERROR: {}", line));
                } else {
                    log.info(&format!("Backend: {}", line));
                }
            }
            Err(e) => {
                log.warn(&format!("Stopped reading backend output: {}", e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::environment::build_launch_environment;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    fn env() -> LaunchEnvironment {
        let known = vec!["/usr/bin".to_string(), "/bin".to_string()];
        build_launch_environment(&HashMap::new(), Platform::Linux, &known, Path::new("/data"))
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn test_config(root: &TempDir, platform: Platform) -> SupervisorConfig {
        let mut config = SupervisorConfig::default();
        config.port = free_port();
        config.platform = Some(platform);
        config.health.host = "127.0.0.1".to_string();
        config.health.interval_ms = 50;
        config.launch.shell_script_window_secs = 1;
        config.launch.stop_grace_ms = 1_000;
        config.launch.terminal_detection = crate::config::TerminalDetection::Never;
        config.launch.system_path_dirs = vec!["/usr/bin".to_string(), "/bin".to_string()];
        config.paths.app_data_dir = Some(root.path().join("data"));
        config.paths.script_dir = Some(root.path().to_path_buf());
        config
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(LaunchStrategy::select(Platform::MacOs, false), LaunchStrategy::ShellScriptSpawn);
        assert_eq!(LaunchStrategy::select(Platform::MacOs, true), LaunchStrategy::DirectSpawn);
        assert_eq!(LaunchStrategy::select(Platform::Linux, false), LaunchStrategy::DirectSpawn);
        assert_eq!(LaunchStrategy::select(Platform::Windows, false), LaunchStrategy::DirectSpawn);

        assert_eq!(
            LaunchStrategy::ShellScriptSpawn.fallback(),
            Some(LaunchStrategy::ExecStringSpawn)
        );
        assert_eq!(LaunchStrategy::ExecStringSpawn.fallback(), None);
        assert_eq!(LaunchStrategy::DirectSpawn.fallback(), None);
    }

    #[test]
    fn test_direct_plan_runs_from_executable_dir() {
        let plan = direct_spawn_plan(Path::new("/app/app/backend/Companio-Backend"), &env());
        assert_eq!(plan.strategy, LaunchStrategy::DirectSpawn);
        assert_eq!(plan.working_dir, Some(PathBuf::from("/app/app/backend")));
        assert_eq!(plan.env.get("PWD"), Some("/app/app/backend"));
        assert_eq!(plan.env.get("PYTHONUNBUFFERED"), Some("1"));
        assert!(!plan.detached);
        assert!(plan.args.is_empty());
    }

    #[test]
    fn test_exec_string_plan_quotes_paths() {
        let plan = exec_string_plan(Path::new("/Apps/My App/backend/Companio-Backend"), &env(), Platform::MacOs);
        assert_eq!(plan.program, PathBuf::from("/bin/sh"));
        assert_eq!(plan.args[0], "-c");
        assert_eq!(
            plan.args[1],
            "cd '/Apps/My App/backend' && '/Apps/My App/backend/Companio-Backend'"
        );

        let windows = exec_string_plan(Path::new(r"C:\Companio\backend\Companio-Backend.exe"), &env(), Platform::Windows);
        assert_eq!(windows.program, PathBuf::from("cmd"));
        assert_eq!(windows.args[0], "/C");
        assert!(windows.args[1].ends_with(r#"&& "C:\Companio\backend\Companio-Backend.exe""#));
    }

    #[test]
    fn test_shell_script_plan_is_detached() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(&root, Platform::MacOs);
        let plan = shell_script_plan(Path::new("/Apps/backend/Companio-Backend"), &env(), &config);

        assert!(plan.detached);
        let file = plan.script.as_ref().unwrap();
        assert_eq!(file.path, root.path().join(LAUNCH_SCRIPT_NAME));
        assert_eq!(plan.args, vec![file.path.to_string_lossy().to_string()]);
        assert!(file.script.render().contains("backend-launch.log"));
    }

    #[cfg(unix)]
    fn fake_backend(root: &TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let dir = root.path().join("backend");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("Companio-Backend");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_direct_spawn_and_terminate() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(&root, Platform::Linux);
        let executable = fake_backend(&root, "echo started\nsleep 30");
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        let process = launcher.launch(&executable, &env()).await.unwrap();

        assert_eq!(process.strategy(), LaunchStrategy::DirectSpawn);
        assert!(registry::is_registered(process.pid()));
        assert!(slot.lock().is_some());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !log.tail(100).contains("Backend: started") && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(log.tail(100).contains("Backend: started"));

        terminate_tree(&process, Duration::from_secs(2), &log).await;
        assert!(process.has_exited());
        assert!(slot.lock().is_none());
        assert!(!registry::is_registered(process.pid()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unhealthy_script_falls_back_to_exec_string() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(&root, Platform::MacOs);
        let executable = fake_backend(&root, "sleep 30");
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        assert_eq!(launcher.first_strategy(), LaunchStrategy::ShellScriptSpawn);

        let process = launcher.launch(&executable, &env()).await.unwrap();
        assert_eq!(process.strategy(), LaunchStrategy::ExecStringSpawn);
        assert!(root.path().join(LAUNCH_SCRIPT_NAME).exists());
        assert!(root.path().join("data").join(BACKEND_LAUNCH_LOG_FILE).exists());
        assert!(log.tail(200).contains("falling back to exec-string spawn"));

        terminate_tree(&process, Duration::from_secs(2), &log).await;
        assert!(process.has_exited());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_healthy_script_keeps_shell_script_strategy() {
        use axum::{http::StatusCode, routing::get, Router};

        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(&root, Platform::MacOs);
        config.launch.shell_script_window_secs = 10;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await.unwrap();
        let server = tokio::spawn(async move {
            let app = Router::new().route("/health", get(|| async { StatusCode::OK }));
            axum::serve(listener, app).await.unwrap();
        });

        let executable = fake_backend(&root, "sleep 30");
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        let process = launcher.launch(&executable, &env()).await.unwrap();

        assert_eq!(process.strategy(), LaunchStrategy::ShellScriptSpawn);
        assert_eq!(process.liveness(), Liveness::Healthy);
        assert!(process.leads_group());
        // Detached launches start a new session
        let pid = process.pid() as libc::pid_t;
        assert_eq!(unsafe { libc::getsid(pid) }, pid);
        assert!(!log.tail(200).contains("falling back"));

        terminate_tree(&process, Duration::from_secs(2), &log).await;
        assert!(process.has_exited());
        server.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_exit_falls_back_without_waiting_out_the_window() {
        let root = tempfile::tempdir().unwrap();
        let mut config = test_config(&root, Platform::MacOs);
        config.launch.shell_script_window_secs = 30;
        // Exits under the script, survives as the exec-string root
        let marker = root.path().join("ran-once");
        let executable = fake_backend(
            &root,
            &format!("[ -f '{0}' ] || {{ touch '{0}'; exit 3; }}\nsleep 30", marker.display()),
        );
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        let started = std::time::Instant::now();
        let process = launcher.launch(&executable, &env()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(process.strategy(), LaunchStrategy::ExecStringSpawn);
        assert!(log.tail(200).contains("before the backend became healthy"));
        assert!(log.tail(200).contains("falling back to exec-string spawn"));

        terminate_tree(&process, Duration::from_secs(2), &log).await;
        assert!(process.has_exited());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_output_keeps_pipes_open() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(&root, Platform::Linux);
        let executable = fake_backend(
            &root,
            "echo before\nprintf 'bad \\377 byte\\n'\necho after-out\nprintf 'err \\377\\n' >&2\necho after-err >&2\nsleep 30",
        );
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        let process = launcher.launch(&executable, &env()).await.unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let tail = log.tail(100);
            if (tail.contains("Backend: after-out") && tail.contains("Backend ERROR: after-err"))
                || std::time::Instant::now() > deadline
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let tail = log.tail(100);
        assert!(tail.contains("Backend: bad \u{FFFD} byte"));
        assert!(tail.contains("Backend: after-out"));
        assert!(tail.contains("Backend ERROR: after-err"));
        assert!(!process.has_exited());

        terminate_tree(&process, Duration::from_secs(2), &log).await;
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_missing_executable_is_a_spawn_error() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(&root, Platform::Linux);
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        let err = launcher
            .launch(&root.path().join("nope"), &env())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Spawn {
                strategy: LaunchStrategy::DirectSpawn,
                ..
            }
        ));
        assert!(slot.lock().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_launch() {
        let root = tempfile::tempdir().unwrap();
        let config = test_config(&root, Platform::Linux);
        let log = HostLog::in_dir(&root.path().join("logs"));
        let health = HealthMonitor::from_config(&config.health);
        let slot: ProcessSlot = Arc::new(Mutex::new(None));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let launcher = Launcher::new(&config, &HashMap::new(), &health, &log, &slot, &cancel);
        let err = launcher.launch(Path::new("/bin/true"), &env()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Cancelled));
    }
}

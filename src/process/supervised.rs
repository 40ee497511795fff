use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::tree::{signal_tree, TermSignal};
use crate::backend::LaunchStrategy;

/// Last known state of the backend process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Unknown,
    Starting,
    Healthy,
    Unresponsive,
    Exited,
}

/// How the backend ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitRecord {
    pub fn from_status(status: &ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Where a controller keeps its (at most one) backend handle.
/// The on-exit observer clears it when the process it points at dies.
pub type ProcessSlot = Arc<Mutex<Option<Arc<SupervisedProcess>>>>;

/// The spawned backend
#[derive(Debug)]
pub struct SupervisedProcess {
    pid: u32,
    strategy: LaunchStrategy,
    started_at: DateTime<Utc>,
    leads_group: bool,
    liveness: Mutex<Liveness>,
    exit: Mutex<Option<ExitRecord>>,
    exited: watch::Sender<bool>,
}

impl SupervisedProcess {
    pub fn new(pid: u32, strategy: LaunchStrategy, leads_group: bool) -> Self {
        let (exited, _) = watch::channel(false);
        Self {
            pid,
            strategy,
            started_at: Utc::now(),
            leads_group,
            liveness: Mutex::new(Liveness::Starting),
            exit: Mutex::new(None),
            exited,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn strategy(&self) -> LaunchStrategy {
        self.strategy
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the backend runs in its own process group (detached launch)
    pub fn leads_group(&self) -> bool {
        self.leads_group
    }

    pub fn liveness(&self) -> Liveness {
        *self.liveness.lock()
    }

    /// Exited is terminal and never overwritten
    pub fn set_liveness(&self, liveness: Liveness) {
        let mut current = self.liveness.lock();
        if *current != Liveness::Exited {
            *current = liveness;
        }
    }

    pub fn exit_record(&self) -> Option<ExitRecord> {
        *self.exit.lock()
    }

    pub fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }

    pub(crate) fn mark_exited(&self, record: ExitRecord) {
        *self.exit.lock() = Some(record);
        *self.liveness.lock() = Liveness::Exited;
        self.exited.send_replace(true);
    }

    /// True if the process exits within `timeout`
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let mut rx = self.exited.subscribe();
        let exited = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|exited| *exited)).await,
            Ok(Ok(_))
        );
        exited
    }

    /// Signal the whole tree rooted at this process
    pub fn terminate(&self, signal: TermSignal) -> io::Result<()> {
        signal_tree(self.pid, self.leads_group, signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_is_terminal() {
        let process = SupervisedProcess::new(42, LaunchStrategy::DirectSpawn, false);
        assert_eq!(process.liveness(), Liveness::Starting);
        process.set_liveness(Liveness::Healthy);
        assert_eq!(process.liveness(), Liveness::Healthy);

        process.mark_exited(ExitRecord { code: Some(0), signal: None });
        process.set_liveness(Liveness::Healthy);
        assert_eq!(process.liveness(), Liveness::Exited);
        assert!(process.has_exited());
        assert_eq!(process.exit_record().unwrap().code, Some(0));
    }

    #[tokio::test]
    async fn test_wait_for_exit() {
        let process = Arc::new(SupervisedProcess::new(42, LaunchStrategy::ExecStringSpawn, true));
        assert!(!process.wait_for_exit(Duration::from_millis(20)).await);

        let observer = process.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            observer.mark_exited(ExitRecord { code: None, signal: Some(15) });
        });
        assert!(process.wait_for_exit(Duration::from_secs(2)).await);
        // Already exited: resolves immediately
        assert!(process.wait_for_exit(Duration::from_millis(1)).await);
    }
}

/// Process tree termination
/// The shell-script launch leaves an intermediary between the host and the
/// backend, so signalling only the direct child is not enough.
use std::io;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// SIGTERM / `taskkill /T`
    Graceful,
    /// SIGKILL / `taskkill /T /F`
    Force,
}

/// Signal `pid`, its process group when it leads one, and all its descendants.
/// A root that is already gone is not an error.
#[cfg(unix)]
pub fn signal_tree(pid: u32, leads_group: bool, signal: TermSignal) -> io::Result<()> {
    let sig = match signal {
        TermSignal::Graceful => libc::SIGTERM,
        TermSignal::Force => libc::SIGKILL,
    };

    // Snapshot descendants before the root dies and they get reparented
    let descendants = match list_process_table() {
        Ok(rows) => collect_descendants(&rows, pid),
        Err(e) => {
            warn!("Could not list processes for PID {}: {}", pid, e);
            Vec::new()
        }
    };

    if leads_group {
        let _ = send_signal(-(pid as i32), sig);
    }
    let root_result = send_signal(pid as i32, sig);
    for child in &descendants {
        let _ = send_signal(*child as i32, sig);
    }

    info!(
        "Sent {:?} to PID {} ({} descendants, group: {})",
        signal,
        pid,
        descendants.len(),
        leads_group
    );

    match root_result {
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(()),
        other => other,
    }
}

#[cfg(windows)]
pub fn signal_tree(pid: u32, _leads_group: bool, signal: TermSignal) -> io::Result<()> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;

    let pid_arg = pid.to_string();
    let mut args = vec!["/PID", pid_arg.as_str(), "/T"];
    if signal == TermSignal::Force {
        args.push("/F");
    }

    let output = std::process::Command::new("taskkill")
        .args(&args)
        .creation_flags(CREATE_NO_WINDOW)
        .output()?;

    if output.status.success() {
        info!("taskkill {:?} succeeded for PID {}", signal, pid);
        Ok(())
    } else {
        Err(io::Error::other(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

#[cfg(unix)]
fn send_signal(target: i32, sig: libc::c_int) -> io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(target, sig) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `(pid, ppid)` rows for every process on the system
#[cfg(unix)]
fn list_process_table() -> io::Result<Vec<(u32, u32)>> {
    let output = std::process::Command::new("ps")
        .args(["-A", "-o", "pid=,ppid="])
        .output()?;
    if !output.status.success() {
        return Err(io::Error::other("ps exited unsuccessfully"));
    }
    Ok(parse_process_table(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses `ps -o pid=,ppid=` output, skipping malformed lines
pub fn parse_process_table(text: &str) -> Vec<(u32, u32)> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

/// All transitive children of `root`, parents before children
pub fn collect_descendants(rows: &[(u32, u32)], root: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![root];

    while let Some(parent) = frontier.pop() {
        for &(pid, ppid) in rows {
            if ppid == parent && pid != root && !found.contains(&pid) {
                found.push(pid);
                frontier.push(pid);
            }
        }
    }
    found
}

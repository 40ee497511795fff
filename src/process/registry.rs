use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{info, warn};

use super::tree::{signal_tree, TermSignal};

/// Every backend tree spawned by any supervisor in this process.
/// pid -> whether the pid leads its own process group.
/// Only used by the panic hook, which cannot reach supervisor instances.
static LIVE_TREES: Lazy<Mutex<HashMap<u32, bool>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// CRITICAL: call IMMEDIATELY after spawning
pub fn register(pid: u32, leads_group: bool) {
    LIVE_TREES.lock().insert(pid, leads_group);
}

pub fn unregister(pid: u32) {
    LIVE_TREES.lock().remove(&pid);
}

pub fn is_registered(pid: u32) -> bool {
    LIVE_TREES.lock().contains_key(&pid)
}

/// Force-kill every registered tree (used on panic). Returns how many were signalled.
pub fn kill_all() -> usize {
    let trees: Vec<(u32, bool)> = LIVE_TREES.lock().drain().collect();
    info!("Killing {} backend process trees", trees.len());

    for (pid, leads_group) in &trees {
        if let Err(e) = signal_tree(*pid, *leads_group, TermSignal::Force) {
            warn!("Failed to kill backend tree rooted at PID {}: {}", pid, e);
        }
    }
    trees.len()
}

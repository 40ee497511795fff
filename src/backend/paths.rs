use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::app::BACKEND_DIR_NAME;
use crate::config::{Platform, SupervisorConfig};
use crate::logging::HostLog;

/// Resource directories that archive-based packagers unpack next to the bundle
pub const UNPACKED_RESOURCE_DIRS: &[&str] = &["app.asar.unpacked", "_up_"];

/// Where the installed application keeps its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagingLayout {
    pub resources_dir: PathBuf,
    pub app_root: PathBuf,
}

impl PackagingLayout {
    /// Derive the layout from the host executable, unless configured.
    /// macOS bundles keep resources in `Contents/Resources`, next to `Contents/MacOS/<exe>`.
    pub fn detect(config: &SupervisorConfig) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));

        let default_resources = match config.platform() {
            Platform::MacOs => exe_dir
                .parent()
                .map(|contents| contents.join("Resources"))
                .unwrap_or_else(|| exe_dir.clone()),
            _ => exe_dir.clone(),
        };

        Self {
            resources_dir: config.paths.resources_dir.clone().unwrap_or(default_resources),
            app_root: config.paths.app_root.clone().unwrap_or(exe_dir),
        }
    }

    pub fn backend_dir(&self) -> PathBuf {
        self.resources_dir.join(BACKEND_DIR_NAME)
    }
}

/// Ordered list of places the backend may live.
/// An explicit path goes first; each directory yields the bare name and,
/// on Windows, the `.exe` variant.
pub fn candidate_paths(
    layout: &PackagingLayout,
    executable_name: &str,
    platform: Platform,
    explicit: Option<&Path>,
) -> Vec<PathBuf> {
    let mut dirs = vec![layout.backend_dir(), layout.app_root.join(BACKEND_DIR_NAME)];
    for unpacked in UNPACKED_RESOURCE_DIRS {
        dirs.push(layout.resources_dir.join(unpacked).join(BACKEND_DIR_NAME));
    }

    let mut candidates: Vec<PathBuf> = explicit.map(Path::to_path_buf).into_iter().collect();
    for dir in dirs {
        candidates.push(dir.join(executable_name));
        if platform.is_windows() {
            candidates.push(dir.join(format!("{}.exe", executable_name)));
        }
    }
    candidates.dedup();
    candidates
}

/// One inspected candidate path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchCandidate {
    pub path: PathBuf,
    pub exists: bool,
    pub is_file: bool,
    pub executable: bool,
    pub size: u64,
}

impl LaunchCandidate {
    pub fn inspect(path: &Path) -> Self {
        match fs::metadata(path) {
            Ok(meta) => Self {
                path: path.to_path_buf(),
                exists: true,
                is_file: meta.is_file(),
                executable: has_execute_bit(&meta),
                size: meta.len(),
            },
            Err(_) => Self {
                path: path.to_path_buf(),
                exists: false,
                is_file: false,
                executable: false,
                size: 0,
            },
        }
    }
}

#[cfg(unix)]
fn has_execute_bit(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_execute_bit(_meta: &fs::Metadata) -> bool {
    true
}

/// First candidate that exists and is a regular file.
/// Repairs a missing execute bit on the way (archive extraction often drops it);
/// a failed repair is logged and the path is still returned.
pub fn resolve_executable_path(
    candidates: &[PathBuf],
    platform: Platform,
    log: &HostLog,
) -> Option<LaunchCandidate> {
    for path in candidates {
        let candidate = LaunchCandidate::inspect(path);
        log.info(&format!("Checking for backend at: {}", path.display()));

        if !candidate.exists {
            continue;
        }
        if !candidate.is_file {
            log.warn(&format!("Skipping {}: not a regular file", path.display()));
            continue;
        }

        log.info(&format!(
            "FOUND: {} ({} bytes, executable: {})",
            path.display(),
            candidate.size,
            if candidate.executable { "yes" } else { "no" }
        ));

        if platform.is_windows() {
            return Some(candidate);
        }

        // Owner-execute is what matters; group/other bits alone are not enough
        match ensure_executable(path) {
            Ok(false) => return Some(candidate),
            Ok(true) => {
                log.info(&format!("Made backend executable: {}", path.display()));
                return Some(LaunchCandidate::inspect(path));
            }
            Err(e) => {
                log.error(&format!(
                    "Failed to set executable permissions on {}: {}",
                    path.display(),
                    e
                ));
                return Some(candidate);
            }
        }
    }
    None
}

/// Adds rwxr-xr-x bits when the owner-execute bit is missing.
/// Returns whether the mode was changed.
#[cfg(unix)]
pub fn ensure_executable(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    if perms.mode() & 0o100 != 0 {
        return Ok(false);
    }
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)?;
    Ok(true)
}

#[cfg(not(unix))]
pub fn ensure_executable(_path: &Path) -> io::Result<bool> {
    Ok(false)
}

/// Log everything a field report needs when the backend is missing
pub fn report_missing(candidates: &[PathBuf], layout: &PackagingLayout, log: &HostLog) {
    log.error("BACKEND NOT FOUND: Executable not found in any of these locations:");
    for path in candidates {
        log.error(&format!(" - {}", path.display()));
    }

    for dir in [layout.resources_dir.clone(), layout.backend_dir()] {
        match fs::read_dir(&dir) {
            Ok(entries) => {
                log.error(&format!("Contents of {}:", dir.display()));
                for entry in entries.flatten() {
                    log.error(&format!(" - {}", entry.file_name().to_string_lossy()));
                }
            }
            Err(e) => log.error(&format!("Cannot list {}: {}", dir.display(), e)),
        }
    }
}

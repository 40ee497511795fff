use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::warn;

use crate::app::{APP_DATA_ENV, UNBUFFERED_ENV};
use crate::config::Platform;

/// Environment handed to one spawn. Built fresh per attempt and never
/// changed afterwards; `with` returns a copy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchEnvironment {
    vars: BTreeMap<String, String>,
}

impl LaunchEnvironment {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn path(&self) -> Option<&str> {
        self.get("PATH")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Copy with one more variable set
    pub fn with(&self, name: &str, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(name.to_string(), value.into());
        Self { vars }
    }
}

/// The host's environment. Pairs that are not valid UTF-8 are skipped
/// instead of panicking like `std::env::vars` would.
pub fn inherited_environment() -> HashMap<String, String> {
    let mut skipped = 0usize;
    let vars: HashMap<String, String> = std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            _ => {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        warn!("Skipped {} non UTF-8 environment variable(s)", skipped);
    }
    vars
}

/// Known directories first (in order), then whatever the inherited PATH adds.
/// Empty segments and duplicates are dropped.
pub fn normalize_path(inherited: Option<&str>, known_dirs: &[String], separator: char) -> String {
    let mut merged: Vec<&str> = Vec::new();
    let inherited_segments = inherited.unwrap_or("").split(separator);

    for segment in known_dirs.iter().map(String::as_str).chain(inherited_segments) {
        let segment = segment.trim();
        if !segment.is_empty() && !merged.contains(&segment) {
            merged.push(segment);
        }
    }

    merged.join(&separator.to_string())
}

/// Inherited environment plus the overrides the backend depends on:
/// a repaired PATH, a guaranteed HOME, the app data directory and unbuffered output.
pub fn build_launch_environment(
    inherited: &HashMap<String, String>,
    platform: Platform,
    known_dirs: &[String],
    app_data_dir: &Path,
) -> LaunchEnvironment {
    let mut vars: BTreeMap<String, String> = inherited
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    // Windows spells it `Path`; fold every casing into one PATH entry
    let path_keys: Vec<String> = vars
        .keys()
        .filter(|k| k.eq_ignore_ascii_case("PATH"))
        .cloned()
        .collect();
    let inherited_path = path_keys
        .iter()
        .find(|k| k.as_str() == "PATH")
        .or_else(|| path_keys.first())
        .and_then(|k| vars.get(k).cloned());
    if platform.is_windows() {
        for key in &path_keys {
            vars.remove(key);
        }
    }

    vars.insert(
        "PATH".to_string(),
        normalize_path(inherited_path.as_deref(), known_dirs, platform.path_list_separator()),
    );

    let has_home = vars.get("HOME").map(|h| !h.is_empty()).unwrap_or(false);
    if !has_home {
        if let Some(home) = dirs::home_dir() {
            vars.insert("HOME".to_string(), home.to_string_lossy().to_string());
        }
    }

    vars.insert(
        APP_DATA_ENV.to_string(),
        app_data_dir.to_string_lossy().to_string(),
    );
    vars.insert(UNBUFFERED_ENV.to_string(), "1".to_string());

    LaunchEnvironment { vars }
}

//! Capture tool detection
//!
//! Looks for an installed or running OBS Studio, which can show the relay's
//! viewer page as a browser source.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ProbeConfig;

/// Default install locations for the current platform
pub fn default_install_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin/obs"));
        paths.push(PathBuf::from("/usr/local/bin/obs"));
        paths.push(PathBuf::from("/var/lib/flatpak/app/com.obsproject.Studio"));
        paths.push(PathBuf::from("/snap/bin/obs-studio"));
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".local/share/flatpak/app/com.obsproject.Studio"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/Applications/OBS.app"));
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join("Applications/OBS.app"));
        }
    }

    #[cfg(target_os = "windows")]
    {
        for var in ["ProgramFiles", "ProgramFiles(x86)"] {
            if let Some(dir) = std::env::var_os(var) {
                paths.push(PathBuf::from(dir).join("obs-studio").join("bin").join("64bit").join("obs64.exe"));
            }
        }
    }

    paths
}

/// First existing install path
pub fn find_installation(paths: &[PathBuf]) -> Option<PathBuf> {
    paths.iter().find(|p| p.exists()).cloned()
}

/// First running process whose name matches one of `names`
#[cfg(target_os = "linux")]
pub fn find_running(names: &[String]) -> Option<String> {
    find_running_in(Path::new("/proc"), names)
}

#[cfg(not(target_os = "linux"))]
pub fn find_running(_names: &[String]) -> Option<String> {
    None
}

/// Scan `<proc_root>/<pid>/comm` for a matching process name
fn find_running_in(proc_root: &Path, names: &[String]) -> Option<String> {
    if names.is_empty() {
        return None;
    }

    let entries = std::fs::read_dir(proc_root).ok()?;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let is_pid = file_name
            .to_str()
            .map(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if !is_pid {
            continue;
        }

        // Processes can exit between readdir and read
        let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        let comm = comm.trim();
        if names.iter().any(|n| n == comm) {
            return Some(comm.to_string());
        }
    }
    None
}

/// Whether a capture tool is installed or running
pub fn detect(config: &ProbeConfig) -> bool {
    let paths = if config.capture_tool_paths.is_empty() {
        default_install_paths()
    } else {
        config.capture_tool_paths.clone()
    };

    if let Some(path) = find_installation(&paths) {
        debug!("Capture tool installed at {}", path.display());
        return true;
    }
    if let Some(name) = find_running(&config.capture_tool_processes) {
        debug!("Capture tool process '{}' running", name);
        return true;
    }
    false
}

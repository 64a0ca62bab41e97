use crate::config::PlatformPaths;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use tracing::debug;

static PERCENT_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_()]*)%").expect("valid regex"));
static DOLLAR_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").expect("valid regex"));
static DRIVE_LETTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]:(/|$)").expect("valid regex"));

/// Files whose presence marks a containerised host
const CONTAINER_MARKERS: &[&str] = &["/.dockerenv", "/run/.containerenv"];
const CGROUP_PATH: &str = "/proc/1/cgroup";
const CONTAINER_RUNTIMES: &[&str] = &["docker", "kubepods", "containerd", "lxc", "podman", "libpod"];

/// Expand `~`, `%VAR%`, `$VAR` and `${VAR}`, normalise separators to `/`
/// and make the result absolute.
///
/// Unset variables are left verbatim. Paths that are already absolute,
/// including Windows drive-letter and UNC paths, are never joined onto the
/// working directory.
pub fn expand_path(path: &str) -> String {
    let substituted = substitute_env(path.trim());
    let normalized = substituted.replace('\\', "/");
    let expanded = expand_tilde(&normalized);

    if is_absolute(&expanded) {
        return expanded;
    }

    match env::current_dir() {
        Ok(cwd) => {
            let base = cwd.to_string_lossy().replace('\\', "/");
            let rel = expanded.strip_prefix("./").unwrap_or(&expanded);
            format!("{}/{}", base.trim_end_matches('/'), rel)
        }
        Err(e) => {
            debug!("No working directory to resolve {}: {}", expanded, e);
            expanded
        }
    }
}

/// Whether a normalised path is absolute on any supported platform
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || DRIVE_LETTER.is_match(path)
}

fn substitute_env(path: &str) -> String {
    let with_percent = PERCENT_VAR.replace_all(path, |caps: &Captures| {
        env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    DOLLAR_VAR
        .replace_all(&with_percent, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
            env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

fn expand_tilde(path: &str) -> String {
    let rest = if path == "~" {
        ""
    } else if let Some(rest) = path.strip_prefix("~/") {
        rest
    } else {
        return path.to_string();
    };

    match dirs::home_dir() {
        Some(home) => {
            let home = home.to_string_lossy().replace('\\', "/");
            let home = home.trim_end_matches('/');
            if rest.is_empty() {
                home.to_string()
            } else {
                format!("{}/{}", home, rest)
            }
        }
        None => path.to_string(),
    }
}

/// Host platform families with distinct default log locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    Container,
    Linux,
    Windows,
    MacOs,
}

impl HostPlatform {
    /// Map `std::env::consts::OS`; unknown systems use the Linux layout
    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => HostPlatform::Windows,
            "macos" => HostPlatform::MacOs,
            _ => HostPlatform::Linux,
        }
    }

    pub fn select<'a>(&self, paths: &'a PlatformPaths) -> &'a [String] {
        match self {
            HostPlatform::Container => &paths.container,
            HostPlatform::Linux => &paths.linux,
            HostPlatform::Windows => &paths.windows,
            HostPlatform::MacOs => &paths.macos,
        }
    }
}

/// Source of facts used to classify the host
pub trait HostInspector {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Option<String>;
    fn os(&self) -> &str;
}

/// Inspector backed by the real filesystem
pub struct SystemHost;

impl HostInspector for SystemHost {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn read(&self, path: &str) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    fn os(&self) -> &str {
        env::consts::OS
    }
}

pub fn detect_platform() -> HostPlatform {
    detect_platform_with(&SystemHost)
}

pub fn detect_platform_with(host: &dyn HostInspector) -> HostPlatform {
    if CONTAINER_MARKERS.iter().any(|marker| host.exists(marker)) {
        return HostPlatform::Container;
    }

    if let Some(cgroup) = host.read(CGROUP_PATH) {
        if CONTAINER_RUNTIMES.iter().any(|runtime| cgroup.contains(runtime)) {
            return HostPlatform::Container;
        }
    }

    HostPlatform::from_os(host.os())
}

/// Expanded default paths for the current host
pub fn default_paths(paths: &PlatformPaths) -> Vec<String> {
    default_paths_for(detect_platform(), paths)
}

pub fn default_paths_for(platform: HostPlatform, paths: &PlatformPaths) -> Vec<String> {
    platform.select(paths).iter().map(|p| expand_path(p)).collect()
}

use super::ServerKind;
use serde::{Deserialize, Serialize};

/// Default log locations for one application, per host platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformPaths {
    #[serde(default)]
    pub container: Vec<String>,
    #[serde(default)]
    pub linux: Vec<String>,
    #[serde(default)]
    pub windows: Vec<String>,
    #[serde(default)]
    pub macos: Vec<String>,
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

/// Layout shared by the *arr applications, which keep logs under `<AppData>/logs`
fn arr_paths(app: &str, lower: &str) -> PlatformPaths {
    PlatformPaths {
        container: owned(&["/config/logs"]),
        linux: vec![
            format!("~/.config/{}/logs", app),
            format!("/var/lib/{}/logs", lower),
        ],
        windows: vec![format!("%ProgramData%/{}/logs", app)],
        macos: vec![format!("~/.config/{}/logs", app)],
    }
}

impl PlatformPaths {
    pub fn for_kind(kind: ServerKind) -> Self {
        match kind {
            ServerKind::Sonarr => arr_paths("Sonarr", "sonarr"),
            ServerKind::Radarr => arr_paths("Radarr", "radarr"),
            ServerKind::Lidarr => arr_paths("Lidarr", "lidarr"),
            ServerKind::Readarr => arr_paths("Readarr", "readarr"),
            ServerKind::Prowlarr => arr_paths("Prowlarr", "prowlarr"),
            ServerKind::Bazarr => PlatformPaths {
                container: owned(&["/config/log"]),
                linux: owned(&["/opt/bazarr/data/log", "~/.config/bazarr/log"]),
                windows: owned(&["%ProgramData%/Bazarr/data/log"]),
                macos: owned(&["~/Library/Application Support/bazarr/log"]),
            },
            ServerKind::Jellyfin => PlatformPaths {
                container: owned(&["/config/log", "/var/log/jellyfin"]),
                linux: owned(&["/var/log/jellyfin", "~/.local/share/jellyfin/log"]),
                windows: owned(&["%ProgramData%/Jellyfin/Server/log", "%LOCALAPPDATA%/jellyfin/log"]),
                macos: owned(&["~/.local/share/jellyfin/log"]),
            },
            ServerKind::Emby => PlatformPaths {
                container: owned(&["/config/logs"]),
                linux: owned(&["/var/lib/emby/logs"]),
                windows: owned(&["%AppData%/Emby-Server/programdata/logs"]),
                macos: owned(&["~/.config/emby-server/logs"]),
            },
            ServerKind::Plex => PlatformPaths {
                container: owned(&["/config/Library/Application Support/Plex Media Server/Logs"]),
                linux: owned(&[
                    "/var/lib/plexmediaserver/Library/Application Support/Plex Media Server/Logs",
                ]),
                windows: owned(&["%LOCALAPPDATA%/Plex Media Server/Logs"]),
                macos: owned(&["~/Library/Logs/Plex Media Server"]),
            },
            ServerKind::Other => PlatformPaths::default(),
        }
    }
}

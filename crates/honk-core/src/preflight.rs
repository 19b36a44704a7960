//! System prerequisite checks run before any step.

use crate::error::{InstallError, Result};
use crate::platform::{OsFamily, PlatformProfile};
use crate::process::{probe, PROBE_TIMEOUT};
use std::path::Path;

const ENGINE_COMMANDS: [&str; 2] = ["espeak-ng", "espeak"];
const OS_RELEASE: &str = "/etc/os-release";

// ---------------------------------------------------------------------------
// os-release
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: String,
    pub pretty_name: String,
}

impl Default for OsRelease {
    fn default() -> Self {
        Self {
            id: String::new(),
            id_like: String::new(),
            pretty_name: "Linux".to_string(),
        }
    }
}

impl OsRelease {
    pub fn parse(text: &str) -> Self {
        let mut release = Self::default();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.to_ascii_uppercase().as_str() {
                "ID" => release.id = value.to_ascii_lowercase(),
                "ID_LIKE" => release.id_like = value.to_ascii_lowercase(),
                "PRETTY_NAME" => release.pretty_name = value.to_string(),
                _ => {}
            }
        }
        release
    }

    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .map(|text| Self::parse(&text))
            .unwrap_or_default()
    }

    fn matches_any(&self, tokens: &[&str]) -> bool {
        tokens
            .iter()
            .any(|t| self.id.contains(t) || self.id_like.contains(t))
    }

    /// Package-manager command that installs the speech engine.
    pub fn engine_install_command(&self) -> &'static str {
        if self.matches_any(&["arch", "manjaro", "endeavouros"]) {
            "sudo pacman -S espeak-ng"
        } else if self.matches_any(&["debian", "ubuntu", "linuxmint", "pop", "elementary", "raspbian"]) {
            "sudo apt-get update && sudo apt-get install -y espeak-ng"
        } else if self.matches_any(&["fedora", "rhel", "centos", "rocky", "alma"]) {
            "sudo dnf install -y espeak-ng"
        } else if self.matches_any(&["opensuse", "sles", "suse"]) {
            "sudo zypper install -y espeak-ng"
        } else if self.matches_any(&["alpine"]) {
            "sudo apk add espeak-ng"
        } else {
            "install package 'espeak-ng' using your distribution's package manager"
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Human-readable instruction for installing the speech engine.
pub fn engine_install_hint(profile: &PlatformProfile) -> String {
    match profile.os {
        OsFamily::Linux => {
            let release = OsRelease::load(Path::new(OS_RELEASE));
            format!(
                "detected {}; install with: {}",
                release.pretty_name,
                release.engine_install_command()
            )
        }
        OsFamily::MacOs => "detected macOS; install with: brew install espeak-ng".to_string(),
        OsFamily::Windows => "install eSpeak NG from https://github.com/espeak-ng/espeak-ng/releases".to_string(),
    }
}

/// True if a speech engine on PATH answers `--version` in time.
pub async fn has_system_engine() -> bool {
    for command in ENGINE_COMMANDS {
        if probe(command, &["--version"], PROBE_TIMEOUT).await {
            tracing::debug!(command, "system speech engine found");
            return true;
        }
    }
    false
}

/// Resolve a speech engine executable on PATH without running it.
pub fn system_engine_on_path() -> Option<std::path::PathBuf> {
    ENGINE_COMMANDS.iter().find_map(|c| which::which(c).ok())
}

/// Fail early when the platform relies on a system speech engine that is
/// not installed.
pub async fn check(profile: &PlatformProfile) -> Result<()> {
    if profile.bundles_engine() {
        return Ok(());
    }
    if has_system_engine().await {
        return Ok(());
    }
    Err(InstallError::NotFound(format!(
        "eSpeak NG is not available on PATH ({}); install it first, then rerun the installer",
        engine_install_hint(profile)
    )))
}

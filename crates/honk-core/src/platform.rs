//! Platform descriptor: OS/CPU specific paths, download URLs and package
//! lists.
//!
//! A [`PlatformProfile`] is resolved once at startup with
//! [`PlatformProfile::detect`] and handed to everything that needs it. Tests
//! construct arbitrary profiles directly, so nothing here reads `cfg!` except
//! `detect` itself.

use crate::error::{InstallError, Result};
use std::fmt;

// ---------------------------------------------------------------------------
// Pinned versions and endpoints
// ---------------------------------------------------------------------------

/// CPython version shipped by python-build-standalone.
pub const RUNTIME_VERSION: &str = "3.10.13";
const STANDALONE_RELEASE: &str = "20240107";
const STANDALONE_BASE_URL: &str =
    "https://github.com/astral-sh/python-build-standalone/releases/download";

/// Coqui TTS model primed by the warmup step.
pub const MODEL_IDENTIFIER: &str = "tts_models/en/vctk/vits";

pub const PYTORCH_INDEX_URL: &str = "https://download.pytorch.org/whl/cpu";

const ESPEAK_MSI_VERSION: &str = "1.51";
const ESPEAK_MSI_URL: &str =
    "https://github.com/espeak-ng/espeak-ng/releases/download/1.51/espeak-ng-X64.msi";

const DEBIAN_ESPEAK_BASE: &str = "https://deb.debian.org/debian/pool/main/e/espeak-ng";
const DEBIAN_ESPEAK_VERSION: &str = "1.52.0+dfsg-5+b1";
const DEBIAN_PCAUDIO_BASE: &str = "https://deb.debian.org/debian/pool/main/p/pcaudiolib";
const DEBIAN_PCAUDIO_VERSION: &str = "1.3-1+b1";

// ---------------------------------------------------------------------------
// OsFamily / CpuArch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Linux,
    MacOs,
}

impl OsFamily {
    pub fn label(self) -> &'static str {
        match self {
            OsFamily::Windows => "Windows",
            OsFamily::Linux => "Linux",
            OsFamily::MacOs => "macOS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuArch {
    X86_64,
    Aarch64,
}

impl CpuArch {
    /// Debian architecture name.
    fn debian(self) -> &'static str {
        match self {
            CpuArch::X86_64 => "amd64",
            CpuArch::Aarch64 => "arm64",
        }
    }
}

// ---------------------------------------------------------------------------
// EngineSource
// ---------------------------------------------------------------------------

/// Where the native speech engine comes from on a given platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSource {
    /// One self-contained installer package, extracted administratively.
    InstallerPackage { url: String },
    /// Several small dependency packages merged into one tree.
    Packages { urls: Vec<String> },
    /// Provided by the system package manager; nothing to download.
    System,
}

// ---------------------------------------------------------------------------
// PlatformProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformProfile {
    pub os: OsFamily,
    pub arch: CpuArch,
}

impl PlatformProfile {
    pub fn new(os: OsFamily, arch: CpuArch) -> Self {
        Self { os, arch }
    }

    /// Profile of the machine this binary is running on.
    pub fn detect() -> Result<Self> {
        let os = match std::env::consts::OS {
            "windows" => OsFamily::Windows,
            "linux" => OsFamily::Linux,
            "macos" => OsFamily::MacOs,
            other => {
                return Err(InstallError::Configuration(format!(
                    "unsupported operating system: {other}"
                )))
            }
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => CpuArch::X86_64,
            "aarch64" => CpuArch::Aarch64,
            other => {
                return Err(InstallError::Configuration(format!(
                    "unsupported CPU architecture: {other}"
                )))
            }
        };
        Ok(Self { os, arch })
    }

    pub fn is_windows(&self) -> bool {
        self.os == OsFamily::Windows
    }

    pub fn label(&self) -> &'static str {
        self.os.label()
    }

    // -----------------------------------------------------------------------
    // Runtime
    // -----------------------------------------------------------------------

    pub fn python_exe_relative(&self) -> &'static str {
        if self.is_windows() {
            "python.exe"
        } else {
            "bin/python3"
        }
    }

    pub fn venv_bin_dir(&self) -> &'static str {
        if self.is_windows() {
            "Scripts"
        } else {
            "bin"
        }
    }

    pub fn venv_python_name(&self) -> &'static str {
        if self.is_windows() {
            "python.exe"
        } else {
            "python3"
        }
    }

    pub fn venv_pip_name(&self) -> &'static str {
        if self.is_windows() {
            "pip.exe"
        } else {
            "pip3"
        }
    }

    fn python_triple(&self) -> &'static str {
        match (self.os, self.arch) {
            // Only an x64 shared build is published for this release.
            (OsFamily::Windows, _) => "x86_64-pc-windows-msvc-shared",
            (OsFamily::MacOs, CpuArch::Aarch64) => "aarch64-apple-darwin",
            (OsFamily::MacOs, CpuArch::X86_64) => "x86_64-apple-darwin",
            (OsFamily::Linux, CpuArch::Aarch64) => "aarch64-unknown-linux-gnu",
            (OsFamily::Linux, CpuArch::X86_64) => "x86_64-unknown-linux-gnu",
        }
    }

    /// install_only builds are minimal, relocatable, and include pip.
    pub fn python_archive_url(&self) -> String {
        format!(
            "{STANDALONE_BASE_URL}/{STANDALONE_RELEASE}/cpython-{RUNTIME_VERSION}+{STANDALONE_RELEASE}-{}-install_only.tar.gz",
            self.python_triple()
        )
    }

    /// Published SHA-256 companion of [`Self::python_archive_url`].
    pub fn python_checksum_url(&self) -> String {
        format!("{}.sha256", self.python_archive_url())
    }

    pub fn python_archive_file_name(&self) -> String {
        format!("cpython-{RUNTIME_VERSION}-{}.tar.gz", self.python_triple())
    }

    // -----------------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------------

    pub fn engine_exe_name(&self) -> &'static str {
        if self.is_windows() {
            "espeak-ng.exe"
        } else {
            "espeak-ng"
        }
    }

    pub fn engine_version(&self) -> &'static str {
        match self.os {
            OsFamily::Windows => ESPEAK_MSI_VERSION,
            OsFamily::Linux => DEBIAN_ESPEAK_VERSION,
            OsFamily::MacOs => "system",
        }
    }

    pub fn engine_source(&self) -> EngineSource {
        match self.os {
            OsFamily::Windows => EngineSource::InstallerPackage {
                url: ESPEAK_MSI_URL.to_string(),
            },
            OsFamily::Linux => {
                let arch = self.arch.debian();
                EngineSource::Packages {
                    urls: vec![
                        format!("{DEBIAN_ESPEAK_BASE}/espeak-ng_{DEBIAN_ESPEAK_VERSION}_{arch}.deb"),
                        format!(
                            "{DEBIAN_ESPEAK_BASE}/libespeak-ng1_{DEBIAN_ESPEAK_VERSION}_{arch}.deb"
                        ),
                        format!(
                            "{DEBIAN_ESPEAK_BASE}/espeak-ng-data_{DEBIAN_ESPEAK_VERSION}_{arch}.deb"
                        ),
                        format!(
                            "{DEBIAN_PCAUDIO_BASE}/libpcaudio0_{DEBIAN_PCAUDIO_VERSION}_{arch}.deb"
                        ),
                    ],
                }
            }
            OsFamily::MacOs => EngineSource::System,
        }
    }

    /// True when the engine is downloaded into the install tree rather than
    /// taken from the system.
    pub fn bundles_engine(&self) -> bool {
        !matches!(self.engine_source(), EngineSource::System)
    }

    /// Shared-library file patterns copied next to the engine executable.
    pub fn engine_library_patterns(&self) -> &'static [&'static str] {
        match self.os {
            OsFamily::Linux => &["libespeak-ng.so*", "libpcaudio.so*"],
            _ => &[],
        }
    }

    /// Dynamic loader search-path variable, when the bundled engine needs one.
    pub fn library_path_var(&self) -> Option<&'static str> {
        match self.os {
            OsFamily::Linux => Some("LD_LIBRARY_PATH"),
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Launchers
    // -----------------------------------------------------------------------

    pub fn script_extension(&self) -> &'static str {
        if self.is_windows() {
            "bat"
        } else {
            "sh"
        }
    }
}

impl fmt::Display for PlatformProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arch = match self.arch {
            CpuArch::X86_64 => "x86_64",
            CpuArch::Aarch64 => "aarch64",
        };
        write!(f, "{} ({arch})", self.os.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_matches_build_target() {
        let profile = PlatformProfile::detect().unwrap();
        assert_eq!(profile.is_windows(), cfg!(windows));
    }

    #[test]
    fn python_url_uses_target_triple() {
        let linux = PlatformProfile::new(OsFamily::Linux, CpuArch::Aarch64);
        let url = linux.python_archive_url();
        assert!(url.ends_with(
            "cpython-3.10.13+20240107-aarch64-unknown-linux-gnu-install_only.tar.gz"
        ));
        assert!(linux.python_checksum_url().ends_with(".tar.gz.sha256"));
    }

    #[test]
    fn windows_always_uses_x64_runtime() {
        let win = PlatformProfile::new(OsFamily::Windows, CpuArch::Aarch64);
        assert!(win
            .python_archive_url()
            .contains("x86_64-pc-windows-msvc-shared"));
        assert_eq!(win.python_exe_relative(), "python.exe");
        assert_eq!(win.venv_bin_dir(), "Scripts");
    }

    #[test]
    fn linux_engine_is_four_packages_for_arch() {
        let linux = PlatformProfile::new(OsFamily::Linux, CpuArch::X86_64);
        let EngineSource::Packages { urls } = linux.engine_source() else {
            panic!("expected package list");
        };
        assert_eq!(urls.len(), 4);
        assert!(urls.iter().all(|u| u.ends_with("_amd64.deb")));
        assert!(urls[0].contains("/espeak-ng_"));
        assert!(urls[3].contains("libpcaudio0_"));
    }

    #[test]
    fn macos_uses_system_engine() {
        let mac = PlatformProfile::new(OsFamily::MacOs, CpuArch::Aarch64);
        assert_eq!(mac.engine_source(), EngineSource::System);
        assert!(!mac.bundles_engine());
        assert!(mac.library_path_var().is_none());
    }

    #[test]
    fn windows_engine_is_msi() {
        let win = PlatformProfile::new(OsFamily::Windows, CpuArch::X86_64);
        assert!(matches!(
            win.engine_source(),
            EngineSource::InstallerPackage { url } if url.ends_with(".msi")
        ));
        assert_eq!(win.engine_exe_name(), "espeak-ng.exe");
    }
}

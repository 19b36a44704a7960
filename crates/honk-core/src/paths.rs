use crate::platform::PlatformProfile;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RUNTIME_DIR: &str = "python";
pub const VENV_DIR: &str = "venv";
pub const ENGINE_DIR: &str = "espeak-ng";
pub const ENGINE_DATA_DIR: &str = "espeak-ng-data";
pub const SERVER_DIR: &str = "server";
pub const SCRATCH_DIR: &str = ".tmp";

pub const MANIFEST_FILE: &str = "config.json";
pub const SERVER_SCRIPT: &str = "tts_server.py";
pub const TEST_SCRIPT: &str = "test_server.py";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

// ---------------------------------------------------------------------------
// InstallLayout
// ---------------------------------------------------------------------------

/// Every path under the install root, for one platform.
#[derive(Debug, Clone)]
pub struct InstallLayout {
    root: PathBuf,
    profile: PlatformProfile,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>, profile: PlatformProfile) -> Self {
        Self {
            root: root.into(),
            profile,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join(RUNTIME_DIR)
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.join(VENV_DIR)
    }

    pub fn engine_dir(&self) -> PathBuf {
        self.root.join(ENGINE_DIR)
    }

    pub fn server_dir(&self) -> PathBuf {
        self.root.join(SERVER_DIR)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn python_exe(&self) -> PathBuf {
        self.runtime_dir().join(self.profile.python_exe_relative())
    }

    pub fn venv_python(&self) -> PathBuf {
        self.venv_dir()
            .join(self.profile.venv_bin_dir())
            .join(self.profile.venv_python_name())
    }

    pub fn venv_pip(&self) -> PathBuf {
        self.venv_dir()
            .join(self.profile.venv_bin_dir())
            .join(self.profile.venv_pip_name())
    }

    /// site-packages lives under `Lib/` on Windows and
    /// `lib/python<major.minor>/` elsewhere.
    pub fn site_packages(&self, runtime_version: &str) -> PathBuf {
        if self.profile.is_windows() {
            return self.venv_dir().join("Lib").join("site-packages");
        }
        let minor = major_minor(runtime_version);
        self.venv_dir()
            .join("lib")
            .join(format!("python{minor}"))
            .join("site-packages")
    }

    pub fn engine_exe(&self) -> PathBuf {
        self.engine_dir().join(self.profile.engine_exe_name())
    }

    pub fn engine_data_dir(&self) -> PathBuf {
        self.engine_dir().join(ENGINE_DATA_DIR)
    }

    pub fn start_script(&self) -> PathBuf {
        self.root
            .join(format!("start_tts.{}", self.profile.script_extension()))
    }

    pub fn test_script(&self) -> PathBuf {
        self.root
            .join(format!("test_tts.{}", self.profile.script_extension()))
    }

    pub fn installed_server_script(&self) -> PathBuf {
        self.server_dir().join(SERVER_SCRIPT)
    }

    pub fn installed_test_script(&self) -> PathBuf {
        self.server_dir().join(TEST_SCRIPT)
    }
}

/// `"3.10.13"` → `"3.10"`. Versions with fewer components pass through.
pub fn major_minor(version: &str) -> String {
    let mut parts = version.split('.');
    match (parts.next(), parts.next()) {
        (Some(major), Some(minor)) => format!("{major}.{minor}"),
        _ => version.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

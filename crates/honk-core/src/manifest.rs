//! Persisted record of installed component versions.
//!
//! The manifest lives at `<install root>/config.json`. Each run computes an
//! *expected* manifest from compiled-in versions and the server's
//! `requirements.txt`; steps compare it to the *installed* one to decide what
//! work a rerun needs.

use crate::error::Result;
use crate::platform::{PlatformProfile, MODEL_IDENTIFIER, RUNTIME_VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const INSTALLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallManifest {
    #[serde(default)]
    pub installer_version: String,
    pub runtime_version: String,
    pub engine_version: String,
    pub model_identifier: String,
    #[serde(default)]
    pub requirements_hash: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub install_dir: String,
}

impl InstallManifest {
    /// The manifest this build of the installer wants on disk.
    pub fn expected(
        profile: &PlatformProfile,
        requirements_hash: impl Into<String>,
        install_dir: &Path,
    ) -> Self {
        let now = Utc::now();
        Self {
            installer_version: INSTALLER_VERSION.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
            engine_version: profile.engine_version().to_string(),
            model_identifier: MODEL_IDENTIFIER.to_string(),
            requirements_hash: requirements_hash.into(),
            installed_at: now,
            updated_at: now,
            install_dir: install_dir.display().to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Load the installed manifest.
    ///
    /// A missing, unreadable, unparsable or invariant-violating file is
    /// treated as "no prior manifest" and never fails the run.
    pub fn load(path: &Path) -> Option<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "manifest unreadable");
                }
                return None;
            }
        };
        match serde_json::from_str::<InstallManifest>(&data) {
            Ok(m) if m.is_well_formed() => Some(m),
            Ok(_) => {
                tracing::debug!(path = %path.display(), "manifest violates invariants, ignoring");
                None
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "corrupt manifest, ignoring");
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        crate::io::atomic_write(path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Produce the record written after a successful run: `installed_at` is
    /// carried over from the previous manifest when there is one, and
    /// `updated_at` is now.
    pub fn stamped(&self, previous: Option<&InstallManifest>, now: DateTime<Utc>) -> Self {
        let installed_at = previous
            .map(|p| p.installed_at)
            .filter(|t| *t <= now)
            .unwrap_or(now);
        Self {
            installed_at,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Restrict the record to what this run actually checked.
    ///
    /// A tracked field whose owning step was filtered out keeps its previous
    /// value, or is left empty when there is none, so that step stays due.
    pub fn settled(&self, previous: Option<&InstallManifest>, evaluated: impl Fn(&str) -> bool) -> Self {
        let mut next = self.clone();
        for key in ["python", "packages", "espeak", "warmup", "server"] {
            if evaluated(key) {
                continue;
            }
            let kept = previous
                .map(|p| p.tracked(key).to_string())
                .unwrap_or_default();
            if let Some(field) = next.tracked_mut(key) {
                *field = kept;
            }
        }
        next
    }

    /// The field a step's rerun decision compares, by step key.
    fn tracked(&self, key: &str) -> &str {
        match key {
            "python" => &self.runtime_version,
            "packages" => &self.requirements_hash,
            "espeak" => &self.engine_version,
            "warmup" => &self.model_identifier,
            "server" => &self.installer_version,
            _ => "",
        }
    }

    fn tracked_mut(&mut self, key: &str) -> Option<&mut String> {
        match key {
            "python" => Some(&mut self.runtime_version),
            "packages" => Some(&mut self.requirements_hash),
            "espeak" => Some(&mut self.engine_version),
            "warmup" => Some(&mut self.model_identifier),
            "server" => Some(&mut self.installer_version),
            _ => None,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.updated_at >= self.installed_at && is_valid_hash(&self.requirements_hash)
    }
}

/// Lowercase hex SHA-256, or empty.
pub fn is_valid_hash(s: &str) -> bool {
    s.is_empty()
        || (s.len() == 64
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)))
}

/// Hash of the dependency spec, empty when the file does not exist.
pub fn requirements_hash(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    crate::io::sha256_file(path)
}

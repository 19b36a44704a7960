//! Locating the real engine data directory in a merged package tree.
//!
//! Packages ship several directories called `espeak-ng-data` (documentation
//! copies among them). Only one holds the phoneme tables and voices.

use crate::error::{InstallError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const PHONEME_MARKERS: [&str; 3] = ["phontab", "phondata", "phonindex"];

/// Default-voice entry read by older engine consumers.
pub const LEGACY_DEFAULT_VOICE: &str = "voices/default";

/// Per-language definitions used by current engine releases.
pub const LANGUAGE_DIR: &str = "lang";

// Unverified against the engine's own default-voice format; see DESIGN.md.
pub const DEFAULT_VOICE_STUB: &str = "name default\nlanguage en\n";

pub fn is_valid_data_dir(dir: &Path) -> bool {
    PHONEME_MARKERS.iter().all(|m| dir.join(m).is_file())
        && (dir.join(LEGACY_DEFAULT_VOICE).is_file() || has_language_definitions(dir))
}

fn has_language_definitions(dir: &Path) -> bool {
    WalkDir::new(dir.join(LANGUAGE_DIR))
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

/// Pick the valid candidate with the most specific (deepest, then longest)
/// path.
pub fn select_data_dir<I>(candidates: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    let candidates: Vec<PathBuf> = candidates.into_iter().collect();
    candidates
        .iter()
        .filter(|c| is_valid_data_dir(c))
        .max_by_key(|c| (c.components().count(), c.as_os_str().len()))
        .cloned()
        .ok_or_else(|| {
            let listed = candidates
                .iter()
                .map(|c| c.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            InstallError::Validation(format!(
                "no valid data directory among {} candidate(s): [{listed}]",
                candidates.len()
            ))
        })
}

/// Write the legacy default voice when only modern definitions exist.
/// Returns true if the stub was written.
pub fn ensure_legacy_default_voice(dir: &Path) -> Result<bool> {
    let legacy = dir.join(LEGACY_DEFAULT_VOICE);
    if legacy.is_file() || !has_language_definitions(dir) {
        return Ok(false);
    }
    if let Some(parent) = legacy.parent() {
        crate::io::ensure_dir(parent)?;
    }
    std::fs::write(&legacy, DEFAULT_VOICE_STUB)?;
    tracing::debug!(path = %legacy.display(), "wrote default voice stub");
    Ok(true)
}

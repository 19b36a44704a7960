//! Install steps.
//!
//! Each step is a named, idempotent unit: [`Step::should_run`] compares what
//! is on disk and in the installed manifest against what this build expects,
//! and [`Step::execute`] does the work. Steps hold only the service handles
//! they were built with; everything about the target install comes from the
//! shared [`InstallContext`].

mod engine;
mod packages;
mod runtime;
mod server;
mod venv;
mod warmup;

pub use engine::EngineStep;
pub use packages::PackagesStep;
pub use runtime::RuntimeStep;
pub use server::{start_script_contents, test_script_contents, ServerFilesStep};
pub use venv::VenvStep;
pub use warmup::{model_cache_dirs, WarmupStep};

use crate::download::Downloader;
use crate::error::Result;
use crate::manifest::{requirements_hash, InstallManifest};
use crate::paths::{InstallLayout, REQUIREMENTS_FILE};
use crate::process::ProcessRunner;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

/// Step keys in execution order.
pub const STEP_KEYS: [&str; 6] = ["python", "venv", "packages", "espeak", "warmup", "server"];

#[async_trait]
pub trait Step: Send + Sync {
    /// Stable key used by selection filters.
    fn key(&self) -> &'static str;

    fn name(&self) -> String;

    fn should_run(&self, ctx: &InstallContext) -> bool;

    async fn execute(&self, ctx: &InstallContext) -> Result<()>;
}

/// The fixed step list, in order.
pub fn default_pipeline(downloader: Downloader, runner: ProcessRunner) -> Vec<Box<dyn Step>> {
    vec![
        Box::new(RuntimeStep::new(downloader.clone())),
        Box::new(VenvStep::new(runner.clone())),
        Box::new(PackagesStep::new(runner.clone())),
        Box::new(EngineStep::new(downloader, runner.clone())),
        Box::new(WarmupStep::new(runner)),
        Box::new(ServerFilesStep),
    ]
}

// ---------------------------------------------------------------------------
// InstallContext
// ---------------------------------------------------------------------------

/// Everything a step needs to know about the target install.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub layout: InstallLayout,
    /// Manifest found on disk; `None` when missing or corrupt.
    pub installed: Option<InstallManifest>,
    /// Manifest this build would write.
    pub expected: InstallManifest,
    /// Directory holding `tts_server.py` and `requirements.txt`.
    pub server_source: PathBuf,
    /// Directories where a cached model may live.
    pub model_cache_dirs: Vec<PathBuf>,
}

impl InstallContext {
    pub fn load(layout: InstallLayout, server_source: PathBuf) -> Result<Self> {
        let hash = requirements_hash(&server_source.join(REQUIREMENTS_FILE))?;
        let expected = InstallManifest::expected(layout.profile(), hash, layout.root());
        let installed = InstallManifest::load(&layout.manifest_path());
        let model_cache_dirs = model_cache_dirs(&expected.model_identifier);
        Ok(Self {
            layout,
            installed,
            expected,
            server_source,
            model_cache_dirs,
        })
    }

    /// True when there is no trustworthy installed manifest, or the field
    /// selected by `field` differs from the expected one.
    pub fn changed<F>(&self, field: F) -> bool
    where
        F: Fn(&InstallManifest) -> &str,
    {
        match &self.installed {
            None => true,
            Some(installed) => field(installed) != field(&self.expected),
        }
    }

    /// Environment the bundled speech engine needs: data path, PATH prefix
    /// and, where applicable, the dynamic loader path. Empty when the engine
    /// comes from the system.
    pub fn engine_env(&self) -> BTreeMap<String, OsString> {
        let mut env = BTreeMap::new();
        let profile = self.layout.profile();
        if !profile.bundles_engine() {
            return env;
        }

        let engine_dir = self.layout.engine_dir();
        env.insert(
            "ESPEAK_DATA_PATH".to_string(),
            self.layout.engine_data_dir().into_os_string(),
        );
        env.insert("PATH".to_string(), prepend_path(&engine_dir, "PATH"));
        if let Some(var) = profile.library_path_var() {
            env.insert(var.to_string(), prepend_path(&engine_dir, var));
        }
        env
    }
}

/// `dir` followed by the current value of the search-path variable `var`.
fn prepend_path(dir: &std::path::Path, var: &str) -> OsString {
    let existing = std::env::var_os(var).unwrap_or_default();
    let paths = std::iter::once(dir.to_path_buf()).chain(std::env::split_paths(&existing));
    std::env::join_paths(paths).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::platform::{CpuArch, OsFamily, PlatformProfile};
    use std::path::Path;

    /// Context for a Linux install under `root` with no installed manifest.
    pub(crate) fn context(root: &Path) -> InstallContext {
        let layout = InstallLayout::new(
            root.join("install"),
            PlatformProfile::new(OsFamily::Linux, CpuArch::X86_64),
        );
        let expected = InstallManifest::expected(layout.profile(), "", layout.root());
        InstallContext {
            layout,
            installed: None,
            expected,
            server_source: root.join("src"),
            model_cache_dirs: vec![root.join("cache/tts_models--en--vctk--vits")],
        }
    }

    /// Same context with the expected manifest already installed.
    pub(crate) fn installed(root: &Path) -> InstallContext {
        let mut ctx = context(root);
        ctx.installed = Some(ctx.expected.clone());
        ctx
    }

    pub(crate) fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn step_keys_match_pipeline_order() {
        let steps = default_pipeline(
            Downloader::http().unwrap(),
            ProcessRunner::default(),
        );
        let keys: Vec<_> = steps.iter().map(|s| s.key()).collect();
        assert_eq!(keys, STEP_KEYS);
    }

    #[test]
    fn changed_without_installed_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = context(dir.path());
        assert!(ctx.changed(|m| m.runtime_version.as_str()));

        let ctx = installed(dir.path());
        assert!(!ctx.changed(|m| m.runtime_version.as_str()));
    }

    #[test]
    fn engine_env_points_at_bundled_engine() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = context(dir.path());
        let env = ctx.engine_env();

        assert_eq!(
            env["ESPEAK_DATA_PATH"],
            ctx.layout.engine_data_dir().into_os_string()
        );
        let path = std::env::split_paths(&env["PATH"]).next().unwrap();
        assert_eq!(path, ctx.layout.engine_dir());
        assert!(env.contains_key("LD_LIBRARY_PATH"));
    }

    #[test]
    fn engine_env_empty_for_system_engine() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut ctx = context(dir.path());
        ctx.layout = InstallLayout::new(
            dir.path(),
            PlatformProfile::new(OsFamily::MacOs, CpuArch::Aarch64),
        );
        assert!(ctx.engine_env().is_empty());
    }

    #[test]
    fn load_hashes_requirements_and_reads_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join(REQUIREMENTS_FILE), "TTS==0.22.0\n").unwrap();

        let layout = InstallLayout::new(
            dir.path().join("install"),
            PlatformProfile::new(OsFamily::Linux, CpuArch::X86_64),
        );
        let ctx = InstallContext::load(layout, src).unwrap();
        assert_eq!(ctx.expected.requirements_hash.len(), 64);
        assert!(ctx.installed.is_none());
    }
}

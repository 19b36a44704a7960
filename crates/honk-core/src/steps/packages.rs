use super::{InstallContext, Step};
use crate::error::{InstallError, Result};
use crate::io::{ensure_dir, remove_file_if_exists};
use crate::paths::REQUIREMENTS_FILE;
use crate::platform::{PYTORCH_INDEX_URL, RUNTIME_VERSION};
use crate::process::{CommandSpec, ProcessRunner};
use async_trait::async_trait;

/// Package whose presence marks a completed dependency install.
const SENTINEL_PACKAGE: &str = "TTS";

/// `pip install -r requirements.txt` into the venv, with the CPU-only
/// PyTorch index.
pub struct PackagesStep {
    runner: ProcessRunner,
}

impl PackagesStep {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Step for PackagesStep {
    fn key(&self) -> &'static str {
        "packages"
    }

    fn name(&self) -> String {
        "Python packages".to_string()
    }

    fn should_run(&self, ctx: &InstallContext) -> bool {
        let sentinel = ctx
            .layout
            .site_packages(RUNTIME_VERSION)
            .join(SENTINEL_PACKAGE);
        !sentinel.is_dir() || ctx.changed(|m| m.requirements_hash.as_str())
    }

    async fn execute(&self, ctx: &InstallContext) -> Result<()> {
        let source = ctx.server_source.join(REQUIREMENTS_FILE);
        if !source.is_file() {
            return Err(InstallError::NotFound(format!(
                "{REQUIREMENTS_FILE} at {}",
                source.display()
            )));
        }

        // pip reads a private copy; the source tree may be read-only.
        let scratch = ctx.layout.scratch_dir();
        ensure_dir(&scratch)?;
        let requirements = scratch.join(REQUIREMENTS_FILE);
        std::fs::copy(&source, &requirements)?;

        tracing::info!("Installing packages (this may take several minutes)...");
        let spec = CommandSpec::new(ctx.layout.venv_pip())
            .arg("install")
            .arg("-r")
            .arg(&requirements)
            .args(["--extra-index-url", PYTORCH_INDEX_URL])
            .current_dir(ctx.layout.venv_dir());
        self.runner.run(&spec).await?;

        remove_file_if_exists(&requirements)
    }
}

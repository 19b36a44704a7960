use super::{InstallContext, Step};
use crate::error::{InstallError, Result};
use crate::process::{CommandSpec, ProcessRunner};
use async_trait::async_trait;

/// `python -m venv <root>/venv` using the standalone interpreter.
pub struct VenvStep {
    runner: ProcessRunner,
}

impl VenvStep {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Step for VenvStep {
    fn key(&self) -> &'static str {
        "venv"
    }

    fn name(&self) -> String {
        "Virtual environment".to_string()
    }

    fn should_run(&self, ctx: &InstallContext) -> bool {
        !ctx.layout.venv_python().is_file() || ctx.changed(|m| m.runtime_version.as_str())
    }

    async fn execute(&self, ctx: &InstallContext) -> Result<()> {
        let layout = &ctx.layout;
        tracing::info!("Creating virtual environment...");
        let spec = CommandSpec::new(layout.python_exe())
            .args(["-m", "venv"])
            .arg(layout.venv_dir())
            .current_dir(layout.runtime_dir());
        self.runner.run(&spec).await?;

        if !layout.venv_python().is_file() {
            return Err(InstallError::NotFound(format!(
                "{} after creating the virtual environment",
                layout.venv_python().display()
            )));
        }
        Ok(())
    }
}

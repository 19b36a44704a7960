use super::{InstallContext, Step};
use crate::download::Downloader;
use crate::engine::{verify_canonical, EngineAssembler};
use crate::error::{InstallError, Result};
use crate::preflight::{engine_install_hint, has_system_engine, system_engine_on_path};
use crate::process::ProcessRunner;
use async_trait::async_trait;

/// eSpeak NG: assembled into `<root>/espeak-ng` where the platform bundles
/// it, otherwise confirmed on the system PATH.
pub struct EngineStep {
    downloader: Downloader,
    runner: ProcessRunner,
}

impl EngineStep {
    pub fn new(downloader: Downloader, runner: ProcessRunner) -> Self {
        Self { downloader, runner }
    }
}

#[async_trait]
impl Step for EngineStep {
    fn key(&self) -> &'static str {
        "espeak"
    }

    fn name(&self) -> String {
        "eSpeak NG".to_string()
    }

    fn should_run(&self, ctx: &InstallContext) -> bool {
        let present = if ctx.layout.profile().bundles_engine() {
            verify_canonical(&ctx.layout).is_ok()
        } else {
            system_engine_on_path().is_some()
        };
        !present || ctx.changed(|m| m.engine_version.as_str())
    }

    async fn execute(&self, ctx: &InstallContext) -> Result<()> {
        let profile = ctx.layout.profile();
        if !profile.bundles_engine() {
            if has_system_engine().await {
                tracing::info!("Using system eSpeak NG");
                return Ok(());
            }
            return Err(InstallError::NotFound(format!(
                "eSpeak NG on PATH ({})",
                engine_install_hint(profile)
            )));
        }

        EngineAssembler::new(ctx.layout.clone(), self.downloader.clone(), self.runner.clone())
            .assemble()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::tests::StaticTransport;
    use crate::steps::tests::{context, installed, touch};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn step() -> EngineStep {
        EngineStep::new(
            Downloader::new(Arc::new(StaticTransport::default())),
            ProcessRunner::default(),
        )
    }

    #[test]
    fn should_run_matrix_for_bundled_engine() {
        let dir = TempDir::new().unwrap();
        let step = step();

        let ctx = installed(dir.path());
        assert!(step.should_run(&ctx));

        touch(&ctx.layout.engine_exe());
        assert!(step.should_run(&ctx), "executable without data is half-assembled");

        let data = ctx.layout.engine_data_dir();
        for marker in ["phontab", "phondata", "phonindex", "lang/gmw/en"] {
            touch(&data.join(marker));
        }
        assert!(!step.should_run(&ctx));

        let mut old = ctx.clone();
        old.installed.as_mut().unwrap().engine_version = "1.50".into();
        assert!(step.should_run(&old));

        let mut other = ctx.clone();
        other.installed.as_mut().unwrap().runtime_version = "3.9.0".into();
        assert!(!step.should_run(&other));

        assert!(step.should_run(&context(dir.path())));
    }
}

use super::{InstallContext, Step};
use crate::archive::{blocking, extract_tar_gz};
use crate::download::{parse_checksum, Downloader};
use crate::error::{InstallError, Result};
use crate::io::{ensure_dir, remove_dir_if_exists, remove_file_if_exists, set_executable};
use crate::platform::RUNTIME_VERSION;
use async_trait::async_trait;

/// Standalone CPython, extracted to `<root>/python`.
pub struct RuntimeStep {
    downloader: Downloader,
}

impl RuntimeStep {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }
}

#[async_trait]
impl Step for RuntimeStep {
    fn key(&self) -> &'static str {
        "python"
    }

    fn name(&self) -> String {
        format!("Python {RUNTIME_VERSION} (standalone)")
    }

    fn should_run(&self, ctx: &InstallContext) -> bool {
        !ctx.layout.python_exe().is_file() || ctx.changed(|m| m.runtime_version.as_str())
    }

    async fn execute(&self, ctx: &InstallContext) -> Result<()> {
        let layout = &ctx.layout;
        let profile = layout.profile();

        // The venv is bound to the interpreter it was created from.
        if remove_dir_if_exists(&layout.venv_dir())? {
            tracing::info!("Removed old virtual environment");
        }

        let checksum_url = profile.python_checksum_url();
        let published = self.downloader.download_string(&checksum_url).await?;
        let expected = parse_checksum(&published).ok_or_else(|| {
            InstallError::Validation(format!("malformed checksum file at {checksum_url}"))
        })?;

        let scratch = layout.scratch_dir();
        ensure_dir(&scratch)?;
        let archive = scratch.join(profile.python_archive_file_name());

        tracing::info!("Downloading Python {RUNTIME_VERSION} standalone...");
        self.downloader
            .download_file(&profile.python_archive_url(), &archive, Some(&expected))
            .await?;

        tracing::info!("Extracting to python/...");
        remove_dir_if_exists(&layout.runtime_dir())?;
        let (src, root) = (archive.clone(), layout.root().to_path_buf());
        // Archives carry a top-level `python/` directory.
        blocking(move || extract_tar_gz(&src, &root)).await?;
        remove_file_if_exists(&archive)?;

        let python = layout.python_exe();
        if !python.is_file() {
            return Err(InstallError::NotFound(format!(
                "{} after extracting the runtime archive",
                python.display()
            )));
        }
        set_executable(&python)
    }
}

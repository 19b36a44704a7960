use super::{InstallContext, Step};
use crate::error::Result;
use crate::io::{ensure_dir, remove_file_if_exists};
use crate::process::{CommandSpec, ProcessRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const WARMUP_SCRIPT: &str = "warmup.py";

/// Downloads and caches the TTS model by loading it once.
pub struct WarmupStep {
    runner: ProcessRunner,
}

impl WarmupStep {
    pub fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }
}

/// Cache directories Coqui TTS may store `model` in, per platform
/// convention. Model ids map to directory names with `/` replaced by `--`.
pub fn model_cache_dirs(model: &str) -> Vec<PathBuf> {
    let slug = model.replace('/', "--");
    let mut roots = Vec::new();
    if let Some(home) = home::home_dir() {
        roots.push(home.join(".local").join("share"));
        roots.push(home.join("Library").join("Application Support"));
    }
    if let Some(local) = dirs::data_local_dir() {
        roots.push(local);
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    for root in roots {
        let dir = root.join("tts").join(&slug);
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

fn has_weights(dir: &Path) -> bool {
    WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "pth"))
}

fn warmup_script(model: &str) -> String {
    format!(
        "from TTS.api import TTS\n\
         tts = TTS(\"{model}\", progress_bar=True, gpu=False)\n\
         print(\"Model loaded successfully.\")\n"
    )
}

#[async_trait]
impl Step for WarmupStep {
    fn key(&self) -> &'static str {
        "warmup"
    }

    fn name(&self) -> String {
        "TTS model download".to_string()
    }

    fn should_run(&self, ctx: &InstallContext) -> bool {
        let cached = ctx.model_cache_dirs.iter().any(|d| has_weights(d));
        !cached || ctx.changed(|m| m.model_identifier.as_str())
    }

    async fn execute(&self, ctx: &InstallContext) -> Result<()> {
        let layout = &ctx.layout;
        let scratch = layout.scratch_dir();
        ensure_dir(&scratch)?;
        let script = scratch.join(WARMUP_SCRIPT);
        std::fs::write(&script, warmup_script(&ctx.expected.model_identifier))?;

        tracing::info!("Downloading and caching TTS model (this may take a few minutes)...");
        let spec = CommandSpec::new(layout.venv_python())
            .arg(&script)
            .current_dir(layout.venv_dir())
            .envs(ctx.engine_env());
        self.runner.run(&spec).await?;

        remove_file_if_exists(&script)
    }
}

use super::{InstallContext, Step};
use crate::error::{InstallError, Result};
use crate::io::{atomic_write, ensure_dir, remove_file_if_exists, same_contents, set_executable};
use crate::paths::{InstallLayout, SERVER_SCRIPT, TEST_SCRIPT};
use crate::platform::OsFamily;
use async_trait::async_trait;

/// Address printed by the start launcher; the server binds it itself.
const SERVER_ADDRESS: &str = "http://127.0.0.1:5234";

/// Copies the server files and writes the launcher scripts.
pub struct ServerFilesStep;

#[async_trait]
impl Step for ServerFilesStep {
    fn key(&self) -> &'static str {
        "server"
    }

    fn name(&self) -> String {
        "Server files and entrypoints".to_string()
    }

    fn should_run(&self, ctx: &InstallContext) -> bool {
        let layout = &ctx.layout;
        !layout.start_script().is_file()
            || !same_contents(
                &ctx.server_source.join(SERVER_SCRIPT),
                &layout.installed_server_script(),
            )
            || ctx.changed(|m| m.installer_version.as_str())
    }

    async fn execute(&self, ctx: &InstallContext) -> Result<()> {
        let layout = &ctx.layout;
        ensure_dir(&layout.server_dir())?;

        let server = ctx.server_source.join(SERVER_SCRIPT);
        if !server.is_file() {
            return Err(InstallError::NotFound(format!(
                "{SERVER_SCRIPT} at {}",
                server.display()
            )));
        }
        std::fs::copy(&server, layout.installed_server_script())?;
        tracing::info!("Copied {SERVER_SCRIPT}");

        let test = ctx.server_source.join("scripts").join(TEST_SCRIPT);
        if test.is_file() {
            std::fs::copy(&test, layout.installed_test_script())?;
            tracing::info!("Copied {TEST_SCRIPT}");
        }

        write_launcher(&layout.start_script(), &start_script_contents(layout))?;

        if layout.installed_test_script().is_file() {
            write_launcher(&layout.test_script(), &test_script_contents(layout))?;
        } else {
            remove_file_if_exists(&layout.test_script())?;
            tracing::info!("Skipped test launcher ({TEST_SCRIPT} not found)");
        }
        Ok(())
    }
}

fn write_launcher(path: &std::path::Path, contents: &str) -> Result<()> {
    atomic_write(path, contents.as_bytes())?;
    set_executable(path)?;
    if let Some(name) = path.file_name() {
        tracing::info!("Generated {}", name.to_string_lossy());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Launcher scripts
// ---------------------------------------------------------------------------

/// Environment preamble pointing the server at the bundled engine.
fn engine_preamble(layout: &InstallLayout) -> String {
    let engine = layout.engine_dir();
    let data = layout.engine_data_dir();
    match layout.profile().os {
        OsFamily::Windows => format!(
            "set ESPEAK_DATA_PATH={}\r\nset PATH={};%PATH%\r\n",
            data.display(),
            engine.display()
        ),
        OsFamily::Linux => format!(
            "if [ -d \"{engine}\" ]; then\n  \
             export ESPEAK_DATA_PATH=\"{data}\"\n  \
             export LD_LIBRARY_PATH=\"{engine}:$LD_LIBRARY_PATH\"\n  \
             export PATH=\"{engine}:$PATH\"\n\
             fi\n",
            engine = engine.display(),
            data = data.display()
        ),
        OsFamily::MacOs => String::new(),
    }
}

pub fn start_script_contents(layout: &InstallLayout) -> String {
    let python = layout.venv_python();
    let server = layout.installed_server_script();
    let preamble = engine_preamble(layout);
    if layout.profile().is_windows() {
        format!(
            "@echo off\r\n{preamble}echo Starting HonkTTS server on {SERVER_ADDRESS} ...\r\n\"{}\" \"{}\"\r\npause\r\n",
            python.display(),
            server.display()
        )
    } else {
        format!(
            "#!/usr/bin/env bash\n{preamble}echo \"Starting HonkTTS server on {SERVER_ADDRESS} ...\"\n\"{}\" \"{}\"\n",
            python.display(),
            server.display()
        )
    }
}

/// Forwards all arguments to the installed test client.
pub fn test_script_contents(layout: &InstallLayout) -> String {
    let python = layout.venv_python();
    let test = layout.installed_test_script();
    let preamble = engine_preamble(layout);
    if layout.profile().is_windows() {
        format!(
            "@echo off\r\n{preamble}\"{}\" \"{}\" %*\r\n",
            python.display(),
            test.display()
        )
    } else {
        format!(
            "#!/usr/bin/env bash\n{preamble}\"{}\" \"{}\" \"$@\"\n",
            python.display(),
            test.display()
        )
    }
}

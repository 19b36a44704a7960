//! Speech-engine assembly.
//!
//! Whatever the source package format, the result is the same canonical
//! layout under `<root>/espeak-ng/`:
//!
//! ```text
//! espeak-ng/
//!   espeak-ng[.exe]
//!   libespeak-ng.so.1 ...      (Linux only)
//!   espeak-ng-data/
//! ```

pub mod data_dir;
pub mod deb;

use crate::archive::{blocking, copy_dir_all, find_dirs, find_file};
use crate::download::Downloader;
use crate::error::{InstallError, Result};
use crate::io::{ensure_dir, remove_dir_if_exists, remove_file_if_exists, set_executable};
use crate::paths::{InstallLayout, ENGINE_DATA_DIR};
use crate::platform::EngineSource;
use crate::process::{CommandSpec, ProcessRunner};
use std::path::Path;

pub use data_dir::{ensure_legacy_default_voice, is_valid_data_dir, select_data_dir};

const MSI_FILE: &str = "espeak-ng.msi";
const MSI_EXTRACT_DIR: &str = "espeak-ng-msi";
const PACKAGE_SCRATCH_DIR: &str = "espeak-ng-debs";

pub struct EngineAssembler {
    layout: InstallLayout,
    downloader: Downloader,
    runner: ProcessRunner,
}

impl EngineAssembler {
    pub fn new(layout: InstallLayout, downloader: Downloader, runner: ProcessRunner) -> Self {
        Self {
            layout,
            downloader,
            runner,
        }
    }

    /// Build the canonical engine directory from the platform's source.
    pub async fn assemble(&self) -> Result<()> {
        match self.layout.profile().engine_source() {
            EngineSource::InstallerPackage { url } => self.assemble_from_installer(&url).await,
            EngineSource::Packages { urls } => self.assemble_from_packages(&urls).await,
            EngineSource::System => Err(InstallError::Configuration(format!(
                "{} uses the system speech engine; nothing to assemble",
                self.layout.profile()
            ))),
        }
    }

    /// Administrative extraction of a single installer package (no system
    /// install), keeping the directory that holds the executable.
    pub async fn assemble_from_installer(&self, url: &str) -> Result<()> {
        let scratch = self.layout.scratch_dir();
        let msi = scratch.join(MSI_FILE);
        let extract = scratch.join(MSI_EXTRACT_DIR);

        tracing::info!("Downloading speech engine installer...");
        self.downloader.download_file(url, &msi, None).await?;

        remove_dir_if_exists(&extract)?;
        tracing::info!("Extracting installer...");
        let spec = CommandSpec::new("msiexec")
            .arg("/a")
            .arg(&msi)
            .arg("/qn")
            .raw_arg(format!("TARGETDIR=\"{}\"", extract.display()));
        self.runner.run(&spec).await?;

        let layout = self.layout.clone();
        let extracted = extract.clone();
        blocking(move || install_from_extracted(&extracted, &layout)).await?;

        remove_dir_if_exists(&extract)?;
        remove_file_if_exists(&msi)?;
        Ok(())
    }

    /// Download each package, merge their payloads into one tree and pick
    /// the executable, libraries and data directory out of it.
    pub async fn assemble_from_packages(&self, urls: &[String]) -> Result<()> {
        let scratch = self.layout.scratch_dir().join(PACKAGE_SCRATCH_DIR);
        let tree = scratch.join("tree");
        remove_dir_if_exists(&scratch)?;
        ensure_dir(&tree)?;

        for url in urls {
            let name = url.rsplit('/').next().unwrap_or("package.deb");
            let deb = scratch.join(name);
            tracing::info!("Downloading {name}...");
            self.downloader.download_file(url, &deb, None).await?;

            let (package, merged) = (deb.clone(), tree.clone());
            blocking(move || deb::unpack_deb(&package, &merged)).await?;
            remove_file_if_exists(&deb)?;
        }

        let layout = self.layout.clone();
        let merged = tree.clone();
        blocking(move || install_from_tree(&merged, &layout)).await?;

        remove_dir_if_exists(&scratch)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Canonical layout
// ---------------------------------------------------------------------------

/// Copy the directory containing the engine executable wholesale.
pub fn install_from_extracted(extract: &Path, layout: &InstallLayout) -> Result<()> {
    let exe_name = layout.profile().engine_exe_name();
    let exe = find_file(extract, exe_name).ok_or_else(|| {
        InstallError::NotFound(format!("{exe_name} in extracted installer {}", extract.display()))
    })?;
    let source = exe.parent().unwrap_or(extract);

    let engine_dir = layout.engine_dir();
    remove_dir_if_exists(&engine_dir)?;
    let copied = copy_dir_all(source, &engine_dir)?;
    tracing::debug!(files = copied, from = %source.display(), "copied engine directory");

    verify_canonical(layout)
}

/// Pull the executable, shared libraries and data directory out of a merged
/// package tree.
pub fn install_from_tree(tree: &Path, layout: &InstallLayout) -> Result<()> {
    let profile = layout.profile();
    let exe_name = profile.engine_exe_name();
    let exe = find_file(tree, exe_name).ok_or_else(|| {
        InstallError::NotFound(format!("{exe_name} in unpacked packages {}", tree.display()))
    })?;
    let data = select_data_dir(find_dirs(tree, ENGINE_DATA_DIR))?;
    tracing::debug!(path = %data.display(), "selected engine data directory");

    let engine_dir = layout.engine_dir();
    remove_dir_if_exists(&engine_dir)?;
    ensure_dir(&engine_dir)?;

    std::fs::copy(&exe, layout.engine_exe())?;
    set_executable(&layout.engine_exe())?;

    let mut libraries = 0;
    for pattern in profile.engine_library_patterns() {
        for lib in glob_tree(tree, pattern)? {
            // Symlinked sonames resolve to the real library and are copied
            // as regular files.
            if !lib.is_file() {
                continue;
            }
            if let Some(name) = lib.file_name() {
                std::fs::copy(&lib, engine_dir.join(name))?;
                libraries += 1;
            }
        }
    }
    if libraries == 0 && !profile.engine_library_patterns().is_empty() {
        tracing::warn!("no shared libraries found for the speech engine");
    }

    copy_dir_all(&data, &layout.engine_data_dir())?;
    ensure_legacy_default_voice(&layout.engine_data_dir())?;

    verify_canonical(layout)
}

/// Files matching `pattern` at any depth under `root`.
fn glob_tree(root: &Path, pattern: &str) -> Result<Vec<std::path::PathBuf>> {
    let root = root.to_str().ok_or_else(|| {
        InstallError::Validation(format!("non UTF-8 path: {}", root.display()))
    })?;
    let full = format!("{}/**/{pattern}", glob::Pattern::escape(root));
    let paths = glob::glob(&full)
        .map_err(|e| InstallError::Validation(format!("bad library pattern {pattern}: {e}")))?;
    Ok(paths.filter_map(|p| p.ok()).collect())
}

/// Post-condition of every assembly path.
pub fn verify_canonical(layout: &InstallLayout) -> Result<()> {
    let exe = layout.engine_exe();
    if !exe.is_file() {
        return Err(InstallError::NotFound(format!(
            "speech engine executable {}",
            exe.display()
        )));
    }
    let data = layout.engine_data_dir();
    if !is_valid_data_dir(&data) {
        return Err(InstallError::Validation(format!(
            "{} is not a valid engine data directory",
            data.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::tests::{fast_policy, StaticTransport};
    use crate::error::ErrorKind;
    use crate::platform::{CpuArch, OsFamily, PlatformProfile};
    use std::sync::Arc;
    use tempfile::TempDir;

    const LIB: &str = "./usr/lib/x86_64-linux-gnu";

    fn linux_layout(root: &Path) -> InstallLayout {
        InstallLayout::new(root, PlatformProfile::new(OsFamily::Linux, CpuArch::X86_64))
    }

    fn assembler(layout: InstallLayout, transport: StaticTransport) -> EngineAssembler {
        let downloader = Downloader::new(Arc::new(transport)).with_policy(fast_policy());
        EngineAssembler::new(layout, downloader, ProcessRunner::default())
    }

    fn packages() -> StaticTransport {
        let data = format!("{LIB}/espeak-ng-data");
        StaticTransport::default()
            .with(
                "https://deb.test/espeak-ng.deb",
                deb::tests::deb_xz(&[("./usr/bin/espeak-ng", "#!engine")]),
            )
            .with(
                "https://deb.test/libespeak-ng1.deb",
                deb::tests::deb_xz(&[(format!("{LIB}/libespeak-ng.so.1.1.52").as_str(), "elf")]),
            )
            .with(
                "https://deb.test/espeak-ng-data.deb",
                deb::tests::deb_xz(&[
                    (format!("{data}/phontab").as_str(), "p"),
                    (format!("{data}/phondata").as_str(), "p"),
                    (format!("{data}/phonindex").as_str(), "p"),
                    (format!("{data}/lang/gmw/en").as_str(), "name English"),
                    ("./usr/share/doc/espeak-ng-data/espeak-ng-data/README", "docs"),
                    ("./usr/share/doc/espeak-ng-data/copyright", "GPL"),
                ]),
            )
            .with(
                "https://deb.test/libpcaudio0.deb",
                deb::tests::deb_xz(&[(format!("{LIB}/libpcaudio.so.0.0.1").as_str(), "elf")]),
            )
    }

    fn urls(names: &[&str]) -> Vec<String> {
        names
            .iter()
            .map(|n| format!("https://deb.test/{n}.deb"))
            .collect()
    }

    #[tokio::test]
    async fn packages_merge_into_canonical_layout() {
        let root = TempDir::new().unwrap();
        let layout = linux_layout(root.path());
        let assembler = assembler(layout.clone(), packages());

        assembler
            .assemble_from_packages(&urls(&[
                "espeak-ng",
                "libespeak-ng1",
                "espeak-ng-data",
                "libpcaudio0",
            ]))
            .await
            .unwrap();

        let engine = layout.engine_dir();
        assert!(layout.engine_exe().is_file());
        assert!(engine.join("libespeak-ng.so.1.1.52").is_file());
        assert!(engine.join("libpcaudio.so.0.0.1").is_file());
        assert!(is_valid_data_dir(&layout.engine_data_dir()));
        assert!(layout.engine_data_dir().join("voices/default").is_file());
        assert!(!layout.scratch_dir().join(PACKAGE_SCRATCH_DIR).exists());
        verify_canonical(&layout).unwrap();
    }

    #[tokio::test]
    async fn missing_executable_is_not_found() {
        let root = TempDir::new().unwrap();
        let assembler = assembler(linux_layout(root.path()), packages());
        let err = assembler
            .assemble_from_packages(&urls(&["espeak-ng-data"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn documentation_only_data_is_validation_error() {
        let root = TempDir::new().unwrap();
        let transport = StaticTransport::default()
            .with(
                "https://deb.test/espeak-ng.deb",
                deb::tests::deb_xz(&[
                    ("./usr/bin/espeak-ng", "#!engine"),
                    ("./usr/share/doc/espeak-ng-data/README", "docs"),
                ]),
            );
        let layout = linux_layout(root.path());
        let assembler = assembler(layout.clone(), transport);
        let err = assembler
            .assemble_from_packages(&urls(&["espeak-ng"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("no valid data directory"));
        assert!(!layout.engine_exe().exists(), "nothing half-assembled left behind");
    }

    #[tokio::test]
    async fn download_failure_propagates_unchanged() {
        let root = TempDir::new().unwrap();
        let assembler = assembler(linux_layout(root.path()), StaticTransport::default());
        let err = assembler
            .assemble_from_packages(&urls(&["espeak-ng"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn system_engine_has_nothing_to_assemble() {
        let root = TempDir::new().unwrap();
        let layout =
            InstallLayout::new(root.path(), PlatformProfile::new(OsFamily::MacOs, CpuArch::Aarch64));
        let err = assembler(layout, StaticTransport::default())
            .assemble()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn installer_tree_is_copied_from_executable_dir() {
        let root = TempDir::new().unwrap();
        let layout = InstallLayout::new(
            root.path().join("install"),
            PlatformProfile::new(OsFamily::Windows, CpuArch::X86_64),
        );
        let extract = root.path().join("msi");
        let program = extract.join("PFiles/eSpeak NG");
        let data = program.join("espeak-ng-data");
        std::fs::create_dir_all(data.join("voices")).unwrap();
        for f in ["phontab", "phondata", "phonindex", "voices/default"] {
            std::fs::write(data.join(f), "x").unwrap();
        }
        std::fs::write(program.join("espeak-ng.exe"), "MZ").unwrap();
        std::fs::write(program.join("libespeak-ng.dll"), "MZ").unwrap();

        install_from_extracted(&extract, &layout).unwrap();
        assert!(layout.engine_dir().join("libespeak-ng.dll").is_file());
        verify_canonical(&layout).unwrap();
    }

    #[test]
    fn installer_without_executable_is_not_found() {
        let root = TempDir::new().unwrap();
        let layout = InstallLayout::new(
            root.path().join("install"),
            PlatformProfile::new(OsFamily::Windows, CpuArch::X86_64),
        );
        std::fs::create_dir_all(root.path().join("msi")).unwrap();
        let err = install_from_extracted(&root.path().join("msi"), &layout).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

use anyhow::bail;
use honk_core::paths::SERVER_SCRIPT;
use std::path::{Path, PathBuf};

/// Resolve the directory holding the server sources.
///
/// Priority:
/// 1. `--server-src` flag / `HONK_SERVER_SRC` env var (passed in as `explicit`)
/// 2. `server/` next to the executable
/// 3. `server/` at the repository root, for binaries run from `target/<profile>/`
/// 4. `./server`, then `../server`
pub fn resolve_server_source(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        if dir.join(SERVER_SCRIPT).is_file() {
            return Ok(dir.to_path_buf());
        }
        bail!("{SERVER_SCRIPT} not found in {}", dir.display());
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let tried = candidates(exe_dir.as_deref(), &cwd);
    if let Some(found) = tried.iter().find(|c| c.join(SERVER_SCRIPT).is_file()) {
        return Ok(found.clone());
    }

    let listed = tried
        .iter()
        .map(|p| format!("  {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    bail!("could not find {SERVER_SCRIPT}; pass --server-src. Searched:\n{listed}")
}

fn candidates(exe_dir: Option<&Path>, cwd: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(exe) = exe_dir {
        dirs.push(exe.join("server"));
        dirs.push(exe.join("../../../../../server"));
    }
    dirs.push(cwd.join("server"));
    dirs.push(cwd.join("../server"));
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_dir_wins() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SERVER_SCRIPT), "").unwrap();
        assert_eq!(resolve_server_source(Some(dir.path())).unwrap(), dir.path());
    }

    #[test]
    fn explicit_dir_without_server_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve_server_source(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains(SERVER_SCRIPT));
    }

    #[test]
    fn candidate_order() {
        let found = candidates(Some(Path::new("/opt/bin")), Path::new("/work"));
        assert_eq!(
            found,
            [
                PathBuf::from("/opt/bin/server"),
                PathBuf::from("/opt/bin/../../../../../server"),
                PathBuf::from("/work/server"),
                PathBuf::from("/work/../server"),
            ]
        );
        assert_eq!(candidates(None, Path::new("/work")).len(), 2);
    }
}

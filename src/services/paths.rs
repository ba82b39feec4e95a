use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

const SAVEDATA_DIR_NAME: &str = "savedata";

fn exe_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|p| p.to_path_buf())
}

/// Resolve and create the application's data directory.
///
/// `override_dir` (from `RCAT_DATA_DIR`) wins; otherwise `<exe_dir>/savedata`.
/// The first successful resolution is cached for the process lifetime.
pub(crate) fn init_data_dir(override_dir: Option<&Path>) -> Result<PathBuf, String> {
    if let Some(dir) = DATA_DIR.get() {
        if let Some(requested) = ignored_override(dir, override_dir) {
            log::warn!(
                "data directory already set to {}; ignoring {}",
                dir.display(),
                requested.display()
            );
        }
        return Ok(dir.clone());
    }

    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => exe_dir()
            .ok_or_else(|| "Failed to resolve executable directory".to_string())?
            .join(SAVEDATA_DIR_NAME),
    };

    std::fs::create_dir_all(&dir).map_err(|e| format!("Failed to create data directory: {e}"))?;
    let _ = DATA_DIR.set(dir.clone());
    Ok(dir)
}

/// An override that disagrees with the directory already in use.
fn ignored_override<'a>(cached: &Path, override_dir: Option<&'a Path>) -> Option<&'a Path> {
    override_dir.filter(|d| *d != cached)
}

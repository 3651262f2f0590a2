//! Locating `winio.sys` and `imod-config.ini` next to the tool.

use std::path::{Path, PathBuf};

/// Search roots probed by the tool, in priority order: the working directory, the directory of
/// the running executable, then its parent and grandparent.
///
/// Roots that cannot be determined are left out.
pub fn default_search_roots() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().ok();
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    search_roots(cwd, exe_dir)
}

/// Build the root list from an optional working directory and executable directory.
pub fn search_roots(cwd: Option<PathBuf>, exe_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    roots.extend(cwd);
    if let Some(exe_dir) = exe_dir {
        // ancestors() yields the directory itself first.
        roots.extend(exe_dir.ancestors().take(3).map(Path::to_path_buf));
    }
    roots
}

/// Return `root/file_name` for the first root where it exists as a regular file.
pub fn find_in_roots(roots: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    roots
        .iter()
        .map(|root| root.join(file_name))
        .find(|candidate| candidate.is_file())
}

use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::Result;

/// List the files directly inside `dir` whose name matches `pattern`.
///
/// The directory is created if absent. Subdirectories are not descended into and
/// the listing is a snapshot: files arriving afterwards wait for the next cycle.
pub fn scan_dir(dir: &Path, pattern: &Pattern) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .file_name()
            .to_str()
            .map(|name| pattern.matches(name))
            .unwrap_or(false);
        if matches {
            files.push(entry.into_path());
        }
    }

    log::debug!("Found {} matching files in {}", files.len(), dir.display());
    Ok(files)
}

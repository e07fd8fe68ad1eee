//! Modified-file collection from an overlay upper layer.

use std::path::{Path, PathBuf};

use tracing::{instrument, trace};
use walkdir::WalkDir;

/// Walks `upper` depth-first and returns every regular file, relative to `upper`.
///
/// Directories, symlinks and whiteout devices are skipped. Unreadable
/// subtrees contribute nothing. Paths come back in directory-entry order.
#[instrument(skip_all, fields(upper = %upper.display()))]
pub fn collect_modified_files(upper: &Path) -> Vec<PathBuf> {
    let files: Vec<PathBuf> = WalkDir::new(upper)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                trace!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(upper).ok().map(Path::to_path_buf))
        .collect();

    trace!(count = files.len(), "Collected modified files");
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collects_nested_files_relative() {
        let dir = TempDir::new().expect("failed to create temp dir");
        fs::create_dir_all(dir.path().join("tmp/deep")).expect("mkdir");
        fs::write(dir.path().join("tmp/out.txt"), "hi").expect("write");
        fs::write(dir.path().join("tmp/deep/a.bin"), [0u8; 4]).expect("write");
        fs::write(dir.path().join("top"), "").expect("write");

        let mut files = collect_modified_files(dir.path());
        files.sort();

        assert_eq!(
            files,
            vec![
                PathBuf::from("tmp/deep/a.bin"),
                PathBuf::from("tmp/out.txt"),
                PathBuf::from("top"),
            ]
        );
    }

    #[test]
    fn test_directories_are_not_reported() {
        let dir = TempDir::new().expect("failed to create temp dir");
        fs::create_dir_all(dir.path().join("empty/nested")).expect("mkdir");
        assert!(collect_modified_files(dir.path()).is_empty());
    }

    #[test]
    fn test_missing_upper_yields_nothing() {
        let dir = TempDir::new().expect("failed to create temp dir");
        assert!(collect_modified_files(&dir.path().join("gone")).is_empty());
    }
}

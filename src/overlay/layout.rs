//! Per-run directory layout for the overlay filesystem.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use super::mounts::{is_overlay_mount, lazy_unmount};
use crate::error::BackendError;

/// Directory permissions: owner read/write/execute only (0700).
const DIR_PERMISSIONS: u32 = 0o700;

/// Paths of one run's overlay triad.
///
/// ```text
/// {tmp_root}/{prefix}-{32 hex chars}/
/// ├── upper/        # writable layer, walked for modified files
/// ├── work/         # overlay work directory
/// ├── merged/       # mount point presented as the sandbox root
/// ├── setup.sh      # generated script (unshare-script backend only)
/// └── overlay.ready # written once fuse-overlayfs has mounted
/// ```
///
/// The layout owns its base directory. Dropping it lazily unmounts `merged`
/// and removes the whole tree, so every exit path (including `?` returns
/// and panics) releases it.
#[derive(Debug)]
pub struct OverlayLayout {
    /// Unique base directory for this run.
    pub base: PathBuf,
    /// Overlay upper layer (writable).
    pub upper: PathBuf,
    /// Overlay work directory.
    pub work: PathBuf,
    /// Overlay mount point.
    pub merged: PathBuf,
}

impl OverlayLayout {
    /// Allocates a fresh base directory under `tmp_root` and creates the
    /// upper, work and merged subdirectories.
    ///
    /// If any step fails, the partially created tree is removed before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Layout` if a directory cannot be created.
    #[instrument(skip_all, fields(tmp_root = %tmp_root.display(), prefix))]
    pub fn prepare(tmp_root: &Path, prefix: &str) -> Result<Self, BackendError> {
        let id = Uuid::new_v4().simple().to_string();
        let base = tmp_root.join(format!("{prefix}-{id}"));

        // create_dir (not create_dir_all) so an existing directory is never reused.
        fs::create_dir(&base).map_err(|e| BackendError::Layout {
            context: format!("failed to create base directory: {}", base.display()),
            source: e,
        })?;

        let layout = Self {
            upper: base.join("upper"),
            work: base.join("work"),
            merged: base.join("merged"),
            base,
        };

        for dir in [&layout.base, &layout.upper, &layout.work, &layout.merged] {
            create_private_dir(dir)?;
        }

        debug!(base = %layout.base.display(), "Overlay layout prepared");
        Ok(layout)
    }

    /// Path of the generated setup script.
    #[must_use]
    pub fn script_path(&self) -> PathBuf {
        self.base.join("setup.sh")
    }

    /// Path of the marker written after a successful fuse-overlayfs mount.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.base.join("overlay.ready")
    }

    /// Returns true if the base directory still exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.base.exists()
    }

    /// Whether an overlay is currently mounted on `merged`.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        is_overlay_mount(&self.merged)
    }

    /// Lazily unmounts `merged` and removes the base directory.
    ///
    /// Never fails and is safe to call repeatedly: the mount may never have
    /// happened and the directory may already be gone.
    pub fn cleanup(&self) {
        if let Err(e) = lazy_unmount(&self.merged) {
            if self.is_mounted() {
                warn!(merged = %self.merged.display(), error = %e, "Overlay still mounted after unmount");
            } else {
                trace!(error = %e, "Nothing to unmount");
            }
        }

        match fs::remove_dir_all(&self.base) {
            Ok(()) => debug!(base = %self.base.display(), "Overlay layout removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(base = %self.base.display(), error = %e, "Failed to remove overlay layout"),
        }
    }
}

impl Drop for OverlayLayout {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn create_private_dir(dir: &Path) -> Result<(), BackendError> {
    if !dir.exists() {
        fs::create_dir(dir).map_err(|e| BackendError::Layout {
            context: format!("failed to create directory: {}", dir.display()),
            source: e,
        })?;
    }

    fs::set_permissions(dir, fs::Permissions::from_mode(DIR_PERMISSIONS)).map_err(|e| {
        BackendError::Layout {
            context: format!("failed to set permissions on: {}", dir.display()),
            source: e,
        }
    })
}

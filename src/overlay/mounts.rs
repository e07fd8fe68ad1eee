//! Kernel overlay mount and unmount.
//!
//! # OverlayFS Requirements
//!
//! - Mounting on the host requires CAP_SYS_ADMIN
//! - Work directory must be on same filesystem as upper directory
//! - Work directory must be empty before mount
//! - Recent kernels refuse layers that overlap (e.g. upper inside lower)

use std::fs;
use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use tracing::{debug, instrument, trace};

use crate::error::MountError;

/// Builds the overlay mount option string.
#[must_use]
pub fn overlay_options(lower: &Path, upper: &Path, work: &Path) -> String {
    format!(
        "lowerdir={},upperdir={},workdir={}",
        lower.display(),
        upper.display(),
        work.display()
    )
}

/// Mounts OverlayFS combining a read-only lower layer and a writable upper layer.
///
/// # Errors
///
/// Returns `MountError::OverlayMount` if a layer path cannot be expressed as
/// a mount option or the mount syscall fails.
#[instrument(skip_all, fields(lower = %lower.display(), merged = %merged.display()))]
pub fn mount_overlay(
    lower: &Path,
    upper: &Path,
    work: &Path,
    merged: &Path,
) -> Result<(), MountError> {
    debug!("Mounting OverlayFS");

    for layer in [lower, upper, work] {
        let text = layer.to_string_lossy();
        if text.contains(',') || text.contains(':') {
            return Err(MountError::OverlayMount(format!(
                "layer path cannot contain ',' or ':': {text}"
            )));
        }
    }

    let options = overlay_options(lower, upper, work);
    trace!(options = %options, "OverlayFS mount options");

    mount(
        Some("overlay"),
        merged,
        Some("overlay"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        Some(options.as_str()),
    )
    .map_err(|e| MountError::OverlayMount(format!("mount failed: {e}")))?;

    debug!("OverlayFS mounted successfully");
    Ok(())
}

/// Detaches a mount (`MNT_DETACH`), so busy mounts are released once idle.
///
/// # Errors
///
/// Returns `MountError::Unmount` if the target is not a mount point or the
/// caller lacks privilege.
pub fn lazy_unmount(target: &Path) -> Result<(), MountError> {
    umount2(target, MntFlags::MNT_DETACH)
        .map_err(|e| MountError::Unmount(format!("{}: {e}", target.display())))
}

/// Checks /proc/mounts for an overlay mounted at `path`.
#[must_use]
pub(crate) fn is_overlay_mount(path: &Path) -> bool {
    let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
        return false;
    };

    let path_str = path.to_string_lossy();

    mounts.lines().any(|line| {
        let mut fields = line.split_whitespace();
        // Format: device mount_point fs_type options...
        let _device = fields.next();
        matches!(
            (fields.next(), fields.next()),
            (Some(mount_point), Some("overlay")) if mount_point == path_str
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_overlay_options() {
        let options = overlay_options(
            &PathBuf::from("/"),
            &PathBuf::from("/tmp/x/upper"),
            &PathBuf::from("/tmp/x/work"),
        );
        assert_eq!(options, "lowerdir=/,upperdir=/tmp/x/upper,workdir=/tmp/x/work");
    }

    #[test]
    fn test_mount_overlay_rejects_separator_in_path() {
        let result = mount_overlay(
            &PathBuf::from("/lower,upperdir=/etc"),
            &PathBuf::from("/tmp/upper"),
            &PathBuf::from("/tmp/work"),
            &PathBuf::from("/tmp/merged"),
        );
        assert!(matches!(result, Err(MountError::OverlayMount(_))));
    }

    #[test]
    fn test_lazy_unmount_of_plain_directory_fails() {
        let dir = tempfile::TempDir::new().expect("failed to create temp dir");
        assert!(lazy_unmount(dir.path()).is_err());
    }

    #[test]
    fn test_plain_directory_is_not_overlay_mount() {
        let dir = tempfile::TempDir::new().expect("failed to create temp dir");
        assert!(!is_overlay_mount(dir.path()));
    }
}

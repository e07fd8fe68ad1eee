//! Host capability probing.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, instrument, trace};

/// Sysctl that gates unprivileged user namespace creation on Debian-derived kernels.
pub const USERNS_SYSCTL: &str = "/proc/sys/kernel/unprivileged_userns_clone";

/// What the host can plausibly do, as seen by [`probe`].
///
/// These are hints, not guarantees: a backend that looked usable here may
/// still fail at run time, in which case the orchestrator falls through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `bwrap` was found on `PATH`.
    pub bwrap: bool,
    /// Unprivileged user namespaces look enabled.
    pub user_namespaces: bool,
    /// `fuse-overlayfs` was found on `PATH`.
    pub fuse_overlayfs: bool,
    /// The current process runs with an effective uid of 0.
    pub privileged: bool,
}

impl Capabilities {
    /// Capabilities of a host where nothing but direct execution works.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Human-readable status lines for `nsbox probe`.
    #[must_use]
    pub fn status_lines(&self) -> Vec<String> {
        fn line(name: &str, ok: bool) -> String {
            if ok {
                format!("  {name:<16} available        ok")
            } else {
                format!("  {name:<16} not available    --")
            }
        }

        vec![
            line("bwrap:", self.bwrap),
            line("user namespaces:", self.user_namespaces),
            line("fuse-overlayfs:", self.fuse_overlayfs),
            line("root:", self.privileged),
        ]
    }
}

/// Probe the host for sandbox capabilities.
///
/// Never fails: any subprocess or read error counts as "unavailable".
#[instrument]
pub async fn probe() -> Capabilities {
    let (bwrap, fuse_overlayfs) = tokio::join!(
        command_available("bwrap"),
        command_available("fuse-overlayfs")
    );

    let caps = Capabilities {
        bwrap,
        user_namespaces: check_user_namespaces(),
        fuse_overlayfs,
        privileged: is_privileged(),
    };

    debug!(?caps, "Probed host capabilities");
    caps
}

/// Returns true if `which <program>` exits successfully.
pub async fn command_available(program: &str) -> bool {
    let status = Command::new("which")
        .arg(program)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match status {
        Ok(status) => {
            trace!(program, success = status.success(), "which finished");
            status.success()
        }
        Err(e) => {
            trace!(program, error = %e, "which could not be run");
            false
        }
    }
}

/// Check whether unprivileged user namespaces are enabled.
///
/// Reads [`USERNS_SYSCTL`]. A missing file is reported as supported without
/// attempting to create a namespace; distributions without the sysctl
/// usually allow user namespaces, but hardened kernels may not.
#[must_use]
pub fn check_user_namespaces() -> bool {
    user_namespaces_from_sysctl(Path::new(USERNS_SYSCTL))
}

/// Interpret a userns sysctl file. Content `1` means enabled.
#[must_use]
pub fn user_namespaces_from_sysctl(path: &Path) -> bool {
    match fs::read_to_string(path) {
        Ok(content) => content.trim() == "1",
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!(path = %path.display(), "userns sysctl absent, assuming enabled");
            true
        }
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to read userns sysctl");
            false
        }
    }
}

/// Returns true when running with an effective uid of 0.
#[must_use]
pub fn is_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sysctl_enabled() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("unprivileged_userns_clone");
        fs::write(&path, "1\n").expect("failed to write sysctl");
        assert!(user_namespaces_from_sysctl(&path));
    }

    #[test]
    fn test_sysctl_disabled() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("unprivileged_userns_clone");
        fs::write(&path, "0\n").expect("failed to write sysctl");
        assert!(!user_namespaces_from_sysctl(&path));
    }

    #[test]
    fn test_sysctl_missing_is_optimistic() {
        let dir = TempDir::new().expect("failed to create temp dir");
        assert!(user_namespaces_from_sysctl(&dir.path().join("missing")));
    }

    #[test]
    fn test_sysctl_unreadable_is_unavailable() {
        // A directory cannot be read as a string.
        let dir = TempDir::new().expect("failed to create temp dir");
        assert!(!user_namespaces_from_sysctl(dir.path()));
    }

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        assert!(!command_available("nsbox-definitely-not-a-real-program").await);
    }

    #[tokio::test]
    async fn test_probe_runs() {
        let caps = probe().await;
        assert_eq!(caps.privileged, is_privileged());
    }

    #[test]
    fn test_status_lines() {
        let lines = Capabilities::none().status_lines();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.ends_with("--")));
    }
}

//! Privileged isolation: a host-mounted kernel overlay entered with `unshare --root`.

use tracing::{debug, instrument};

use super::{
    BackendKind, BuiltCommand, IsolationBackend, ProcessOutput, path_arg, require_layout,
    wrapper_failure,
};
use crate::error::BackendError;
use crate::overlay::{OverlayLayout, mount_overlay};
use crate::sandbox::SandboxConfig;

/// `unshare` backend over a kernel overlayfs. Requires CAP_SYS_ADMIN.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivilegedUnshare;

impl IsolationBackend for PrivilegedUnshare {
    fn kind(&self) -> BackendKind {
        BackendKind::PrivilegedUnshare
    }

    fn uses_overlay(&self) -> bool {
        true
    }

    /// Mounts the overlay on the host. A failed mount ends this attempt.
    #[instrument(skip_all)]
    fn prepare(
        &self,
        config: &SandboxConfig,
        layout: Option<&OverlayLayout>,
    ) -> Result<(), BackendError> {
        let layout = require_layout(self.kind(), layout)?;
        mount_overlay(&config.rootfs, &layout.upper, &layout.work, &layout.merged)?;
        debug!(merged = %layout.merged.display(), "Overlay ready for unshare");
        Ok(())
    }

    fn build(
        &self,
        config: &SandboxConfig,
        layout: Option<&OverlayLayout>,
    ) -> Result<BuiltCommand, BackendError> {
        let layout = require_layout(self.kind(), layout)?;
        Ok(BuiltCommand {
            argv: unshare_args(config, layout),
            env: config.effective_env(),
            cwd: None,
        })
    }

    fn collects_files(&self, _layout: Option<&OverlayLayout>) -> bool {
        true
    }

    fn setup_failure(&self, output: &ProcessOutput) -> Option<String> {
        wrapper_failure(output, &["unshare: "])
    }
}

/// Builds the `unshare` argv that enters `layout.merged` as root.
///
/// The network namespace is always unshared here.
#[must_use]
pub fn unshare_args(config: &SandboxConfig, layout: &OverlayLayout) -> Vec<String> {
    let mut args: Vec<String> = [
        "unshare",
        "--user",
        "--map-root-user",
        "--mount",
        "--net",
        "--pid",
        "--fork",
        "--uts",
        "--ipc",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    args.push(format!("--root={}", path_arg(&layout.merged)));
    args.push(format!("--wd={}", path_arg(&config.workdir)));
    args.push("--".into());
    args.extend(config.command.iter().cloned());
    args
}

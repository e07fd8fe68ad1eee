//! Last resort: run the command directly on the host.

use super::{BackendKind, BuiltCommand, IsolationBackend};
use crate::error::BackendError;
use crate::overlay::OverlayLayout;
use crate::sandbox::SandboxConfig;

/// Runs the command with no namespaces and no overlay.
///
/// Only the environment is controlled. The workdir is used as the host
/// working directory when it exists there; otherwise the current directory
/// is inherited.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIsolation;

impl IsolationBackend for NoIsolation {
    fn kind(&self) -> BackendKind {
        BackendKind::NoIsolation
    }

    fn uses_overlay(&self) -> bool {
        false
    }

    fn build(
        &self,
        config: &SandboxConfig,
        _layout: Option<&OverlayLayout>,
    ) -> Result<BuiltCommand, BackendError> {
        let cwd = config
            .workdir
            .is_dir()
            .then(|| config.workdir.clone());

        Ok(BuiltCommand {
            argv: config.command.clone(),
            env: config.effective_env(),
            cwd,
        })
    }

    fn collects_files(&self, _layout: Option<&OverlayLayout>) -> bool {
        false
    }
}

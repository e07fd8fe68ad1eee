//! Outcome of a sandboxed run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::backend::BackendKind;
use super::runner::ProcessOutput;

/// What happened when the command ran.
///
/// Owned by the caller; nothing in it refers back to the run's temporary
/// directories, which are gone by the time this is returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    /// Exit code. `None` means the process was not observed to exit
    /// normally (it could not start, or a signal killed it). Never
    /// treat `None` as success.
    pub exit_code: Option<i32>,

    /// Terminating signal, when the process was killed.
    pub signal: Option<i32>,

    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,

    /// Files written inside the sandbox, relative to the sandbox root.
    /// Empty when the backend cannot observe writes.
    pub modified_files: Vec<PathBuf>,

    /// The backend that actually ran the command.
    pub backend: BackendKind,

    /// Reasons earlier backends were skipped, and a warning when the command
    /// ran without isolation.
    pub warnings: Vec<String>,
}

impl SandboxResult {
    pub(crate) fn from_output(output: ProcessOutput, backend: BackendKind) -> Self {
        Self {
            exit_code: output.exit_code,
            signal: output.signal,
            stdout: output.stdout,
            stderr: output.stderr,
            modified_files: Vec::new(),
            backend,
            warnings: Vec::new(),
        }
    }

    /// Result for a process that could not be started at all.
    pub(crate) fn not_started(backend: BackendKind, reason: String) -> Self {
        Self {
            exit_code: None,
            signal: None,
            stdout: String::new(),
            stderr: reason,
            modified_files: Vec::new(),
            backend,
            warnings: Vec::new(),
        }
    }

    /// Returns `true` if the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Returns `false` if the command ran directly on the host.
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.backend.is_isolated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_requires_zero_exit() {
        let mut result = SandboxResult::not_started(BackendKind::NoIsolation, String::new());
        assert!(!result.success());

        result.exit_code = Some(1);
        assert!(!result.success());

        result.exit_code = Some(0);
        assert!(result.success());
    }

    #[test]
    fn test_isolation_follows_backend() {
        let direct = SandboxResult::not_started(BackendKind::NoIsolation, String::new());
        assert!(!direct.is_isolated());

        let bwrap = SandboxResult::not_started(BackendKind::Bubblewrap, String::new());
        assert!(bwrap.is_isolated());
    }

    #[test]
    fn test_json_shape() {
        let result = SandboxResult::not_started(BackendKind::UnshareScript, "boom".to_string());
        let json = serde_json::to_value(&result).expect("serialize");
        assert_eq!(json["exit_code"], serde_json::Value::Null);
        assert_eq!(json["backend"], "unshare-script");
        assert_eq!(json["stderr"], "boom");
    }
}

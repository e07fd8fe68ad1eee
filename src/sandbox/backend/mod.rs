//! Isolation backends.
//!
//! Each backend turns a [`SandboxConfig`] (plus, for some, an
//! [`OverlayLayout`]) into the argv and environment that actually run the
//! command. They differ in what they need from the host and in what they can
//! observe afterwards:
//!
//! | Backend              | Needs                 | Sees writes          |
//! |----------------------|-----------------------|----------------------|
//! | `PrivilegedUnshare`  | root (CAP_SYS_ADMIN)  | yes                  |
//! | `Bubblewrap`         | `bwrap` on PATH       | no (ephemeral tmpfs) |
//! | `UnshareScript`      | unprivileged userns   | only with fuse-overlayfs |
//! | `NoIsolation`        | nothing               | no                   |

mod bubblewrap;
mod direct;
mod privileged;
mod script;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use bubblewrap::{Bubblewrap, bwrap_args};
pub use direct::NoIsolation;
pub use privileged::{PrivilegedUnshare, unshare_args};
pub use script::{SCRIPT_SHELL, SETUP_FAILURE_PREFIX, SETUP_SCRIPT, UnshareScript, script_args};

use super::SandboxConfig;
use super::runner::{ProcessOutput, host_program};
use crate::error::BackendError;
use crate::overlay::OverlayLayout;

/// Identifies a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Host-mounted kernel overlayfs + `unshare --root`.
    PrivilegedUnshare,
    /// `bwrap` with an ephemeral overlay.
    Bubblewrap,
    /// `unshare` running a generated setup script.
    UnshareScript,
    /// Direct execution on the host.
    NoIsolation,
}

impl BackendKind {
    /// All backends, most isolated first.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::PrivilegedUnshare,
        BackendKind::Bubblewrap,
        BackendKind::UnshareScript,
        BackendKind::NoIsolation,
    ];

    /// Stable name used in logs, JSON and the CLI.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrivilegedUnshare => "privileged-unshare",
            Self::Bubblewrap => "bubblewrap",
            Self::UnshareScript => "unshare-script",
            Self::NoIsolation => "no-isolation",
        }
    }

    /// Returns `false` only for [`BackendKind::NoIsolation`].
    #[must_use]
    pub fn is_isolated(self) -> bool {
        self != Self::NoIsolation
    }

    /// The implementation behind this kind.
    #[must_use]
    pub fn backend(self) -> &'static dyn IsolationBackend {
        match self {
            Self::PrivilegedUnshare => &PrivilegedUnshare,
            Self::Bubblewrap => &Bubblewrap,
            Self::UnshareScript => &UnshareScript,
            Self::NoIsolation => &NoIsolation,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "privileged-unshare" | "privileged" => Ok(Self::PrivilegedUnshare),
            "bubblewrap" | "bwrap" => Ok(Self::Bubblewrap),
            "unshare-script" | "unshare" => Ok(Self::UnshareScript),
            "no-isolation" | "none" => Ok(Self::NoIsolation),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Everything needed to spawn the sandboxed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltCommand {
    /// Full argv, wrapper first.
    pub argv: Vec<String>,
    /// Complete environment of the spawned process.
    pub env: BTreeMap<String, String>,
    /// Host working directory for the spawned process, if any.
    pub cwd: Option<PathBuf>,
}

impl BuiltCommand {
    /// Replaces the wrapper in `argv[0]` with its absolute host path.
    ///
    /// The spawned process gets the sandbox environment, whose `PATH` is
    /// meant for inside the sandbox and may not contain the wrapper. Left
    /// unchanged if the wrapper is not installed.
    pub fn resolve_wrapper(&mut self) {
        let Some(program) = self.argv.first_mut() else {
            return;
        };
        if let Some(path) = host_program(program) {
            *program = path_arg(&path);
        }
    }
}

/// One way of running a command with some degree of isolation.
pub trait IsolationBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Whether [`build`](Self::build) needs a per-run overlay layout.
    fn uses_overlay(&self) -> bool;

    /// Side effects that must happen before spawn (e.g. mounting).
    ///
    /// # Errors
    ///
    /// Any error here aborts this backend attempt.
    fn prepare(
        &self,
        _config: &SandboxConfig,
        _layout: Option<&OverlayLayout>,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    /// Builds the argv and environment. No side effects.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::MissingLayout` if the backend needs a layout
    /// and none was given.
    fn build(
        &self,
        config: &SandboxConfig,
        layout: Option<&OverlayLayout>,
    ) -> Result<BuiltCommand, BackendError>;

    /// Whether the upper layer reflects the command's writes after exit.
    fn collects_files(&self, layout: Option<&OverlayLayout>) -> bool;

    /// Recognizes output produced by the wrapper failing its own setup,
    /// as opposed to the sandboxed command's result.
    fn setup_failure(&self, _output: &ProcessOutput) -> Option<String> {
        None
    }
}

fn require_layout<'a>(
    kind: BackendKind,
    layout: Option<&'a OverlayLayout>,
) -> Result<&'a OverlayLayout, BackendError> {
    layout.ok_or_else(|| BackendError::MissingLayout {
        backend: kind.to_string(),
    })
}

/// A wrapper tool that fails before exec reports exit code 1 and prefixes
/// its diagnostics with its own name.
fn wrapper_failure(output: &ProcessOutput, prefixes: &[&str]) -> Option<String> {
    if output.exit_code != Some(1) {
        return None;
    }
    prefixes
        .iter()
        .any(|prefix| output.stderr.starts_with(prefix))
        .then(|| output.stderr.lines().next().unwrap_or_default().to_string())
}

fn path_arg(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

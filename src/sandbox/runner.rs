//! Process spawning and output capture.
//!
//! stdout and stderr are drained concurrently with waiting for exit, so a
//! child that fills a pipe can never deadlock against us.

use std::collections::BTreeMap;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, instrument, trace};

use super::config::DEFAULT_ENV;
use crate::error::BackendError;

/// Raw outcome of a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, or `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Terminating signal, if any.
    pub signal: Option<i32>,
    /// Captured standard output (lossily decoded).
    pub stdout: String,
    /// Captured standard error (lossily decoded).
    pub stderr: String,
}

impl ProcessOutput {
    /// Returns `true` if the process exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Finds `program` on the host, independent of any sandbox environment.
///
/// Searches this process's `PATH` first, then the default sandbox `PATH`,
/// so a wrapper is still found when nsbox itself runs with a sparse
/// environment. Absolute paths are returned as-is if they exist.
#[must_use]
pub fn host_program(program: &str) -> Option<PathBuf> {
    which::which(program)
        .or_else(|_| which::which_in(program, Some(default_path()), "/"))
        .ok()
}

fn default_path() -> &'static str {
    DEFAULT_ENV
        .iter()
        .find(|(key, _)| *key == "PATH")
        .map_or("/usr/bin:/bin", |&(_, value)| value)
}

/// Spawns `argv` with exactly `env` as its environment and collects its output.
///
/// The child gets `/dev/null` as stdin and is killed if the returned future
/// is dropped.
///
/// # Errors
///
/// Returns `BackendError::Spawn` if the program cannot be started or waited on.
#[instrument(skip_all, fields(program = %argv.first().map(String::as_str).unwrap_or("")))]
pub async fn spawn(
    argv: &[String],
    env: &BTreeMap<String, String>,
    cwd: Option<&Path>,
) -> Result<ProcessOutput, BackendError> {
    let (program, args) = argv.split_first().ok_or_else(|| BackendError::Spawn {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    trace!(?args, "Spawning child process");
    let output = cmd.output().await.map_err(|e| BackendError::Spawn {
        program: program.clone(),
        source: e,
    })?;

    let result = ProcessOutput {
        exit_code: output.status.code(),
        signal: output.status.signal(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    debug!(exit_code = ?result.exit_code, signal = ?result.signal, "Process finished");
    Ok(result)
}

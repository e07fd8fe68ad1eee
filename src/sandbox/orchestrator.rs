//! Backend selection and the fallback chain.

use std::error::Error as StdError;
use std::path::PathBuf;

use tokio::task;
use tracing::{debug, info, instrument, warn};

use super::backend::BackendKind;
use super::config::SandboxConfig;
use super::result::SandboxResult;
use super::runner;
use crate::error::{BackendError, Result};
use crate::overlay::{OverlayLayout, collect_modified_files};
use crate::system::{Capabilities, probe};

/// Warning attached to every result produced by [`BackendKind::NoIsolation`].
pub const NO_ISOLATION_WARNING: &str =
    "command ran directly on the host without any isolation";

/// Default prefix for per-run temp directories.
pub const DEFAULT_PREFIX: &str = "nsbox";

/// Orchestrator-level settings shared by every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOptions {
    /// Directory under which per-run overlay directories are created.
    pub tmp_root: PathBuf,
    /// Name prefix of per-run directories.
    pub prefix: String,
    /// Try the privileged backend first when running as root.
    pub allow_privileged: bool,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            tmp_root: std::env::temp_dir(),
            prefix: DEFAULT_PREFIX.to_string(),
            allow_privileged: false,
        }
    }
}

impl SandboxOptions {
    /// Sets the temp root.
    #[must_use]
    pub fn with_tmp_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_root = path.into();
        self
    }

    /// Sets the directory name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Enables or disables the privileged backend.
    #[must_use]
    pub fn with_allow_privileged(mut self, allow: bool) -> Self {
        self.allow_privileged = allow;
        self
    }
}

/// Orders the backends to try for a host with `caps`.
///
/// Pure: the same inputs always give the same plan. The last entry is
/// always [`BackendKind::NoIsolation`].
#[must_use]
pub fn plan(caps: &Capabilities, options: &SandboxOptions) -> Vec<BackendKind> {
    let mut chain = Vec::with_capacity(BackendKind::ALL.len());
    if options.allow_privileged && caps.privileged {
        chain.push(BackendKind::PrivilegedUnshare);
    }
    if caps.bwrap {
        chain.push(BackendKind::Bubblewrap);
    }
    if caps.user_namespaces {
        chain.push(BackendKind::UnshareScript);
    }
    chain.push(BackendKind::NoIsolation);
    chain
}

/// Runs commands through the fallback chain.
///
/// Holds no per-run state; concurrent runs on one `Sandbox` are independent.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    options: SandboxOptions,
}

impl Sandbox {
    /// Creates a sandbox with the given options.
    #[must_use]
    pub fn new(options: SandboxOptions) -> Self {
        Self { options }
    }

    /// The options this sandbox was created with.
    #[must_use]
    pub fn options(&self) -> &SandboxOptions {
        &self.options
    }

    /// Probes the host and runs `config` on the best backend that works.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned, and always before anything
    /// is created on disk. Backend failures fall through to the next backend
    /// and end up in [`SandboxResult::warnings`].
    #[instrument(skip_all, fields(program = %config.command.first().map(String::as_str).unwrap_or("")))]
    pub async fn run(&self, config: &SandboxConfig) -> Result<SandboxResult> {
        config.validate()?;
        let caps = probe().await;
        Ok(self.run_chain(config, &caps).await)
    }

    /// Like [`run`](Self::run), with capabilities supplied by the caller.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` is invalid.
    pub async fn run_with_capabilities(
        &self,
        config: &SandboxConfig,
        caps: &Capabilities,
    ) -> Result<SandboxResult> {
        config.validate()?;
        Ok(self.run_chain(config, caps).await)
    }

    /// The fallback chain proper. `config` must already be validated.
    async fn run_chain(&self, config: &SandboxConfig, caps: &Capabilities) -> SandboxResult {
        let chain = plan(caps, &self.options);
        debug!(?chain, "Planned backends");

        let mut warnings = Vec::new();
        for kind in chain.into_iter().filter(|k| k.is_isolated()) {
            match self.attempt(kind, config).await {
                Ok(mut result) => {
                    info!(backend = %kind, exit_code = ?result.exit_code, "Sandboxed command finished");
                    result.warnings = warnings;
                    return result;
                }
                Err(e) => {
                    let reason = describe(&e);
                    warn!(backend = %kind, error = %reason, "Backend failed, falling through");
                    warnings.push(format!("{kind}: {reason}"));
                }
            }
        }

        self.run_unisolated(config, warnings).await
    }

    /// Runs `config` on exactly one backend, without fallback.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid config and `Error::Backend` if
    /// the backend cannot run the command.
    #[instrument(skip_all, fields(backend = %kind))]
    pub async fn run_backend(
        &self,
        kind: BackendKind,
        config: &SandboxConfig,
    ) -> Result<SandboxResult> {
        config.validate()?;
        let mut result = self.attempt(kind, config).await?;
        if !kind.is_isolated() {
            warn!("{NO_ISOLATION_WARNING}");
            result.warnings.push(NO_ISOLATION_WARNING.to_string());
        }
        Ok(result)
    }

    /// Terminal step of the chain. Never fails: a command that cannot be
    /// started is reported with no exit code and the reason on stderr.
    async fn run_unisolated(
        &self,
        config: &SandboxConfig,
        mut warnings: Vec<String>,
    ) -> SandboxResult {
        let kind = BackendKind::NoIsolation;
        warn!("{NO_ISOLATION_WARNING}");
        warnings.push(NO_ISOLATION_WARNING.to_string());

        let mut result = match self.attempt(kind, config).await {
            Ok(result) => result,
            Err(e) => {
                let reason = describe(&e);
                warn!(error = %reason, "Command could not be started");
                SandboxResult::not_started(kind, reason)
            }
        };
        result.warnings = warnings;
        result
    }

    /// One backend attempt. The layout, if any, is unmounted and removed
    /// before this returns, whatever the outcome.
    #[instrument(skip_all, fields(backend = %kind))]
    async fn attempt(
        &self,
        kind: BackendKind,
        config: &SandboxConfig,
    ) -> std::result::Result<SandboxResult, BackendError> {
        let layout = if kind.backend().uses_overlay() {
            let tmp_root = self.options.tmp_root.clone();
            let prefix = self.options.prefix.clone();
            Some(task::spawn_blocking(move || OverlayLayout::prepare(&tmp_root, &prefix)).await??)
        } else {
            None
        };

        let outcome = execute(kind, config, layout.as_ref()).await;
        if let Some(layout) = layout {
            release(layout).await;
        }
        outcome
    }
}

/// Prepares, builds and spawns one backend inside an existing layout.
async fn execute(
    kind: BackendKind,
    config: &SandboxConfig,
    layout: Option<&OverlayLayout>,
) -> std::result::Result<SandboxResult, BackendError> {
    let backend = kind.backend();

    backend.prepare(config, layout)?;
    let mut built = backend.build(config, layout)?;
    if kind.is_isolated() {
        built.resolve_wrapper();
    }
    let output = runner::spawn(&built.argv, &built.env, built.cwd.as_deref()).await?;

    if let Some(message) = backend.setup_failure(&output) {
        return Err(BackendError::Setup {
            backend: kind.to_string(),
            message,
        });
    }

    let mut result = SandboxResult::from_output(output, kind);
    if let Some(layout) = layout.filter(|l| backend.collects_files(Some(*l))) {
        let upper = layout.upper.clone();
        // The command already ran; a failed walk only loses the file list.
        result.modified_files = task::spawn_blocking(move || collect_modified_files(&upper))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Modified-file collection failed");
                Vec::new()
            });
        debug!(count = result.modified_files.len(), "Collected modified files");
    }
    Ok(result)
}

/// Drops the layout on the blocking pool; removing a large upper layer
/// can take a while.
async fn release(layout: OverlayLayout) {
    if let Err(e) = task::spawn_blocking(move || drop(layout)).await {
        warn!(error = %e, "Overlay cleanup task failed");
    }
}

/// Runs `config` with default options.
///
/// # Errors
///
/// Returns `Error::Config` if `config` is invalid.
pub async fn run_sandboxed(config: &SandboxConfig) -> Result<SandboxResult> {
    Sandbox::default().run(config).await
}

/// Formats an error with its chain of sources.
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

//! Error types for nsbox.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//!
//! Only configuration errors ever reach a caller of the fallback chain. Backend
//! errors are recovered by falling through to the next backend, probe failures
//! degrade to "unavailable", and cleanup failures are logged and dropped.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the crate.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The sandbox configuration was rejected before anything touched the disk.
    #[error("Invalid sandbox configuration")]
    #[diagnostic(code(nsbox::config))]
    Config(#[from] ConfigError),

    /// A single backend attempt failed (only surfaced by explicit backend runs).
    #[error("Sandbox backend failed")]
    #[diagnostic(code(nsbox::backend))]
    Backend(#[from] BackendError),

    /// I/O error
    #[error("I/O error: {0}")]
    #[diagnostic(code(nsbox::io))]
    Io(#[from] std::io::Error),
}

/// Errors raised while validating a [`SandboxConfig`](crate::SandboxConfig).
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// No command was given.
    #[error("command cannot be empty")]
    #[diagnostic(
        code(nsbox::config::empty_command),
        help("Pass the program and its arguments, e.g. [\"sh\", \"-c\", \"echo hi\"]")
    )]
    EmptyCommand,

    /// The program name (argv[0]) is an empty string.
    #[error("program name cannot be empty")]
    #[diagnostic(code(nsbox::config::empty_program))]
    EmptyProgram,

    /// The root filesystem cannot be read.
    #[error("root filesystem is not readable: {}", path.display())]
    #[diagnostic(
        code(nsbox::config::rootfs_unreadable),
        help("The rootfs must be an existing directory the current user can list")
    )]
    RootfsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rootfs path cannot be used as an overlay lower layer.
    #[error("root filesystem path cannot contain ',' or ':': {}", path.display())]
    #[diagnostic(
        code(nsbox::config::rootfs_separator),
        help("Overlay mount options use ',' and ':' as separators; move or symlink the rootfs")
    )]
    RootfsOptionSeparator { path: PathBuf },

    /// The root filesystem exists but is not a directory.
    #[error("root filesystem is not a directory: {}", path.display())]
    #[diagnostic(code(nsbox::config::rootfs_not_directory))]
    RootfsNotDirectory { path: PathBuf },

    /// The working directory is relative.
    #[error("working directory must be absolute: {}", path.display())]
    #[diagnostic(code(nsbox::config::relative_workdir))]
    RelativeWorkdir { path: PathBuf },

    /// A bind mount source or target is relative.
    #[error("bind mount paths must be absolute: {}", path.display())]
    #[diagnostic(code(nsbox::config::relative_bind))]
    RelativeBind { path: PathBuf },

    /// The hostname is empty or contains characters the kernel rejects.
    #[error("invalid hostname: {hostname:?}")]
    #[diagnostic(
        code(nsbox::config::hostname),
        help("Use 1-64 bytes with no NUL")
    )]
    InvalidHostname { hostname: String },
}

/// Errors related to mounting and unmounting the overlay.
#[derive(Error, Debug, Diagnostic)]
pub enum MountError {
    /// Failed to mount the kernel overlay filesystem.
    #[error("OverlayFS mount failed: {0}")]
    #[diagnostic(
        code(nsbox::mount::overlay),
        help("Mounting a kernel overlay on the host requires CAP_SYS_ADMIN")
    )]
    OverlayMount(String),

    /// Failed to unmount a filesystem.
    #[error("Unmount failed: {0}")]
    #[diagnostic(code(nsbox::mount::unmount))]
    Unmount(String),
}

/// Errors from a single isolation backend attempt.
///
/// The orchestrator treats every variant the same way: log it and move on to
/// the next backend in the plan.
#[derive(Error, Debug, Diagnostic)]
pub enum BackendError {
    /// The per-run overlay directories could not be created.
    #[error("failed to prepare overlay layout: {context}")]
    #[diagnostic(code(nsbox::backend::layout))]
    Layout {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A backend that needs an overlay layout was built without one.
    #[error("{backend} requires an overlay layout")]
    #[diagnostic(code(nsbox::backend::no_layout))]
    MissingLayout { backend: String },

    /// Mounting failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Mount(#[from] MountError),

    /// The wrapper program could not be started.
    #[error("failed to spawn {program}")]
    #[diagnostic(code(nsbox::backend::spawn))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The wrapper started but failed to build the sandbox.
    #[error("{backend} setup failed: {message}")]
    #[diagnostic(code(nsbox::backend::setup))]
    Setup { backend: String, message: String },

    /// A blocking filesystem task panicked or was cancelled.
    #[error("blocking filesystem task failed")]
    #[diagnostic(code(nsbox::backend::task))]
    Task(#[from] tokio::task::JoinError),

    /// The generated setup script could not be written.
    #[error("failed to write setup script: {}", path.display())]
    #[diagnostic(code(nsbox::backend::script))]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

//! Running commands inside Linux namespaces.
//!
//! A [`Sandbox`] probes the host, orders the available isolation backends
//! with [`plan`], and tries them in turn until one runs the command. The
//! last resort runs the command directly on the host, so a run only fails
//! on an invalid [`SandboxConfig`]. Check [`SandboxResult::is_isolated`]
//! when isolation is a hard requirement, or use [`Sandbox::run_backend`].
//!
//! # Example
//!
//! ```no_run
//! use nsbox::sandbox::{Sandbox, SandboxConfig, SandboxOptions};
//!
//! # async fn example() -> nsbox::Result<()> {
//! let sandbox = Sandbox::new(SandboxOptions::default());
//! let config = SandboxConfig::new(["sh", "-c", "echo hi > out.txt"]).with_workdir("/tmp");
//!
//! let result = sandbox.run(&config).await?;
//! assert!(result.success());
//! println!("ran on {}: {:?}", result.backend, result.modified_files);
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod config;
mod orchestrator;
mod result;
pub mod runner;

pub use backend::{BackendKind, BuiltCommand, IsolationBackend};
pub use config::{BindMount, DEFAULT_ENV, DEFAULT_GID, DEFAULT_UID, SandboxConfig};
pub use orchestrator::{
    DEFAULT_PREFIX, NO_ISOLATION_WARNING, Sandbox, SandboxOptions, plan, run_sandboxed,
};
pub use result::SandboxResult;
pub use runner::ProcessOutput;

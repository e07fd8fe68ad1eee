//! nsbox - run untrusted commands in Linux namespaces over an overlay filesystem.
//!
//! The sandboxed process sees a controlled root filesystem and private
//! user, mount, pid, uts, ipc and (optionally) network namespaces. Isolation
//! is provided by whichever backend the host supports, tried in order:
//!
//! 1. `unshare --root` over a kernel overlayfs (root only, opt-in)
//! 2. `bwrap` with an ephemeral overlay
//! 3. `unshare` with a generated setup script (optionally `fuse-overlayfs`)
//! 4. direct execution, flagged in the result as unisolated
//!
//! # Example
//!
//! ```no_run
//! use nsbox::{SandboxConfig, run_sandboxed};
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let config = SandboxConfig::new(["true"]);
//!     let result = run_sandboxed(&config).await?;
//!
//!     if !result.is_isolated() {
//!         eprintln!("warning: {:?}", result.warnings);
//!     }
//!     std::process::exit(result.exit_code.unwrap_or(125));
//! }
//! ```

pub mod error;
pub mod overlay;
pub mod sandbox;
pub mod system;

// Re-export commonly used types
pub use error::{Error, Result};
pub use sandbox::{
    BackendKind, BindMount, Sandbox, SandboxConfig, SandboxOptions, SandboxResult, run_sandboxed,
};
pub use system::Capabilities;

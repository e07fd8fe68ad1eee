//! Ephemeral overlay filesystem for a single sandbox run.
//!
//! Each run gets its own directory triad:
//! - **Upper layer**: where the sandboxed process's writes land
//! - **Work directory**: internal directory required by OverlayFS
//! - **Merged directory**: the unified view used as the sandbox root
//!
//! The lower layer is the caller's rootfs and is never modified.

mod collect;
mod layout;
mod mounts;

pub use collect::collect_modified_files;
pub use layout::OverlayLayout;
pub use mounts::{lazy_unmount, mount_overlay, overlay_options};

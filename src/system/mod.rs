//! Host capability detection.
//!
//! This module answers "which isolation backends could work here?" without
//! ever failing: missing tools and unreadable kernel knobs simply report
//! the capability as unavailable.

mod probe;

pub use probe::{
    Capabilities, USERNS_SYSCTL, check_user_namespaces, command_available, is_privileged, probe,
    user_namespaces_from_sysctl,
};

//! Configuration for sandboxed runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default uid inside the sandbox.
pub const DEFAULT_UID: u32 = 1000;

/// Default gid inside the sandbox.
pub const DEFAULT_GID: u32 = 1000;

/// Default PATH, HOME and TERM. Entries in [`SandboxConfig::env`] win.
pub const DEFAULT_ENV: &[(&str, &str)] = &[
    (
        "PATH",
        "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
    ),
    ("HOME", "/tmp"),
    ("TERM", "xterm"),
];

/// A host path made visible inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Path on the host.
    pub source: PathBuf,
    /// Path inside the sandbox.
    pub target: PathBuf,
}

impl BindMount {
    /// Binds `source` to `target`.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Binds a host path at the same location inside the sandbox.
    #[must_use]
    pub fn same(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            source: path.clone(),
            target: path,
        }
    }
}

/// What to run and how to confine it.
///
/// A config is read-only once handed to a run.
///
/// # Example
///
/// ```
/// use nsbox::SandboxConfig;
///
/// let config = SandboxConfig::new(["sh", "-c", "echo hi > out.txt"])
///     .with_rootfs("/")
///     .with_workdir("/tmp")
///     .with_env("LANG", "C.UTF-8")
///     .with_hostname("build");
///
/// assert!(config.network_disabled());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Root filesystem presented as `/` (the overlay's lower layer).
    pub rootfs: PathBuf,

    /// Working directory inside the sandbox.
    pub workdir: PathBuf,

    /// Host paths mounted read-only.
    pub readonly_binds: Vec<BindMount>,

    /// Host paths mounted read-write.
    pub writable_binds: Vec<BindMount>,

    /// Environment variables; override [`DEFAULT_ENV`].
    pub env: BTreeMap<String, String>,

    /// Hosts the command may reach. Empty disables networking entirely.
    pub allowed_hosts: Vec<String>,

    /// Program and arguments.
    pub command: Vec<String>,

    /// User id inside the sandbox.
    pub uid: u32,

    /// Group id inside the sandbox.
    pub gid: u32,

    /// Hostname (UTS namespace).
    pub hostname: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            rootfs: PathBuf::from("/"),
            workdir: PathBuf::from("/"),
            readonly_binds: Vec::new(),
            writable_binds: Vec::new(),
            env: BTreeMap::new(),
            allowed_hosts: Vec::new(),
            command: Vec::new(),
            uid: DEFAULT_UID,
            gid: DEFAULT_GID,
            hostname: String::from("sandbox"),
        }
    }
}

impl SandboxConfig {
    /// Creates a configuration running `command` with default settings.
    #[must_use]
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the root filesystem.
    #[must_use]
    pub fn with_rootfs(mut self, path: impl Into<PathBuf>) -> Self {
        self.rootfs = path.into();
        self
    }

    /// Sets the working directory inside the sandbox.
    #[must_use]
    pub fn with_workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.workdir = path.into();
        self
    }

    /// Adds a read-only bind mount.
    #[must_use]
    pub fn with_readonly_bind(mut self, bind: BindMount) -> Self {
        self.readonly_binds.push(bind);
        self
    }

    /// Adds a read-write bind mount.
    #[must_use]
    pub fn with_writable_bind(mut self, bind: BindMount) -> Self {
        self.writable_binds.push(bind);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Adds multiple environment variables from an iterator.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Allows network access. Any allowed host keeps the network namespace shared.
    #[must_use]
    pub fn with_allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    /// Sets the uid inside the sandbox.
    #[must_use]
    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// Sets the gid inside the sandbox.
    #[must_use]
    pub fn with_gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// Sets the sandbox hostname (UTS namespace).
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// True when the command must run without network access.
    #[must_use]
    pub fn network_disabled(&self) -> bool {
        self.allowed_hosts.is_empty()
    }

    /// The environment handed to the spawned process: defaults overlaid
    /// with the configured variables.
    #[must_use]
    pub fn effective_env(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = DEFAULT_ENV
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        env.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Checks the configuration without touching anything but the rootfs
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let program = self.command.first().ok_or(ConfigError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ConfigError::EmptyProgram);
        }

        validate_rootfs(&self.rootfs)?;

        if !self.workdir.is_absolute() {
            return Err(ConfigError::RelativeWorkdir {
                path: self.workdir.clone(),
            });
        }

        for bind in self.readonly_binds.iter().chain(&self.writable_binds) {
            for path in [&bind.source, &bind.target] {
                if !path.is_absolute() {
                    return Err(ConfigError::RelativeBind { path: path.clone() });
                }
            }
        }

        if !is_valid_hostname(&self.hostname) {
            return Err(ConfigError::InvalidHostname {
                hostname: self.hostname.clone(),
            });
        }

        Ok(())
    }
}

fn validate_rootfs(rootfs: &Path) -> Result<(), ConfigError> {
    // The rootfs becomes an overlay lowerdir, where ',' separates options
    // and ':' stacks further lower layers.
    if rootfs.to_string_lossy().contains([',', ':']) {
        return Err(ConfigError::RootfsOptionSeparator {
            path: rootfs.to_path_buf(),
        });
    }

    let metadata = fs::metadata(rootfs).map_err(|e| ConfigError::RootfsUnreadable {
        path: rootfs.to_path_buf(),
        source: e,
    })?;

    if !metadata.is_dir() {
        return Err(ConfigError::RootfsNotDirectory {
            path: rootfs.to_path_buf(),
        });
    }

    // Listing proves read + search permission.
    fs::read_dir(rootfs).map_err(|e| ConfigError::RootfsUnreadable {
        path: rootfs.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

/// Same limits as sethostname(2): 1 to 64 bytes, no NUL.
fn is_valid_hostname(hostname: &str) -> bool {
    !hostname.is_empty() && hostname.len() <= 64 && !hostname.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SandboxConfig::default();
        assert_eq!(config.rootfs, PathBuf::from("/"));
        assert_eq!(config.workdir, PathBuf::from("/"));
        assert_eq!(config.uid, 1000);
        assert_eq!(config.gid, 1000);
        assert_eq!(config.hostname, "sandbox");
        assert!(config.command.is_empty());
        assert!(config.network_disabled());
    }

    #[test]
    fn test_builder_chain() {
        let config = SandboxConfig::new(["echo", "hi"])
            .with_rootfs("/srv/root")
            .with_workdir("/work")
            .with_readonly_bind(BindMount::same("/nix/store"))
            .with_writable_bind(BindMount::new("/home/me/out", "/out"))
            .with_env("FOO", "bar")
            .with_allowed_host("crates.io")
            .with_uid(0)
            .with_gid(0)
            .with_hostname("builder");

        assert_eq!(config.command, vec!["echo", "hi"]);
        assert_eq!(config.rootfs, PathBuf::from("/srv/root"));
        assert_eq!(config.workdir, PathBuf::from("/work"));
        assert_eq!(config.readonly_binds[0].target, PathBuf::from("/nix/store"));
        assert_eq!(config.writable_binds[0].target, PathBuf::from("/out"));
        assert_eq!(config.env.get("FOO"), Some(&String::from("bar")));
        assert!(!config.network_disabled());
        assert_eq!((config.uid, config.gid), (0, 0));
        assert_eq!(config.hostname, "builder");
    }

    #[test]
    fn test_effective_env_user_overrides_defaults() {
        let config = SandboxConfig::new(["true"])
            .with_env("HOME", "/home/sandbox")
            .with_envs([("A", "1")]);
        let env = config.effective_env();

        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/sandbox"));
        assert_eq!(env.get("TERM").map(String::as_str), Some("xterm"));
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert!(env.get("PATH").is_some_and(|p| p.contains("/usr/bin")));
    }

    #[test]
    fn test_validate_accepts_minimal_config() {
        SandboxConfig::new(["true"]).validate().expect("should be valid");
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let result = SandboxConfig::default().validate();
        assert!(matches!(result, Err(ConfigError::EmptyCommand)));

        let result = SandboxConfig::new([""]).validate();
        assert!(matches!(result, Err(ConfigError::EmptyProgram)));
    }

    #[test]
    fn test_validate_rejects_missing_rootfs() {
        let result = SandboxConfig::new(["true"])
            .with_rootfs("/nonexistent/nsbox/rootfs")
            .validate();
        assert!(matches!(result, Err(ConfigError::RootfsUnreadable { .. })));
    }

    #[test]
    fn test_validate_rejects_file_rootfs() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let result = SandboxConfig::new(["true"]).with_rootfs(file.path()).validate();
        assert!(matches!(result, Err(ConfigError::RootfsNotDirectory { .. })));
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let result = SandboxConfig::new(["true"]).with_workdir("work").validate();
        assert!(matches!(result, Err(ConfigError::RelativeWorkdir { .. })));

        let result = SandboxConfig::new(["true"])
            .with_readonly_bind(BindMount::new("/data", "data"))
            .validate();
        assert!(matches!(result, Err(ConfigError::RelativeBind { .. })));
    }

    #[test]
    fn test_validate_rejects_overlay_separators_in_rootfs() {
        for rootfs in ["/srv/a:/home/u", "/srv/a,upperdir=/etc"] {
            let result = SandboxConfig::new(["true"]).with_rootfs(rootfs).validate();
            assert!(
                matches!(result, Err(ConfigError::RootfsOptionSeparator { .. })),
                "{rootfs:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_accepts_kernel_hostnames() {
        for hostname in ["build_01", "has space", "UPPER.lower-mixed", "a"] {
            SandboxConfig::new(["true"])
                .with_hostname(hostname)
                .validate()
                .expect("hostname should be accepted");
        }
        let longest = "h".repeat(64);
        SandboxConfig::new(["true"])
            .with_hostname(longest)
            .validate()
            .expect("64 bytes is the limit");
    }

    #[test]
    fn test_validate_rejects_bad_hostname() {
        let too_long = "a".repeat(65);
        for hostname in ["", "nul\0byte", too_long.as_str()] {
            let result = SandboxConfig::new(["true"])
                .with_hostname(hostname)
                .validate();
            assert!(
                matches!(result, Err(ConfigError::InvalidHostname { .. })),
                "{hostname:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"command": ["ls", "-la"], "workdir": "/tmp"}"#)
                .expect("valid json");
        assert_eq!(config.command, vec!["ls", "-la"]);
        assert_eq!(config.workdir, PathBuf::from("/tmp"));
        assert_eq!(config.uid, DEFAULT_UID);
        assert_eq!(config.hostname, "sandbox");
    }
}

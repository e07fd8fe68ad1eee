//! Unprivileged isolation through bubblewrap.
//!
//! Writes land in bwrap's ephemeral tmp-overlay and vanish with the sandbox,
//! so this backend never reports modified files.

use super::{
    BackendKind, BuiltCommand, IsolationBackend, ProcessOutput, path_arg, wrapper_failure,
};
use crate::error::BackendError;
use crate::overlay::OverlayLayout;
use crate::sandbox::SandboxConfig;

/// `bwrap` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bubblewrap;

impl IsolationBackend for Bubblewrap {
    fn kind(&self) -> BackendKind {
        BackendKind::Bubblewrap
    }

    fn uses_overlay(&self) -> bool {
        false
    }

    fn build(
        &self,
        config: &SandboxConfig,
        _layout: Option<&OverlayLayout>,
    ) -> Result<BuiltCommand, BackendError> {
        Ok(BuiltCommand {
            argv: bwrap_args(config),
            env: config.effective_env(),
            cwd: None,
        })
    }

    fn collects_files(&self, _layout: Option<&OverlayLayout>) -> bool {
        false
    }

    fn setup_failure(&self, output: &ProcessOutput) -> Option<String> {
        wrapper_failure(output, &["bwrap: "])
    }
}

/// Builds the full `bwrap` argv for `config`.
///
/// Mount order matters: later mounts override earlier ones, so the rootfs
/// comes first, then the standard filesystems, then caller binds.
#[must_use]
pub fn bwrap_args(config: &SandboxConfig) -> Vec<String> {
    let mut args: Vec<String> = vec!["bwrap".into()];

    // Namespaces, with an explicit uid/gid map.
    args.extend([
        "--unshare-user".into(),
        "--uid".into(),
        config.uid.to_string(),
        "--gid".into(),
        config.gid.to_string(),
        "--unshare-pid".into(),
        "--unshare-uts".into(),
        "--unshare-ipc".into(),
    ]);
    if config.network_disabled() {
        args.push("--unshare-net".into());
    }
    args.extend(["--hostname".into(), config.hostname.clone()]);

    // Read-only rootfs with an ephemeral writable layer on top.
    let rootfs = path_arg(&config.rootfs);
    args.extend(["--ro-bind".into(), rootfs.clone(), "/".into()]);
    args.extend([
        "--overlay-src".into(),
        rootfs,
        "--tmp-overlay".into(),
        "/".into(),
    ]);

    args.extend([
        "--proc".into(),
        "/proc".into(),
        "--dev".into(),
        "/dev".into(),
        "--tmpfs".into(),
        "/tmp".into(),
        "--tmpfs".into(),
        "/run".into(),
    ]);

    for bind in &config.readonly_binds {
        args.extend([
            "--ro-bind".into(),
            path_arg(&bind.source),
            path_arg(&bind.target),
        ]);
    }
    for bind in &config.writable_binds {
        args.extend([
            "--bind".into(),
            path_arg(&bind.source),
            path_arg(&bind.target),
        ]);
    }

    args.extend(["--chdir".into(), path_arg(&config.workdir)]);
    args.push("--die-with-parent".into());

    args.push("--".into());
    args.extend(config.command.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::BindMount;

    fn position(args: &[String], needle: &str) -> Option<usize> {
        args.iter().position(|a| a == needle)
    }

    #[test]
    fn test_network_is_unshared_without_allowed_hosts() {
        let args = bwrap_args(&SandboxConfig::new(["true"]));
        assert!(args.contains(&"--unshare-net".to_string()));

        let args = bwrap_args(&SandboxConfig::new(["true"]).with_allowed_host("example.com"));
        assert!(!args.contains(&"--unshare-net".to_string()));
    }

    #[test]
    fn test_uid_gid_and_hostname() {
        let config = SandboxConfig::new(["id"])
            .with_uid(1234)
            .with_gid(5678)
            .with_hostname("box");
        let args = bwrap_args(&config);

        let uid = position(&args, "--uid").expect("--uid");
        assert_eq!(args[uid + 1], "1234");
        let gid = position(&args, "--gid").expect("--gid");
        assert_eq!(args[gid + 1], "5678");
        let host = position(&args, "--hostname").expect("--hostname");
        assert_eq!(args[host + 1], "box");
    }

    #[test]
    fn test_rootfs_and_binds() {
        let config = SandboxConfig::new(["true"])
            .with_rootfs("/srv/rootfs")
            .with_readonly_bind(BindMount::same("/nix/store"))
            .with_writable_bind(BindMount::new("/home/me/out", "/out"));
        let args = bwrap_args(&config).join(" ");

        assert!(args.contains("--ro-bind /srv/rootfs /"));
        assert!(args.contains("--overlay-src /srv/rootfs --tmp-overlay /"));
        assert!(args.contains("--ro-bind /nix/store /nix/store"));
        assert!(args.contains("--bind /home/me/out /out"));
        assert!(args.contains("--proc /proc --dev /dev --tmpfs /tmp --tmpfs /run"));
    }

    #[test]
    fn test_command_follows_separator_verbatim() {
        let config = SandboxConfig::new(["sh", "-c", "echo $HOME; rm -rf --no-preserve-root x"])
            .with_workdir("/work");
        let args = bwrap_args(&config);

        let sep = position(&args, "--").expect("separator");
        assert_eq!(
            &args[sep + 1..],
            &["sh", "-c", "echo $HOME; rm -rf --no-preserve-root x"]
        );

        let chdir = position(&args, "--chdir").expect("--chdir");
        assert_eq!(args[chdir + 1], "/work");
        assert!(position(&args, "--die-with-parent").is_some_and(|i| i < sep));
    }

    #[test]
    fn test_build_uses_effective_env_and_no_cwd() {
        let config = SandboxConfig::new(["true"]).with_env("FOO", "bar");
        let built = Bubblewrap.build(&config, None).expect("build");

        assert_eq!(built.argv[0], "bwrap");
        assert_eq!(built.env.get("FOO").map(String::as_str), Some("bar"));
        assert!(built.env.contains_key("PATH"));
        assert_eq!(built.cwd, None);
        assert!(!Bubblewrap.collects_files(None));
    }
}

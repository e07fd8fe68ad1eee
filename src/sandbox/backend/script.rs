//! Unprivileged fallback: `unshare` running a generated setup script.
//!
//! The script is constant text. Every caller-controlled value (paths,
//! hostname, the command itself) reaches it as a positional parameter, and
//! the command is started with `exec "$@"`, so nothing the caller passes is
//! ever parsed as shell syntax.
//!
//! Only making mounts private is fatal. The overlay, pivot, filesystem
//! mounts, device nodes and hostname are all best-effort: without
//! `fuse-overlayfs` the command runs on the host filesystem in private
//! mount/pid/uts/ipc namespaces and no writes are observed.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use tracing::trace;

use super::{
    BackendKind, BuiltCommand, IsolationBackend, ProcessOutput, path_arg, require_layout,
    wrapper_failure,
};
use crate::error::BackendError;
use crate::overlay::OverlayLayout;
use crate::sandbox::SandboxConfig;

/// Interpreter for the setup script. Absolute, so the sandbox `PATH` never
/// decides which shell runs it.
pub const SCRIPT_SHELL: &str = "/bin/sh";

/// Prefix the setup script uses for fatal errors.
pub const SETUP_FAILURE_PREFIX: &str = "nsbox-setup: ";

/// Setup script run inside the new namespaces.
///
/// Positional parameters: `$1` rootfs, `$2` upper, `$3` work, `$4` merged,
/// `$5` workdir, `$6` hostname, `$7` marker path, `$8...` command.
///
/// Setup tools are looked up on a fixed host `PATH`; the sandbox `PATH` is
/// restored just before the command is exec'd.
pub const SETUP_SCRIPT: &str = r#"#!/bin/sh
sandbox_path=$PATH
PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin
export PATH

set -e
mount --make-rprivate / || { echo "nsbox-setup: cannot make mounts private" >&2; exit 1; }
set +e

rootfs=$1 upper=$2 work=$3 merged=$4 workdir=$5 name=$6 marker=$7
shift 7

pivoted=
if command -v fuse-overlayfs >/dev/null 2>&1 &&
    fuse-overlayfs -o "lowerdir=$rootfs,upperdir=$upper,workdir=$work" "$merged" 2>/dev/null; then
    mkdir -p "$merged/.oldroot" 2>/dev/null
    if cd "$merged" && pivot_root . .oldroot 2>/dev/null; then
        cd /
        pivoted=1
        : >"/.oldroot$marker"
    fi
fi

mount -t proc proc /proc 2>/dev/null || true
mount -t sysfs sysfs /sys 2>/dev/null || true
mount -t tmpfs tmpfs /run 2>/dev/null || true

devnode() {
    mknod -m 666 "/dev/$1" c "$2" "$3" 2>/dev/null ||
        { touch "/dev/$1" && mount --bind "/.oldroot/dev/$1" "/dev/$1"; } 2>/dev/null ||
        true
}

if [ -n "$pivoted" ]; then
    mount -t tmpfs -o mode=755 tmpfs /dev 2>/dev/null || true
    devnode null 1 3
    devnode zero 1 5
    devnode random 1 8
    devnode urandom 1 9
    devnode tty 5 0
    ln -s /proc/self/fd /dev/fd 2>/dev/null || true
    ln -s /proc/self/fd/0 /dev/stdin 2>/dev/null || true
    ln -s /proc/self/fd/1 /dev/stdout 2>/dev/null || true
    ln -s /proc/self/fd/2 /dev/stderr 2>/dev/null || true
    mkdir -p /dev/pts /dev/shm 2>/dev/null || true
    umount -l /.oldroot 2>/dev/null || true
fi

hostname "$name" 2>/dev/null || true
cd "$workdir" 2>/dev/null || true
PATH=$sandbox_path
export PATH
exec "$@"
"#;

/// `unshare` + setup script backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnshareScript;

impl IsolationBackend for UnshareScript {
    fn kind(&self) -> BackendKind {
        BackendKind::UnshareScript
    }

    fn uses_overlay(&self) -> bool {
        true
    }

    /// Writes the setup script into the run directory.
    fn prepare(
        &self,
        _config: &SandboxConfig,
        layout: Option<&OverlayLayout>,
    ) -> Result<(), BackendError> {
        let layout = require_layout(self.kind(), layout)?;
        let path = layout.script_path();

        fs::write(&path, SETUP_SCRIPT)
            .and_then(|()| fs::set_permissions(&path, fs::Permissions::from_mode(0o700)))
            .map_err(|e| BackendError::ScriptWrite {
                path: path.clone(),
                source: e,
            })?;

        trace!(path = %path.display(), "Setup script written");
        Ok(())
    }

    fn build(
        &self,
        config: &SandboxConfig,
        layout: Option<&OverlayLayout>,
    ) -> Result<BuiltCommand, BackendError> {
        let layout = require_layout(self.kind(), layout)?;
        Ok(BuiltCommand {
            argv: script_args(config, layout),
            env: config.effective_env(),
            cwd: None,
        })
    }

    /// Only true when fuse-overlayfs mounted and the root was pivoted.
    fn collects_files(&self, layout: Option<&OverlayLayout>) -> bool {
        layout.is_some_and(|l| l.marker_path().exists())
    }

    fn setup_failure(&self, output: &ProcessOutput) -> Option<String> {
        wrapper_failure(output, &["unshare: ", SETUP_FAILURE_PREFIX])
    }
}

/// Builds the `unshare ... /bin/sh setup.sh <params> <command>` argv.
#[must_use]
pub fn script_args(config: &SandboxConfig, layout: &OverlayLayout) -> Vec<String> {
    let mut args: Vec<String> = [
        "unshare",
        "--user",
        "--map-root-user",
        "--mount",
        "--pid",
        "--fork",
        "--uts",
        "--ipc",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    if config.network_disabled() {
        args.push("--net".into());
    }

    args.extend([
        SCRIPT_SHELL.into(),
        path_arg(&layout.script_path()),
        path_arg(&config.rootfs),
        path_arg(&layout.upper),
        path_arg(&layout.work),
        path_arg(&layout.merged),
        path_arg(&config.workdir),
        config.hostname.clone(),
        path_arg(&layout.marker_path()),
    ]);
    args.extend(config.command.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(tmp: &TempDir) -> OverlayLayout {
        OverlayLayout::prepare(tmp.path(), "test").expect("layout")
    }

    #[test]
    fn test_network_flag_follows_allowed_hosts() {
        let tmp = TempDir::new().expect("temp dir");
        let layout = layout(&tmp);

        let args = script_args(&SandboxConfig::new(["true"]), &layout);
        assert!(args.contains(&"--net".to_string()));

        let open = SandboxConfig::new(["true"]).with_allowed_host("example.com");
        assert!(!script_args(&open, &layout).contains(&"--net".to_string()));
    }

    #[test]
    fn test_caller_strings_are_separate_arguments() {
        let tmp = TempDir::new().expect("temp dir");
        let layout = layout(&tmp);
        let config = SandboxConfig::new(["sh", "-c", "echo \"$(id)\"; exit 7"])
            .with_workdir("/tmp/dir with spaces")
            .with_hostname("box");

        let args = script_args(&config, &layout);
        let sh = args.iter().position(|a| a == SCRIPT_SHELL).expect("shell");

        assert_eq!(args[sh + 1], layout.script_path().to_string_lossy());
        assert_eq!(args[sh + 6], "/tmp/dir with spaces");
        assert_eq!(args[sh + 7], "box");
        assert_eq!(args[sh + 8], layout.marker_path().to_string_lossy());
        assert_eq!(&args[sh + 9..], &["sh", "-c", "echo \"$(id)\"; exit 7"]);
    }

    #[test]
    fn test_script_does_not_interpolate_parameters_into_commands() {
        // Every use of a parameter is quoted, and the command runs via "$@".
        assert!(SETUP_SCRIPT.contains("shift 7"));
        assert!(SETUP_SCRIPT.trim_end().ends_with("exec \"$@\""));
        assert!(SETUP_SCRIPT.contains("cd \"$workdir\""));
        assert!(SETUP_SCRIPT.contains("hostname \"$name\""));
        assert!(!SETUP_SCRIPT.contains("eval"));
    }

    #[test]
    fn test_sandbox_path_restored_before_exec() {
        let save = SETUP_SCRIPT.find("sandbox_path=$PATH").expect("save");
        let mount = SETUP_SCRIPT.find("mount --make-rprivate").expect("mount");
        let restore = SETUP_SCRIPT.find("PATH=$sandbox_path").expect("restore");
        let exec = SETUP_SCRIPT.find("exec \"$@\"").expect("exec");
        assert!(save < mount && mount < restore && restore < exec);
    }

    #[test]
    fn test_only_private_mount_is_fatal() {
        let set_e = SETUP_SCRIPT.find("set -e").expect("set -e");
        let set_plus_e = SETUP_SCRIPT.find("set +e").expect("set +e");
        let private = SETUP_SCRIPT.find("mount --make-rprivate /").expect("private");
        assert!(set_e < private && private < set_plus_e);
    }

    #[test]
    fn test_prepare_writes_executable_script() {
        let tmp = TempDir::new().expect("temp dir");
        let layout = layout(&tmp);
        UnshareScript
            .prepare(&SandboxConfig::new(["true"]), Some(&layout))
            .expect("prepare");

        let written = fs::read_to_string(layout.script_path()).expect("read script");
        assert_eq!(written, SETUP_SCRIPT);
        let mode = fs::metadata(layout.script_path())
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_file_collection_requires_marker() {
        let tmp = TempDir::new().expect("temp dir");
        let layout = layout(&tmp);
        assert!(!UnshareScript.collects_files(Some(&layout)));

        fs::write(layout.marker_path(), "").expect("marker");
        assert!(UnshareScript.collects_files(Some(&layout)));
        assert!(!UnshareScript.collects_files(None));
    }

    #[test]
    fn test_setup_failure_prefixes() {
        let output = ProcessOutput {
            exit_code: Some(1),
            signal: None,
            stdout: String::new(),
            stderr: "nsbox-setup: cannot make mounts private\n".to_string(),
        };
        assert!(UnshareScript.setup_failure(&output).is_some());

        let output = ProcessOutput {
            stderr: "unshare: unshare failed: Operation not permitted\n".to_string(),
            ..output
        };
        assert!(UnshareScript.setup_failure(&output).is_some());
    }
}

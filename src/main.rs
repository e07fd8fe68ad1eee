//! nsbox - Entry Point
//!
//! Command-line front end for running commands in the sandbox.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use nsbox::sandbox::{DEFAULT_GID, DEFAULT_UID, plan};
use nsbox::{
    BackendKind, BindMount, Sandbox, SandboxConfig, SandboxOptions, SandboxResult, system,
};

/// Exit status when the command produced no exit code at all.
const EXIT_NOT_STARTED: u8 = 125;

/// nsbox - Run untrusted commands in Linux namespaces.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a command in the sandbox
    Run(RunArgs),

    /// Report which isolation backends this host supports
    Probe {
        /// Print capabilities as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Root filesystem presented as /
    #[arg(long, default_value = "/")]
    rootfs: PathBuf,

    /// Working directory inside the sandbox
    #[arg(long, default_value = "/")]
    workdir: PathBuf,

    /// Read-only bind mount, SRC or SRC:DST
    #[arg(long = "ro-bind", value_name = "SRC[:DST]", value_parser = parse_bind)]
    ro_binds: Vec<BindMount>,

    /// Writable bind mount, SRC or SRC:DST
    #[arg(long = "bind", value_name = "SRC[:DST]", value_parser = parse_bind)]
    binds: Vec<BindMount>,

    /// Environment variable, KEY=VALUE
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    envs: Vec<(String, String)>,

    /// Host the command may reach; any value keeps networking enabled
    #[arg(long = "allow-host", value_name = "HOST")]
    allowed_hosts: Vec<String>,

    /// User id inside the sandbox
    #[arg(long, default_value_t = DEFAULT_UID)]
    uid: u32,

    /// Group id inside the sandbox
    #[arg(long, default_value_t = DEFAULT_GID)]
    gid: u32,

    /// Hostname inside the sandbox
    #[arg(long, default_value = "sandbox")]
    hostname: String,

    /// Backend to use: auto, privileged, bubblewrap, unshare-script or none
    #[arg(long, default_value = "auto")]
    backend: String,

    /// Try the privileged backend first when running as root
    #[arg(long)]
    allow_privileged: bool,

    /// Directory for per-run overlay directories
    #[arg(long, env = "NSBOX_TMP_ROOT")]
    tmp_root: Option<PathBuf>,

    /// Print the full result as JSON instead of forwarding output
    #[arg(long)]
    json: bool,

    /// Command and arguments
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl RunArgs {
    fn config(&self) -> SandboxConfig {
        let mut config = SandboxConfig::new(self.command.iter().cloned())
            .with_rootfs(&self.rootfs)
            .with_workdir(&self.workdir)
            .with_envs(self.envs.iter().cloned())
            .with_uid(self.uid)
            .with_gid(self.gid)
            .with_hostname(&self.hostname);

        for bind in &self.ro_binds {
            config = config.with_readonly_bind(bind.clone());
        }
        for bind in &self.binds {
            config = config.with_writable_bind(bind.clone());
        }
        for host in &self.allowed_hosts {
            config = config.with_allowed_host(host);
        }
        config
    }

    fn options(&self) -> SandboxOptions {
        let mut options = SandboxOptions::default().with_allow_privileged(self.allow_privileged);
        if let Some(tmp_root) = &self.tmp_root {
            options = options.with_tmp_root(tmp_root);
        }
        options
    }

    /// `None` means the fallback chain.
    fn backend(&self) -> Result<Option<BackendKind>> {
        if self.backend == "auto" {
            return Ok(None);
        }
        self.backend.parse().map(Some).map_err(|e| miette!("{e}"))
    }
}

fn parse_bind(value: &str) -> std::result::Result<BindMount, String> {
    match value.split_once(':') {
        Some(("", _)) | Some((_, "")) => Err(format!("invalid bind mount: {value}")),
        Some((source, target)) => Ok(BindMount::new(source, target)),
        None if value.is_empty() => Err("bind mount path cannot be empty".to_string()),
        None => Ok(BindMount::same(value)),
    }
}

fn parse_env(value: &str) -> std::result::Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got: {value}")),
    }
}

/// Maps a result onto this process's exit status, shell style.
fn exit_status(result: &SandboxResult) -> u8 {
    match (result.exit_code, result.signal) {
        (Some(code), _) => u8::try_from(code & 0xff).unwrap_or(1),
        (None, Some(signal)) => u8::try_from(128 + signal).unwrap_or(EXIT_NOT_STARTED),
        (None, None) => EXIT_NOT_STARTED,
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.config();
    let sandbox = Sandbox::new(args.options());

    let result = match args.backend()? {
        Some(kind) => sandbox.run_backend(kind, &config).await?,
        None => sandbox.run(&config).await?,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&result).into_diagnostic()?;
        println!("{json}");
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
        for warning in &result.warnings {
            warn!("{warning}");
        }
        if !result.modified_files.is_empty() {
            info!(count = result.modified_files.len(), "Modified files:");
            for path in &result.modified_files {
                info!("  {}", path.display());
            }
        }
    }

    debug!(backend = %result.backend, exit_code = ?result.exit_code, signal = ?result.signal, "Run complete");
    Ok(ExitCode::from(exit_status(&result)))
}

async fn probe(json: bool) -> Result<ExitCode> {
    let caps = system::probe().await;
    if json {
        let json = serde_json::to_string_pretty(&caps).into_diagnostic()?;
        println!("{json}");
    } else {
        println!("nsbox v{}", env!("CARGO_PKG_VERSION"));
        for line in caps.status_lines() {
            println!("{line}");
        }
        let chain = plan(&caps, &SandboxOptions::default());
        let names: Vec<_> = chain.iter().map(|kind| kind.as_str()).collect();
        println!("  backend order:   {}", names.join(" -> "));
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the sandboxed command's output.
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Probe { json } => probe(json).await,
    }
}

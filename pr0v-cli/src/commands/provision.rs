//! The `pr0v` command: load settings and manifest, provision, report
//!
//! Manifest lookup order:
//! - `--manifest` / `PR0V_MANIFEST`
//! - `./pr0v.toml`
//! - `<config dir>/pr0v/pr0v.toml`
//! - the manifest compiled into the binary

use crate::config::{APP_NAME, Settings};
use crate::exec::CancelFlag;
use crate::managers::{
    Elevate, OsManagerChoice, PackageManager, PipManager, SystemManager, detect_os_flavor,
};
use crate::manifest::Manifest;
use crate::provision::Provisioner;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "pr0v.toml";

#[derive(Debug, Parser, Clone, Default)]
pub struct ProvisionArgs {
    /// Probe and report what would be installed without installing anything
    #[clap(long)]
    pub dry_run: bool,

    /// Deadline for each package-manager command (e.g. 90s, 10m)
    #[clap(long, env = "PR0V_TIMEOUT", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Manifest file (default: ./pr0v.toml, then the built-in manifest)
    #[clap(short, long, env = "PR0V_MANIFEST")]
    pub manifest: Option<PathBuf>,

    /// Settings file (default: the platform config dir)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Extra attempts after a transient (network) failure
    #[clap(long)]
    pub retries: Option<u32>,

    /// Write the report as TOML to this path
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Print the report as JSON instead of the status list
    #[clap(long)]
    pub json: bool,

    /// OS package manager to use instead of auto-detection
    #[clap(long, value_enum)]
    pub os_manager: Option<OsManagerChoice>,

    /// When to prefix OS package commands with `sudo -n`
    #[clap(long, value_enum)]
    pub elevate: Option<Elevate>,
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

/// Pick the manifest file to load; `None` means the built-in one
fn resolve_manifest_path(flag: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = flag {
        return Some(expand(path));
    }

    let local = PathBuf::from(MANIFEST_FILE);
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME).join(MANIFEST_FILE))
        .filter(|path| path.is_file())
}

fn load_manifest(flag: Option<&Path>) -> Result<Manifest> {
    match resolve_manifest_path(flag) {
        Some(path) => {
            info!("using manifest {}", path.display());
            Manifest::load(&path)
                .with_context(|| format!("Invalid manifest: {}", path.display()))
        }
        None => {
            info!("no manifest found, using the built-in one");
            Manifest::embedded().context("Invalid built-in manifest")
        }
    }
}

fn build_managers(settings: &Settings, args: &ProvisionArgs) -> Vec<Box<dyn PackageManager>> {
    let flavor = detect_os_flavor(args.os_manager.unwrap_or(settings.os_manager));
    let elevate = args.elevate.unwrap_or(settings.elevate);
    debug!("os manager {}, elevate {:?}", flavor.name(), elevate);

    vec![
        Box::new(SystemManager::new(flavor, elevate, settings.refresh_index)),
        Box::new(PipManager::new(settings.python.clone())),
    ]
}

/// Run a provisioning pass and return the process exit code.
/// `Err` is reserved for problems before provisioning starts (settings, manifest).
pub async fn handle_provision(args: ProvisionArgs) -> Result<i32> {
    let settings = Settings::load(args.config.as_deref())?;
    let manifest = load_manifest(args.manifest.as_deref())?;

    let mut options = settings.provision_options(args.dry_run);
    if let Some(timeout) = args.timeout {
        options.timeout = Some(timeout);
    }
    if let Some(retries) = args.retries {
        options.max_retries = retries;
    }
    options.progress = !args.json;

    if options.progress {
        let mode = if options.dry_run { " (dry run)" } else { "" };
        println!("🥾 pr0v: provisioning {} dependencies{}", manifest.len(), mode);
        println!();
    }

    let cancel = CancelFlag::new();
    let signal_flag = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n🛑 Cancelling, stopping the running command...");
            signal_flag.cancel();
        }
    });

    let provisioner = Provisioner::new(build_managers(&settings, &args), options).with_cancel(cancel);
    let report = tokio::task::spawn_blocking(move || provisioner.provision(&manifest))
        .await
        .context("Provisioning task failed")?;
    signal_task.abort();

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        println!();
        print!("{}", report.render());
    }

    if let Some(path) = args.output.as_ref().or(settings.report_path.as_ref()) {
        // 🤓 the run already happened; a report that cannot be written must not hide its exit code
        match report.write_to(path) {
            Ok(written) => {
                if !args.json {
                    println!("📄 Report written to {}", written.display());
                }
            }
            Err(e) => {
                warn!("report not written: {:#}", e);
                eprintln!("⚠️  Could not write report: {e:#}");
            }
        }
    }

    Ok(report.exit_code())
}

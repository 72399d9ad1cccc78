//! OS package managers: apt, dnf, pacman, brew
//!
//! The flavours differ only in command lines and output formats, so one
//! adapter covers them all.

use super::{Elevate, PackageManager, Probe, finish, judge};
use crate::error::{InstallError, ManagerUnavailableSnafu, PermissionDeniedSnafu};
use crate::exec::{self, CommandOutput, RunControl, is_command_available};
use crate::manifest::{Declaration, ManagerKind};
use std::sync::atomic::{AtomicBool, Ordering};

/// How commands reach the machine; `exec::run` outside tests
type Runner = fn(&str, &[String], &RunControl) -> Result<CommandOutput, InstallError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFlavor {
    Apt,
    Dnf,
    Pacman,
    Brew,
}

impl SystemFlavor {
    /// Auto-detection order
    pub const ALL: [SystemFlavor; 4] = [
        SystemFlavor::Apt,
        SystemFlavor::Dnf,
        SystemFlavor::Pacman,
        SystemFlavor::Brew,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SystemFlavor::Apt => "apt",
            SystemFlavor::Dnf => "dnf",
            SystemFlavor::Pacman => "pacman",
            SystemFlavor::Brew => "brew",
        }
    }

    pub fn install_program(self) -> &'static str {
        match self {
            SystemFlavor::Apt => "apt-get",
            SystemFlavor::Dnf => "dnf",
            SystemFlavor::Pacman => "pacman",
            SystemFlavor::Brew => "brew",
        }
    }

    pub fn query_program(self) -> &'static str {
        match self {
            SystemFlavor::Apt => "dpkg-query",
            SystemFlavor::Dnf => "rpm",
            SystemFlavor::Pacman => "pacman",
            SystemFlavor::Brew => "brew",
        }
    }

    /// Homebrew refuses to run as root
    fn allows_elevation(self) -> bool {
        self != SystemFlavor::Brew
    }

    fn probe_args(self, name: &str) -> Vec<String> {
        let args: &[&str] = match self {
            // one record per line: multi-arch packages report once per architecture
            SystemFlavor::Apt => &["-W", "-f=${Status}\t${Version}\n"],
            SystemFlavor::Dnf => &["-q", "--qf", "%{VERSION}\n"],
            SystemFlavor::Pacman => &["-Q"],
            SystemFlavor::Brew => &["list", "--versions"],
        };
        let mut args: Vec<String> = args.iter().map(ToString::to_string).collect();
        args.push(name.to_string());
        args
    }

    /// Package argument for the install command line
    fn package_arg(self, declaration: &Declaration) -> String {
        let pinned = declaration.constraint.as_ref().and_then(|c| c.pinned());
        match (self, pinned) {
            (SystemFlavor::Apt, Some(version)) => format!("{}={}", declaration.name, version),
            (SystemFlavor::Dnf, Some(version)) => format!("{}-{}", declaration.name, version),
            (_, Some(_)) => {
                tracing::warn!(
                    "{} cannot pin versions; installing {} unpinned",
                    self.name(),
                    declaration.name
                );
                declaration.name.clone()
            }
            (_, None) => declaration.name.clone(),
        }
    }

    /// Install command line, before any sudo wrapping
    fn install_command(self, batch: &[&Declaration]) -> (&'static str, Vec<String>) {
        let packages = batch.iter().map(|d| self.package_arg(d));
        let (program, prefix): (&str, &[&str]) = match self {
            SystemFlavor::Apt => (
                "env",
                &["DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y"],
            ),
            SystemFlavor::Dnf => ("dnf", &["install", "-y"]),
            SystemFlavor::Pacman => ("pacman", &["-S", "--needed", "--noconfirm"]),
            SystemFlavor::Brew => ("brew", &["install"]),
        };
        let mut args: Vec<String> = prefix.iter().map(ToString::to_string).collect();
        args.extend(packages);
        (program, args)
    }
}

/// What a query command said about one package
#[derive(Debug, PartialEq, Eq)]
enum QueryState {
    Installed(Option<String>),
    NotInstalled,
    Unrecognised(String),
}

fn parse_query(flavor: SystemFlavor, output: &CommandOutput) -> QueryState {
    let stdout = output.stdout.trim().lines().next().unwrap_or_default();
    let lower = output.combined_output().to_lowercase();

    match flavor {
        SystemFlavor::Apt => {
            if !output.success {
                return if lower.contains("no packages found") {
                    QueryState::NotInstalled
                } else {
                    QueryState::Unrecognised(output.diagnostic())
                };
            }
            // "install ok installed\t4.4.2-1"; removed packages keep "config-files"
            let (status, version) = stdout.split_once('\t').unwrap_or((stdout, ""));
            if status.split_whitespace().nth(2) == Some("installed") {
                QueryState::Installed(non_empty(version))
            } else {
                QueryState::NotInstalled
            }
        }
        SystemFlavor::Dnf => {
            if output.success {
                QueryState::Installed(non_empty(stdout))
            } else if lower.contains("is not installed") {
                QueryState::NotInstalled
            } else {
                QueryState::Unrecognised(output.diagnostic())
            }
        }
        SystemFlavor::Pacman => {
            if output.success {
                // "graphviz 12.2.1-1"
                QueryState::Installed(stdout.split_whitespace().nth(1).and_then(non_empty))
            } else if lower.contains("was not found") {
                QueryState::NotInstalled
            } else {
                QueryState::Unrecognised(output.diagnostic())
            }
        }
        SystemFlavor::Brew => {
            if output.success && !stdout.is_empty() {
                // "ffmpeg 6.1.1_2 7.1_1": newest keg last
                QueryState::Installed(stdout.split_whitespace().skip(1).last().and_then(non_empty))
            } else if output.success || output.stderr.trim().is_empty() || lower.contains("no such keg") {
                QueryState::NotInstalled
            } else {
                QueryState::Unrecognised(output.diagnostic())
            }
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Adapter for the machine's OS package manager
#[derive(Debug)]
pub struct SystemManager {
    flavor: SystemFlavor,
    elevate: Elevate,
    refresh_index: bool,
    /// The index is refreshed at most once, not on every retry
    refreshed: AtomicBool,
    run: Runner,
}

impl SystemManager {
    pub fn new(flavor: SystemFlavor, elevate: Elevate, refresh_index: bool) -> Self {
        Self {
            flavor,
            elevate,
            refresh_index,
            refreshed: AtomicBool::new(false),
            run: exec::run,
        }
    }

    #[cfg(test)]
    fn with_runner(mut self, run: Runner) -> Self {
        self.run = run;
        self
    }

    fn elevated(&self, program: &str, args: Vec<String>) -> (String, Vec<String>) {
        if self.flavor.allows_elevation() {
            self.elevate.wrap(program, args)
        } else {
            (program.to_string(), args)
        }
    }

    fn uses_sudo(&self) -> bool {
        self.flavor.allows_elevation() && self.elevate.needs_sudo()
    }

    /// `apt-get update` so freshly published packages can be located.
    /// Best effort: one broken repository must not block installing from the
    /// cached index, so failures are only logged.
    fn refresh(&self, control: &RunControl) {
        if !(self.refresh_index && self.flavor == SystemFlavor::Apt) {
            return;
        }
        if self.refreshed.swap(true, Ordering::SeqCst) {
            return;
        }

        let (program, args) = self.elevated("apt-get", vec!["update".to_string()]);
        let outcome = (self.run)(&program, &args, control)
            .and_then(|output| finish(self.name(), &output));
        if let Err(e) = outcome {
            tracing::warn!("apt-get update failed, installing from the cached index: {}", e);
        }
    }
}

impl PackageManager for SystemManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Os
    }

    fn name(&self) -> &str {
        self.flavor.name()
    }

    fn check_available(&self, _control: &RunControl) -> Result<(), InstallError> {
        for program in [self.flavor.install_program(), self.flavor.query_program()] {
            if !is_command_available(program) {
                return ManagerUnavailableSnafu {
                    manager: self.name(),
                    reason: format!("{program} not found in PATH"),
                }
                .fail();
            }
        }

        if self.uses_sudo() && !is_command_available("sudo") {
            return PermissionDeniedSnafu {
                message: format!(
                    "not running as root and sudo is not installed; {} needs elevated privileges",
                    self.name()
                ),
            }
            .fail();
        }

        Ok(())
    }

    fn probe(&self, declaration: &Declaration, control: &RunControl) -> Probe {
        let args = self.flavor.probe_args(&declaration.name);
        let output = match (self.run)(self.flavor.query_program(), &args, control) {
            Ok(output) => output,
            Err(e) => {
                return Probe::Unknown {
                    reason: e.to_string(),
                };
            }
        };

        match parse_query(self.flavor, &output) {
            QueryState::Installed(version) => judge(declaration, version),
            QueryState::NotInstalled => Probe::Missing,
            QueryState::Unrecognised(reason) => Probe::Unknown { reason },
        }
    }

    fn install(&self, batch: &[&Declaration], control: &RunControl) -> Result<(), InstallError> {
        self.refresh(control);

        let (program, args) = self.flavor.install_command(batch);
        let (program, args) = self.elevated(program, args);
        let output = (self.run)(&program, &args, control)?;
        finish(self.name(), &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static COMMANDS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    /// `apt-get update` fails on a broken third-party repository; everything else succeeds
    fn broken_mirror(program: &str, args: &[String], _control: &RunControl) -> Result<CommandOutput, InstallError> {
        let line = format!("{program} {}", args.join(" "));
        COMMANDS.with(|commands| commands.borrow_mut().push(line));

        if args.iter().any(|arg| arg == "update") {
            return Ok(CommandOutput {
                code: Some(100),
                success: false,
                stdout: String::new(),
                stderr: "E: The repository 'https://ppa.example.org/ubuntu jammy Release' does not have a Release file.\n".to_string(),
            });
        }
        Ok(CommandOutput {
            code: Some(0),
            success: true,
            ..CommandOutput::default()
        })
    }

    fn commands() -> Vec<String> {
        COMMANDS.with(|commands| commands.borrow().clone())
    }

    fn decl(text: &str) -> Declaration {
        Declaration::parse(text, ManagerKind::Os).unwrap()
    }

    fn output(success: bool, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(i32::from(!success)),
            success,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_parse_dpkg_query() {
        let installed = output(true, "install ok installed\t2.42.2-6", "");
        assert_eq!(
            parse_query(SystemFlavor::Apt, &installed),
            QueryState::Installed(Some("2.42.2-6".to_string()))
        );

        let config_only = output(true, "deinstall ok config-files\t2.42.2-6", "");
        assert_eq!(parse_query(SystemFlavor::Apt, &config_only), QueryState::NotInstalled);

        let unknown = output(false, "", "dpkg-query: no packages found matching povray\n");
        assert_eq!(parse_query(SystemFlavor::Apt, &unknown), QueryState::NotInstalled);

        let multi_arch = output(
            true,
            "install ok installed\t2.35-0ubuntu3.6\ninstall ok installed\t2.35-0ubuntu3.6\n",
            "",
        );
        assert_eq!(
            parse_query(SystemFlavor::Apt, &multi_arch),
            QueryState::Installed(Some("2.35-0ubuntu3.6".to_string()))
        );

        let broken = output(false, "", "dpkg-query: error: database is locked");
        assert!(matches!(
            parse_query(SystemFlavor::Apt, &broken),
            QueryState::Unrecognised(_)
        ));
    }

    #[test]
    fn test_parse_other_flavours() {
        assert_eq!(
            parse_query(SystemFlavor::Pacman, &output(true, "graphviz 12.2.1-1\n", "")),
            QueryState::Installed(Some("12.2.1-1".to_string()))
        );
        assert_eq!(
            parse_query(
                SystemFlavor::Pacman,
                &output(false, "", "error: package 'povray' was not found")
            ),
            QueryState::NotInstalled
        );
        assert_eq!(
            parse_query(SystemFlavor::Dnf, &output(true, "7.1\n", "")),
            QueryState::Installed(Some("7.1".to_string()))
        );
        assert_eq!(
            parse_query(SystemFlavor::Dnf, &output(false, "package inkscape is not installed\n", "")),
            QueryState::NotInstalled
        );
        assert_eq!(
            parse_query(SystemFlavor::Brew, &output(true, "ffmpeg 6.1.1_2 7.1_1\n", "")),
            QueryState::Installed(Some("7.1_1".to_string()))
        );
        assert_eq!(
            parse_query(SystemFlavor::Brew, &output(false, "", "")),
            QueryState::NotInstalled
        );
    }

    #[test]
    fn test_apt_install_command_is_one_batch() {
        let povray = decl("povray");
        let ffmpeg = decl("ffmpeg==7:4.4.2-0ubuntu0.22.04.1");
        let (program, args) = SystemFlavor::Apt.install_command(&[&povray, &ffmpeg]);
        assert_eq!(program, "env");
        assert_eq!(
            args,
            [
                "DEBIAN_FRONTEND=noninteractive",
                "apt-get",
                "install",
                "-y",
                "povray",
                "ffmpeg=7:4.4.2-0ubuntu0.22.04.1",
            ]
        );
    }

    #[test]
    fn test_unpinnable_flavours_install_by_name() {
        let inkscape = decl("inkscape==1.2.2");
        let (_, args) = SystemFlavor::Pacman.install_command(&[&inkscape]);
        assert_eq!(args.last().map(String::as_str), Some("inkscape"));

        let (_, args) = SystemFlavor::Dnf.install_command(&[&inkscape]);
        assert_eq!(args.last().map(String::as_str), Some("inkscape-1.2.2"));
    }

    #[test]
    fn test_brew_is_never_elevated() {
        let manager = SystemManager::new(SystemFlavor::Brew, Elevate::Always, false);
        let (program, _) = manager.elevated("brew", vec!["install".to_string()]);
        assert_eq!(program, "brew");

        let manager = SystemManager::new(SystemFlavor::Apt, Elevate::Always, false);
        let (program, args) = manager.elevated("env", vec!["apt-get".to_string()]);
        assert_eq!(program, "sudo");
        assert_eq!(args, ["-n", "env", "apt-get"]);
    }

    #[test]
    fn test_failed_refresh_still_installs() {
        let manager = SystemManager::new(SystemFlavor::Apt, Elevate::Never, true).with_runner(broken_mirror);

        let povray = decl("povray");
        manager.install(&[&povray], &RunControl::default()).unwrap();
        // a retry does not refresh again
        manager.install(&[&povray], &RunControl::default()).unwrap();

        let commands = commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], "apt-get update");
        assert!(commands[1].ends_with("apt-get install -y povray"));
        assert!(commands[2].ends_with("apt-get install -y povray"));
    }
}

//! Package manager adapters
//!
//! Every external manager is driven as an opaque process through the
//! [`PackageManager`] trait:
//! - `probe` is read-only and never fails the run (errors become `Probe::Unknown`)
//! - `install` covers a whole manager group in one invocation

pub mod pip;
pub mod system;

pub use pip::PipManager;
pub use system::{SystemFlavor, SystemManager};

use crate::classify::classify_failure;
use crate::error::InstallError;
use crate::exec::{CommandOutput, RunControl};
use crate::manifest::{Declaration, ManagerKind};
use serde::{Deserialize, Serialize};

/// Result of a read-only probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Installed, and satisfies the constraint if one was given
    Satisfied { version: Option<String> },
    /// Installed, but the version does not satisfy the constraint
    Outdated { version: String },
    Missing,
    /// Could not tell; treated as "attempt install"
    Unknown { reason: String },
}

impl Probe {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Probe::Satisfied { .. })
    }

    pub fn installed_version(&self) -> Option<&str> {
        match self {
            Probe::Satisfied { version } => version.as_deref(),
            Probe::Outdated { version } => Some(version),
            Probe::Missing | Probe::Unknown { .. } => None,
        }
    }
}

pub trait PackageManager: Send + Sync {
    fn kind(&self) -> ManagerKind;

    fn name(&self) -> &str;

    /// `Err(ManagerUnavailable)` when the manager cannot be invoked at all
    fn check_available(&self, control: &RunControl) -> Result<(), InstallError>;

    fn probe(&self, declaration: &Declaration, control: &RunControl) -> Probe;

    /// Install the batch with a single manager invocation
    fn install(&self, batch: &[&Declaration], control: &RunControl) -> Result<(), InstallError>;
}

/// Decide satisfaction from the version an installed package reports
pub fn judge(declaration: &Declaration, version: Option<String>) -> Probe {
    let Some(constraint) = &declaration.constraint else {
        return Probe::Satisfied { version };
    };

    let Some(version) = version else {
        return Probe::Unknown {
            reason: format!("{} is installed but reports no version", declaration.name),
        };
    };

    match constraint.matches(&version) {
        Ok(true) => Probe::Satisfied {
            version: Some(version),
        },
        Ok(false) => Probe::Outdated { version },
        Err(e) => Probe::Unknown {
            reason: e.to_string(),
        },
    }
}

/// Turn a finished install run into the batch outcome
pub fn finish(manager: &str, output: &CommandOutput) -> Result<(), InstallError> {
    if output.success {
        Ok(())
    } else {
        Err(classify_failure(manager, output))
    }
}

/// When OS-level commands are prefixed with `sudo -n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Elevate {
    /// Only when not already running as root
    #[default]
    Auto,
    Always,
    Never,
}

impl Elevate {
    pub fn needs_sudo(self) -> bool {
        match self {
            Elevate::Always => true,
            Elevate::Never => false,
            Elevate::Auto => !is_root(),
        }
    }

    /// Wrap a command line; `-n` makes sudo fail instead of prompting
    pub fn wrap(self, program: &str, args: Vec<String>) -> (String, Vec<String>) {
        if self.needs_sudo() {
            let mut wrapped = vec!["-n".to_string(), program.to_string()];
            wrapped.extend(args);
            ("sudo".to_string(), wrapped)
        } else {
            (program.to_string(), args)
        }
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// Which OS package manager to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OsManagerChoice {
    #[default]
    Auto,
    Apt,
    Dnf,
    Pacman,
    Brew,
}

/// Pick the OS manager: the configured one, or the first found in PATH
///
/// Falls back to the platform default when nothing is found, so the group
/// reports `ManagerUnavailable` through the normal availability check.
pub fn detect_os_flavor(choice: OsManagerChoice) -> SystemFlavor {
    match choice {
        OsManagerChoice::Apt => SystemFlavor::Apt,
        OsManagerChoice::Dnf => SystemFlavor::Dnf,
        OsManagerChoice::Pacman => SystemFlavor::Pacman,
        OsManagerChoice::Brew => SystemFlavor::Brew,
        OsManagerChoice::Auto => SystemFlavor::ALL
            .into_iter()
            .find(|flavor| crate::exec::is_command_available(flavor.install_program()))
            .unwrap_or(if cfg!(target_os = "macos") {
                SystemFlavor::Brew
            } else {
                SystemFlavor::Apt
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(text: &str) -> Declaration {
        Declaration::parse(text, ManagerKind::Os).unwrap()
    }

    #[test]
    fn test_judge_without_constraint() {
        assert_eq!(
            judge(&decl("ffmpeg"), Some("7:4.4.2-0ubuntu0.22.04.1".to_string())),
            Probe::Satisfied {
                version: Some("7:4.4.2-0ubuntu0.22.04.1".to_string())
            }
        );
        assert!(judge(&decl("ffmpeg"), None).is_satisfied());
    }

    #[test]
    fn test_judge_with_constraint() {
        let povray = decl("povray>=3.7");
        assert!(judge(&povray, Some("1:3.7.0.10-1".to_string())).is_satisfied());
        assert_eq!(
            judge(&povray, Some("3.6.1-12".to_string())),
            Probe::Outdated {
                version: "3.6.1-12".to_string()
            }
        );
        assert!(matches!(
            judge(&povray, Some("snapshot".to_string())),
            Probe::Unknown { .. }
        ));
        assert!(matches!(judge(&povray, None), Probe::Unknown { .. }));
    }

    #[test]
    fn test_elevate_wrap() {
        let (program, args) = Elevate::Always.wrap("apt-get", vec!["install".into()]);
        assert_eq!(program, "sudo");
        assert_eq!(args, ["-n", "apt-get", "install"]);

        let (program, args) = Elevate::Never.wrap("apt-get", vec!["install".into()]);
        assert_eq!(program, "apt-get");
        assert_eq!(args, ["install"]);
    }

    #[test]
    fn test_explicit_choice_skips_detection() {
        assert_eq!(detect_os_flavor(OsManagerChoice::Pacman), SystemFlavor::Pacman);
    }
}

//! Python packages through `python -m pip`

use super::{PackageManager, Probe, finish, judge};
use crate::error::{InstallError, ManagerUnavailableSnafu, UnknownSnafu};
use crate::exec::{self, RunControl, is_command_available};
use crate::manifest::{Declaration, ManagerKind};
use std::io::Write;

#[derive(Debug, Clone)]
pub struct PipManager {
    python: String,
}

impl PipManager {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn pip_args(&self, args: &[&str]) -> Vec<String> {
        ["-m", "pip", "--disable-pip-version-check"]
            .iter()
            .chain(args)
            .map(ToString::to_string)
            .collect()
    }

    /// Requirements file for the unsatisfied subset, one spec per line
    fn write_requirements(batch: &[&Declaration]) -> Result<tempfile::NamedTempFile, InstallError> {
        let to_unknown = |e: std::io::Error| {
            UnknownSnafu {
                message: format!("failed to write temporary requirements file: {e}"),
            }
            .build()
        };

        let mut file = tempfile::Builder::new()
            .prefix("pr0v-requirements-")
            .suffix(".txt")
            .tempfile()
            .map_err(to_unknown)?;
        for declaration in batch {
            writeln!(file, "{}", declaration.spec).map_err(to_unknown)?;
        }
        file.flush().map_err(to_unknown)?;
        Ok(file)
    }
}

/// Pull `Version:` out of `pip show` output
fn parse_pip_show(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        line.strip_prefix("Version:")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(ToString::to_string)
    })
}

impl PackageManager for PipManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Language
    }

    fn name(&self) -> &str {
        "pip"
    }

    fn check_available(&self, control: &RunControl) -> Result<(), InstallError> {
        if !is_command_available(&self.python) {
            return ManagerUnavailableSnafu {
                manager: self.name(),
                reason: format!("{} not found in PATH", self.python),
            }
            .fail();
        }

        let output = exec::run(&self.python, &self.pip_args(&["--version"]), control)?;
        if output.success {
            Ok(())
        } else {
            ManagerUnavailableSnafu {
                manager: self.name(),
                reason: output.diagnostic(),
            }
            .fail()
        }
    }

    fn probe(&self, declaration: &Declaration, control: &RunControl) -> Probe {
        let args = self.pip_args(&["show", &declaration.name]);
        let output = match exec::run(&self.python, &args, control) {
            Ok(output) => output,
            Err(e) => {
                return Probe::Unknown {
                    reason: e.to_string(),
                };
            }
        };

        if output.success {
            judge(declaration, parse_pip_show(&output.stdout))
        } else if output.combined_output().to_lowercase().contains("not found") {
            Probe::Missing
        } else {
            Probe::Unknown {
                reason: output.diagnostic(),
            }
        }
    }

    fn install(&self, batch: &[&Declaration], control: &RunControl) -> Result<(), InstallError> {
        let requirements = Self::write_requirements(batch)?;
        let path = requirements.path().to_string_lossy().into_owned();

        let args = self.pip_args(&["install", "--no-input", "-r", &path]);
        let output = exec::run(&self.python, &args, control)?;
        finish(self.name(), &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pip_show() {
        let stdout = "Name: numpy\nVersion: 1.26.4\nSummary: Fundamental package for array computing in Python\n";
        assert_eq!(parse_pip_show(stdout), Some("1.26.4".to_string()));
        assert_eq!(parse_pip_show("Name: numpy\n"), None);
    }

    #[test]
    fn test_requirements_file_holds_specs_verbatim() {
        let numpy = Declaration::parse("numpy>=1.24", ManagerKind::Language).unwrap();
        let requests = Declaration::parse(
            r#"requests[socks]==2.31.0; python_version >= "3.8""#,
            ManagerKind::Language,
        )
        .unwrap();

        let file = PipManager::write_requirements(&[&numpy, &requests]).unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(
            content,
            "numpy>=1.24\nrequests[socks]==2.31.0; python_version >= \"3.8\"\n"
        );
    }

    #[test]
    fn test_pip_args_prefix() {
        let pip = PipManager::new("python3");
        assert_eq!(
            pip.pip_args(&["show", "numpy"]),
            ["-m", "pip", "--disable-pip-version-check", "show", "numpy"]
        );
    }

    #[test]
    fn test_missing_interpreter_is_unavailable() {
        let pip = PipManager::new("/nonexistent/python3");
        let err = pip.check_available(&RunControl::default()).unwrap_err();
        assert_eq!(err.label(), "ManagerUnavailable");
    }
}

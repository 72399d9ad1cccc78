//! User settings, loaded with confy from `<config dir>/pr0v/config.toml`
//! or from an explicit `--config` path

use crate::managers::{Elevate, OsManagerChoice};
use crate::provision::ProvisionOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "pr0v";
const CONFIG_NAME: &str = "config";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Deadline per external command, e.g. "10m"
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    pub os_manager: OsManagerChoice,
    pub elevate: Elevate,
    /// Run `apt-get update` before installing with apt
    pub refresh_index: bool,
    /// Interpreter whose pip is used
    pub python: String,
    /// Where to write the TOML report after each run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let defaults = ProvisionOptions::default();
        Self {
            timeout: defaults.timeout,
            max_retries: defaults.max_retries,
            retry_delay: defaults.retry_delay,
            os_manager: OsManagerChoice::Auto,
            elevate: Elevate::Auto,
            refresh_index: true,
            python: "python3".to_string(),
            report_path: None,
        }
    }
}

impl Settings {
    /// Load from `path`, or from the platform config dir when none is given.
    /// confy writes the defaults out when the file does not exist yet.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned());
                confy::load_path(&expanded)
                    .with_context(|| format!("Failed to load settings from {}", expanded.display()))
            }
            None => confy::load(APP_NAME, CONFIG_NAME).context("Failed to load pr0v settings"),
        }
    }

    pub fn provision_options(&self, dry_run: bool) -> ProvisionOptions {
        ProvisionOptions {
            dry_run,
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            progress: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.retry_delay, Duration::from_secs(2));
        assert_eq!(settings.timeout, None);
        assert_eq!(settings.python, "python3");
        assert!(settings.refresh_index);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "timeout = \"10m\"\nretry_delay = \"500ms\"\nos_manager = \"dnf\"\nelevate = \"never\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.timeout, Some(Duration::from_secs(600)));
        assert_eq!(settings.retry_delay, Duration::from_millis(500));
        assert_eq!(settings.os_manager, OsManagerChoice::Dnf);
        assert_eq!(settings.elevate, Elevate::Never);
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.python, "python3");
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh/config.toml");

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
    }

    #[test]
    fn test_bad_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "timeout = \"soon\"\n").unwrap();

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load settings"));
    }

    #[test]
    fn test_provision_options_follow_settings() {
        let settings = Settings {
            timeout: Some(Duration::from_secs(90)),
            max_retries: 0,
            ..Settings::default()
        };
        let options = settings.provision_options(true);
        assert!(options.dry_run);
        assert_eq!(options.timeout, Some(Duration::from_secs(90)));
        assert_eq!(options.max_retries, 0);
    }
}

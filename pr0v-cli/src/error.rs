//! Error taxonomy for provisioning runs
//!
//! `InstallError` values are stored inside the report, so they carry plain
//! strings instead of wrapping `io::Error` sources.

use crate::manifest::ManagerKind;
use serde::Serialize;
use snafu::Snafu;
use std::path::PathBuf;
use std::time::Duration;

/// Why a declaration (or a whole batch) could not be provisioned
#[derive(Debug, Clone, PartialEq, Eq, Snafu, Serialize)]
#[snafu(visibility(pub))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstallError {
    #[snafu(display("{manager} is unavailable: {reason}"))]
    ManagerUnavailable { manager: String, reason: String },

    #[snafu(display("permission denied: {message}"))]
    PermissionDenied { message: String },

    #[snafu(display("package not found: {message}"))]
    PackageNotFound { message: String },

    #[snafu(display("version unsatisfiable: {message}"))]
    VersionUnsatisfiable { message: String },

    /// Transient network/registry failure that outlived its retries
    #[snafu(display("network failure: {message}"))]
    Network { message: String },

    #[snafu(display("timed out after {}", humantime::format_duration(*after)))]
    Timeout {
        #[serde(with = "humantime_serde")]
        after: Duration,
    },

    #[snafu(display("cancelled"))]
    Cancelled,

    #[snafu(display("{message}"))]
    Unknown { message: String },
}

impl InstallError {
    /// Short class name used in rendered reports
    pub fn label(&self) -> &'static str {
        match self {
            InstallError::ManagerUnavailable { .. } => "ManagerUnavailable",
            InstallError::PermissionDenied { .. } => "PermissionDenied",
            InstallError::PackageNotFound { .. } => "PackageNotFound",
            InstallError::VersionUnsatisfiable { .. } => "VersionUnsatisfiable",
            InstallError::Network { .. } => "Network",
            InstallError::Timeout { .. } => "Timeout",
            InstallError::Cancelled => "Cancelled",
            InstallError::Unknown { .. } => "Unknown",
        }
    }

    /// Only network-class failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, InstallError::Network { .. })
    }

    /// Process exit code for a run whose failures are all of this class
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallError::ManagerUnavailable { .. } => 3,
            InstallError::PermissionDenied { .. } => 4,
            InstallError::PackageNotFound { .. } | InstallError::VersionUnsatisfiable { .. } => 5,
            InstallError::Network { .. } | InstallError::Timeout { .. } => 6,
            InstallError::Cancelled => 130,
            InstallError::Unknown { .. } => 1,
        }
    }
}

/// Problems building a manifest; these abort the run before anything is probed
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManifestError {
    #[snafu(display("manifest declares no packages"))]
    Empty,

    #[snafu(display("{manager} package {name:?} is declared more than once"))]
    Duplicate { manager: ManagerKind, name: String },

    #[snafu(display("invalid requirement {text:?}: {reason}"))]
    InvalidRequirement { text: String, reason: String },

    #[snafu(display("failed to read {}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to parse manifest {}", path.display()))]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

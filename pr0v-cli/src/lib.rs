//! pr0v: bring a machine in line with a declarative package manifest
//!
//! OS packages are batch-installed first, then language (pip) packages; each
//! declaration ends up `already_satisfied`, `installed`, `would_install` (dry
//! run) or `failed` with a classified reason.

pub mod classify;
pub mod commands;
pub mod config;
pub mod constraint;
pub mod error;
pub mod exec;
pub mod managers;
pub mod manifest;
pub mod provision;
pub mod report;

pub use error::{InstallError, ManifestError};
pub use manifest::{Declaration, Manifest, ManagerKind};
pub use provision::{ProvisionOptions, Provisioner, RunState};
pub use report::{InstallResult, Outcome, Report};

//! Pattern-based classification of failed package-manager runs
//!
//! Checks patterns in priority order: unavailable > permission > network >
//! version > not-found. Falls back to `Unknown` with the raw diagnostic.

use crate::error::{
    InstallError, ManagerUnavailableSnafu, NetworkSnafu, PackageNotFoundSnafu,
    PermissionDeniedSnafu, UnknownSnafu, VersionUnsatisfiableSnafu,
};
use crate::exec::CommandOutput;

/// Shell convention for "command not found"
const EXIT_COMMAND_NOT_FOUND: i32 = 127;

const UNAVAILABLE_PATTERNS: &[&str] = &[
    "command not found",
    "no module named pip",
];

const PERMISSION_PATTERNS: &[&str] = &[
    "permission denied",
    "are you root",
    "must be run as root",
    "you cannot perform this operation unless you are root",
    "a password is required",
    "a terminal is required",
    "is not in the sudoers file",
    "not allowed to execute",
    "[errno 13]",
    "eacces",
    "this command has to be run with superuser privileges",
];

const NETWORK_PATTERNS: &[&str] = &[
    "temporary failure resolving",
    "temporary failure in name resolution",
    "could not resolve host",
    "failed to establish a new connection",
    "connection timed out",
    "read timed out",
    "connection reset",
    "connection refused",
    "network is unreachable",
    "failed to fetch",
    "failed retrieving file",
    "some index files failed to download",
    "curl error",
    "503 service unavailable",
    "502 bad gateway",
    "504 gateway timeout",
    "proxyerror",
    "sslerror",
];

const VERSION_PATTERNS: &[&str] = &[
    "resolutionimpossible",
    "conflicting dependencies",
    "unmet dependencies",
    "has no installation candidate",
    "version '",
    "requires a different python",
    "could not find a version that satisfies the requirement",
    "nothing provides",
];

const NOT_FOUND_PATTERNS: &[&str] = &[
    "unable to locate package",
    "no matching distribution found",
    "(from versions: none)",
    "no match for argument",
    "unable to find a match",
    "target not found",
    "no available formula",
    "no formulae or casks found",
    "no packages found",
];

/// Classify a failed install/probe run
///
/// The manager's diagnostic is preserved verbatim in the error.
pub fn classify_failure(manager: &str, output: &CommandOutput) -> InstallError {
    let message = output.diagnostic();
    let lower = output.combined_output().to_lowercase();

    if output.code == Some(EXIT_COMMAND_NOT_FOUND) || contains_any(&lower, UNAVAILABLE_PATTERNS) {
        return ManagerUnavailableSnafu {
            manager,
            reason: message,
        }
        .build();
    }

    if contains_any(&lower, PERMISSION_PATTERNS) {
        return PermissionDeniedSnafu { message }.build();
    }

    // Before not-found: pip reports "(from versions: none)" when the index is unreachable
    if contains_any(&lower, NETWORK_PATTERNS) {
        return NetworkSnafu { message }.build();
    }

    // "(from versions: none)" means the name is unknown, not the version
    if contains_any(&lower, VERSION_PATTERNS) && !lower.contains("(from versions: none)") {
        return VersionUnsatisfiableSnafu { message }.build();
    }

    if contains_any(&lower, NOT_FOUND_PATTERNS) {
        return PackageNotFoundSnafu { message }.build();
    }

    UnknownSnafu {
        message: if message.is_empty() {
            format!("{manager} exited with status {:?}", output.code)
        } else {
            message
        },
    }
    .build()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(100),
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_apt_unknown_package() {
        let out = failed(
            "Reading package lists...\nE: Unable to locate package povray-nonexistent\n",
        );
        let err = classify_failure("apt", &out);
        assert_eq!(err.label(), "PackageNotFound");
        assert!(err.to_string().contains("povray-nonexistent"));
    }

    #[test]
    fn test_apt_lock_without_root() {
        let out = failed(
            "E: Could not open lock file /var/lib/dpkg/lock-frontend - open (13: Permission denied)\n\
             E: Unable to acquire the dpkg frontend lock, are you root?",
        );
        assert_eq!(classify_failure("apt", &out).label(), "PermissionDenied");
    }

    #[test]
    fn test_sudo_needs_password() {
        let out = failed("sudo: a password is required\n");
        assert_eq!(classify_failure("apt", &out).label(), "PermissionDenied");
    }

    #[test]
    fn test_pip_unknown_package() {
        let out = failed(
            "ERROR: Could not find a version that satisfies the requirement polytopes-nope (from versions: none)\n\
             ERROR: No matching distribution found for polytopes-nope",
        );
        assert_eq!(classify_failure("pip", &out).label(), "PackageNotFound");
    }

    #[test]
    fn test_pip_version_unsatisfiable() {
        let out = failed(
            "ERROR: Could not find a version that satisfies the requirement numpy==0.0.1 (from versions: 1.3.0, 1.4.1)\n\
             ERROR: No matching distribution found for numpy==0.0.1",
        );
        assert_eq!(classify_failure("pip", &out).label(), "VersionUnsatisfiable");
    }

    #[test]
    fn test_pip_offline_is_transient() {
        let out = failed(
            "WARNING: Retrying (Retry(total=4, connect=None, read=None, redirect=None, status=None)) after connection broken by 'NewConnectionError(\"Failed to establish a new connection: [Errno -3] Temporary failure in name resolution\")'\n\
             ERROR: Could not find a version that satisfies the requirement numpy (from versions: none)",
        );
        let err = classify_failure("pip", &out);
        assert!(err.is_transient());
    }

    #[test]
    fn test_command_not_found_exit_code() {
        let out = CommandOutput {
            code: Some(127),
            success: false,
            stdout: String::new(),
            stderr: "sudo: apt-get: command not found".to_string(),
        };
        assert_eq!(classify_failure("apt", &out).label(), "ManagerUnavailable");
    }

    #[test]
    fn test_unknown_keeps_raw_diagnostic() {
        let out = failed("dpkg: error processing archive /tmp/x.deb (--unpack): corrupted");
        let err = classify_failure("apt", &out);
        assert_eq!(
            err,
            InstallError::Unknown {
                message: "dpkg: error processing archive /tmp/x.deb (--unpack): corrupted"
                    .to_string()
            }
        );
    }

    #[test]
    fn test_silent_failure_mentions_exit_status() {
        let out = failed("");
        assert!(classify_failure("brew", &out).to_string().contains("Some(100)"));
    }
}

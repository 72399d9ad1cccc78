//! Version constraints attached to declarations
//!
//! Parses requirement specifiers such as `>=1.24`, `==3.7.*` or `>=1,<2` and
//! checks them against whatever version string a package manager reports.
//! Ordering reads the first numeric run of a manager version plus anything
//! that changes its order: further components (`3.7.0.10`) and pre-release
//! tags (`2.0.0rc1`, `1.0~beta`). Epochs and distro revisions are ignored
//! there, so `1:4.4.2-0ubuntu1` orders as `4.4.2`. An `==`/`!=` pin that is
//! not a plain `N[.N[.N]]` is compared as the whole string.

use anyhow::{Context, Result};
use semver::Version;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    /// `~=`: at least this version, within the same release series
    Compatible,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Compatible => "~=",
        }
    }
}

/// One `<op><version>` clause
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clause {
    pub op: Op,
    pub version: String,
}

impl Clause {
    fn parse(text: &str) -> std::result::Result<Self, String> {
        let text = text.trim();
        // Two-character operators first so ">=" is not read as ">"
        let (op, rest) = if let Some(rest) = text.strip_prefix("==") {
            (Op::Eq, rest)
        } else if let Some(rest) = text.strip_prefix("!=") {
            (Op::Ne, rest)
        } else if let Some(rest) = text.strip_prefix(">=") {
            (Op::Ge, rest)
        } else if let Some(rest) = text.strip_prefix("<=") {
            (Op::Le, rest)
        } else if let Some(rest) = text.strip_prefix("~=") {
            (Op::Compatible, rest)
        } else if let Some(rest) = text.strip_prefix('>') {
            (Op::Gt, rest)
        } else if let Some(rest) = text.strip_prefix('<') {
            (Op::Lt, rest)
        } else if let Some(rest) = text.strip_prefix('=') {
            (Op::Eq, rest)
        } else {
            return Err(format!("missing comparison operator in {text:?}"));
        };

        let version = rest.trim();
        if parse_required(version).is_none() {
            return Err(format!("unrecognised version {version:?}"));
        }
        if op == Op::Compatible && version.ends_with(".*") {
            return Err("`~=` does not accept wildcards".to_string());
        }

        Ok(Clause {
            op,
            version: version.to_string(),
        })
    }

    fn matches(&self, installed: &str) -> Result<bool> {
        let Some(required) = parse_required(&self.version) else {
            return Ok(false);
        };

        // Distro pins carry epochs and revisions; only the exact string will do
        if matches!(self.op, Op::Eq | Op::Ne) && !required.plain {
            let same = installed.trim() == self.version;
            return Ok(if self.op == Op::Eq { same } else { !same });
        }

        let detail = ReleaseDetail::parse(installed)
            .with_context(|| format!("Failed to parse installed version: {installed}"))?;

        if required.wildcard {
            let prefix = required.prefix_matches(&detail.core);
            return Ok(if self.op == Op::Ne { !prefix } else { prefix });
        }

        let ordering = detail.compare(&required.detail).with_context(|| {
            format!("Cannot order pre-release {installed} against {}", self.version)
        })?;

        Ok(match self.op {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Ge => ordering != Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
            Op::Gt => ordering == Ordering::Greater,
            Op::Lt => ordering == Ordering::Less,
            Op::Compatible => {
                // ~=1.4.2 means >=1.4.2 and ==1.4.*; ~=2 degrades to >=2
                let series = RequiredVersion {
                    components: required.components.saturating_sub(1).max(1),
                    wildcard: true,
                    ..required.clone()
                };
                ordering != Ordering::Less
                    && (required.components < 2 || series.prefix_matches(&detail.core))
            }
        })
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.as_str(), self.version)
    }
}

/// All clauses must hold (`>=1.0,<2.0`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionConstraint {
    pub clauses: Vec<Clause>,
}

impl VersionConstraint {
    /// Parse a comma-separated specifier list. Empty input is not a constraint.
    pub fn parse(text: &str) -> std::result::Result<Option<Self>, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let clauses = text
            .split(',')
            .map(Clause::parse)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Some(VersionConstraint { clauses }))
    }

    /// The exact version pinned by a lone `==` clause, if that is all this says
    pub fn pinned(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [clause] if clause.op == Op::Eq && !clause.version.ends_with(".*") => {
                Some(clause.version.as_str())
            }
            _ => None,
        }
    }

    /// Check a version string as reported by a package manager
    pub fn matches(&self, installed: &str) -> Result<bool> {
        for clause in &self.clauses {
            if !clause.matches(installed)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// Extract a semantic version from manager output
/// Handles various formats:
///   "1:4.4.2-0ubuntu0.22.04.1" -> 4.4.2
///   "3.7.0.10-1" -> 3.7.0
///   "2.34" -> 2.34.0
pub fn extract_version(output: &str) -> Option<Version> {
    ReleaseDetail::parse(output).map(|detail| detail.core)
}

/// The orderable part of a version string
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReleaseDetail {
    core: Version,
    /// Numeric components after the patch (`3.7.0.10` keeps `[10]`)
    extra: Vec<u64>,
    /// A pre-release tag follows the numbers (`rc1`, `.dev0`, `~beta`)
    pre_release: bool,
}

impl ReleaseDetail {
    fn parse(text: &str) -> Option<Self> {
        let re = regex::Regex::new(
            r"(\d+)\.(\d+)(?:\.(\d+))?((?:\.\d+)*)(~|[-._]?(?i:alpha|beta|preview|pre|rc|dev|a|b|c)\d*\b)?",
        )
        .ok()?;
        let cap = re.captures(text)?;
        let part = |i: usize| -> Option<u64> {
            cap.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
        };
        let extra = cap
            .get(4)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<std::result::Result<Vec<u64>, _>>()
            .ok()?;

        Some(ReleaseDetail {
            core: Version::new(part(1)?, part(2)?, part(3)?),
            extra,
            pre_release: cap.get(5).is_some(),
        })
    }

    /// `None` when both sides are pre-releases of the same release; their tags
    /// do not order reliably across managers
    fn compare(&self, other: &ReleaseDetail) -> Option<Ordering> {
        let numeric = self.core.cmp(&other.core).then_with(|| {
            let len = self.extra.len().max(other.extra.len());
            let padded = |extra: &[u64], i: usize| extra.get(i).copied().unwrap_or(0);
            (0..len)
                .map(|i| padded(&self.extra, i).cmp(&padded(&other.extra, i)))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        if numeric.is_ne() {
            return Some(numeric);
        }

        match (self.pre_release, other.pre_release) {
            (false, false) => Some(Ordering::Equal),
            (true, false) => Some(Ordering::Less),
            (false, true) => Some(Ordering::Greater),
            (true, true) => None,
        }
    }
}

#[derive(Debug, Clone)]
struct RequiredVersion {
    detail: ReleaseDetail,
    /// How many numeric components the user actually wrote
    components: usize,
    wildcard: bool,
    /// Written as `N[.N[.N]][.*]`
    plain: bool,
}

impl RequiredVersion {
    fn prefix_matches(&self, installed: &Version) -> bool {
        let version = &self.detail.core;
        let wanted = [version.major, version.minor, version.patch];
        let have = [installed.major, installed.minor, installed.patch];
        wanted
            .iter()
            .zip(have.iter())
            .take(self.components)
            .all(|(a, b)| a == b)
    }
}

/// Parse the version side of a clause. Plain `1`, `1.4`, `1.4.*` keep track of
/// how many components were written; distro strings such as
/// `7:4.4.2-0ubuntu1` are read with [`ReleaseDetail::parse`].
fn parse_required(text: &str) -> Option<RequiredVersion> {
    let re = regex::Regex::new(r"^v?(\d+)(?:\.(\d+))?(?:\.(\d+))?(\.\*)?$").ok()?;
    let Some(cap) = re.captures(text.trim()) else {
        return ReleaseDetail::parse(text).map(|detail| RequiredVersion {
            detail,
            components: 3,
            wildcard: false,
            plain: false,
        });
    };

    let mut components = 0;
    let mut part = |i: usize| -> Option<u64> {
        match cap.get(i) {
            Some(m) => {
                components += 1;
                m.as_str().parse().ok()
            }
            None => Some(0),
        }
    };
    let major = part(1)?;
    let minor = part(2)?;
    let patch = part(3)?;

    Some(RequiredVersion {
        detail: ReleaseDetail {
            core: Version::new(major, minor, patch),
            extra: Vec::new(),
            pre_release: false,
        },
        components,
        wildcard: cap.get(4).is_some(),
        plain: true,
    })
}

//! Provisioning report: one result per declaration plus the overall verdict
//!
//! Rendered for humans on stdout, or serialised as TOML (report file) and
//! JSON (`--json`) from the same flat document.

use crate::error::InstallError;
use crate::manifest::{Declaration, ManagerKind};
use crate::provision::RunState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-declaration outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AlreadySatisfied,
    Installed,
    /// Dry runs only: missing, but nothing was attempted
    WouldInstall,
    Failed(InstallError),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn status(&self) -> &'static str {
        match self {
            Outcome::AlreadySatisfied => "already_satisfied",
            Outcome::Installed => "installed",
            Outcome::WouldInstall => "would_install",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn error(&self) -> Option<&InstallError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    pub declaration: Declaration,
    pub outcome: Outcome,
    /// Version seen by the probe (or re-probe after installing)
    pub installed_version: Option<String>,
    /// Install invocations made for this declaration's batch
    pub attempts: u32,
}

impl InstallResult {
    pub fn new(declaration: Declaration, outcome: Outcome) -> Self {
        Self {
            declaration,
            outcome,
            installed_version: None,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub state: RunState,
    /// In manifest order
    pub results: Vec<InstallResult>,
}

impl Report {
    /// True iff no declaration failed
    pub fn success(&self) -> bool {
        !self.results.iter().any(|r| r.outcome.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstallResult> {
        self.results.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn count(&self, status: &str) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.status() == status)
            .count()
    }

    pub fn result_for(&self, manager: ManagerKind, name: &str) -> Option<&InstallResult> {
        self.results
            .iter()
            .find(|r| r.declaration.manager == manager && r.declaration.name == name)
    }

    /// 0 on success; the failure class's code when all failures share one; 1 otherwise
    pub fn exit_code(&self) -> i32 {
        let codes: BTreeSet<i32> = self
            .failures()
            .filter_map(|r| r.outcome.error())
            .map(InstallError::exit_code)
            .collect();

        match codes.len() {
            0 => 0,
            1 => codes.into_iter().next().unwrap_or(1),
            _ => 1,
        }
    }

    fn document(&self) -> ReportDocument<'_> {
        ReportDocument {
            meta: Meta {
                tool: "pr0v",
                version: env!("CARGO_PKG_VERSION"),
                started_at: self.started_at.to_rfc3339(),
                finished_at: self.finished_at.to_rfc3339(),
                dry_run: self.dry_run,
                state: self.state.to_string(),
            },
            summary: Summary {
                success: self.success(),
                total: self.results.len(),
                already_satisfied: self.count("already_satisfied"),
                installed: self.count("installed"),
                would_install: self.count("would_install"),
                failed: self.count("failed"),
            },
            results: self
                .results
                .iter()
                .map(|r| Row {
                    name: &r.declaration.name,
                    manager: r.declaration.manager.as_str(),
                    requirement: &r.declaration.spec,
                    status: r.outcome.status(),
                    reason_kind: r.outcome.error().map(InstallError::label),
                    reason: r.outcome.error().map(ToString::to_string),
                    installed_version: r.installed_version.as_deref(),
                    attempts: r.attempts,
                })
                .collect(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.document()).context("Failed to serialise report as TOML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.document()).context("Failed to serialise report as JSON")
    }

    /// Write the TOML report, expanding `~` and creating parent directories
    pub fn write_to(&self, output_path: &Path) -> Result<PathBuf> {
        let expanded = shellexpand::tilde(&output_path.to_string_lossy()).into_owned();
        let final_path = PathBuf::from(expanded);

        if let Some(parent) = final_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory: {}", parent.display())
                })?;
            }
        }

        fs::write(&final_path, self.to_toml()?)
            .with_context(|| format!("Failed to write report to {}", final_path.display()))?;

        Ok(final_path)
    }

    /// Human-readable status list plus summary
    pub fn render(&self) -> String {
        let mut out = String::new();

        let title = if self.dry_run {
            "🥾 pr0v provisioning report (dry run)"
        } else {
            "🥾 pr0v provisioning report"
        };
        let _ = writeln!(out, "{title}");
        let _ = writeln!(out, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        let _ = writeln!(out, "Started:  {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "Finished: {}", self.finished_at.to_rfc3339());

        for kind in ManagerKind::ALL {
            let group: Vec<&InstallResult> = self
                .results
                .iter()
                .filter(|r| r.declaration.manager == kind)
                .collect();
            if group.is_empty() {
                continue;
            }

            let _ = writeln!(out);
            let _ = match kind {
                ManagerKind::Os => writeln!(out, "📦 OS packages:"),
                ManagerKind::Language => writeln!(out, "🐍 Language packages:"),
            };

            for result in group {
                let _ = writeln!(out, "  {}", render_line(result));
            }
        }

        let _ = writeln!(out);
        let total = self.results.len();
        if self.success() {
            if self.dry_run && self.count("would_install") > 0 {
                let _ = writeln!(
                    out,
                    "🔍 {} of {} dependencies would be installed",
                    self.count("would_install"),
                    total
                );
            } else {
                let _ = writeln!(out, "✅ All {total} dependencies satisfied!");
            }
        } else {
            let failed: Vec<&InstallResult> = self.failures().collect();
            let _ = writeln!(out, "⚠️  {} of {} dependencies failed:", failed.len(), total);
            for result in failed {
                if let Some(err) = result.outcome.error() {
                    let _ = writeln!(out, "  ❌ {} [{}]", result.declaration, err.label());
                    for line in err.to_string().lines() {
                        let _ = writeln!(out, "     {line}");
                    }
                }
            }
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "ℹ️  Fix the failures above and re-run; satisfied dependencies are skipped."
            );
        }

        out
    }
}

fn render_line(result: &InstallResult) -> String {
    let spec = &result.declaration.spec;
    let version = result
        .installed_version
        .as_deref()
        .map(|v| format!(" ({v})"))
        .unwrap_or_default();

    match &result.outcome {
        Outcome::AlreadySatisfied => format!("✅ {spec}{version} already satisfied"),
        Outcome::Installed => format!("✨ {spec}{version} installed"),
        Outcome::WouldInstall => format!("🔍 {spec}{version} would install"),
        Outcome::Failed(err) => {
            let retries = if result.attempts > 1 {
                format!(" after {} attempts", result.attempts)
            } else {
                String::new()
            };
            format!("❌ {spec} failed({}){retries}", err.label())
        }
    }
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    meta: Meta,
    summary: Summary,
    results: Vec<Row<'a>>,
}

#[derive(Serialize)]
struct Meta {
    tool: &'static str,
    version: &'static str,
    started_at: String,
    finished_at: String,
    dry_run: bool,
    state: String,
}

#[derive(Serialize)]
struct Summary {
    success: bool,
    total: usize,
    already_satisfied: usize,
    installed: usize,
    would_install: usize,
    failed: usize,
}

#[derive(Serialize)]
struct Row<'a> {
    name: &'a str,
    manager: &'static str,
    requirement: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    installed_version: Option<&'a str>,
    attempts: u32,
}

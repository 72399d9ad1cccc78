//! Provisioner: probe, batch-install and report, one manager group at a time
//!
//! Groups run OS first, then language packages. A failing group never stops
//! the next one; every declaration gets exactly one result.

use crate::error::{InstallError, ManagerUnavailableSnafu, VersionUnsatisfiableSnafu};
use crate::exec::{CancelFlag, RunControl};
use crate::managers::{PackageManager, Probe};
use crate::manifest::{Declaration, Manifest, ManagerKind};
use crate::report::{InstallResult, Outcome, Report};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a run is; logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Probing,
    Installing,
    Done { success: bool },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not_started"),
            RunState::Probing => write!(f, "probing"),
            RunState::Installing => write!(f, "installing"),
            RunState::Done { success: true } => write!(f, "done(success)"),
            RunState::Done { success: false } => write!(f, "done(partial_failure)"),
        }
    }
}

fn transition(state: &mut RunState, next: RunState) {
    if *state != next {
        debug!("run state {} -> {}", state, next);
        *state = next;
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Probe only; unsatisfied declarations become `would_install`
    pub dry_run: bool,
    /// Deadline for each external command
    pub timeout: Option<Duration>,
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Print emoji progress lines on stdout
    pub progress: bool,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            timeout: None,
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
            progress: false,
        }
    }
}

pub struct Provisioner {
    managers: Vec<Box<dyn PackageManager>>,
    options: ProvisionOptions,
    cancel: CancelFlag,
}

impl Provisioner {
    pub fn new(managers: Vec<Box<dyn PackageManager>>, options: ProvisionOptions) -> Self {
        Self {
            managers,
            options,
            cancel: CancelFlag::new(),
        }
    }

    /// Share an externally held cancel flag (e.g. one set from a Ctrl-C handler)
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn manager_for(&self, kind: ManagerKind) -> Option<&dyn PackageManager> {
        self.managers
            .iter()
            .find(|m| m.kind() == kind)
            .map(|m| &**m)
    }

    fn control(&self) -> RunControl {
        RunControl {
            timeout: self.options.timeout,
            cancel: self.cancel.clone(),
        }
    }

    fn say(&self, line: impl AsRef<str>) {
        if self.options.progress {
            println!("{}", line.as_ref());
        }
    }

    /// Bring the machine in line with the manifest. Always returns a report.
    pub fn provision(&self, manifest: &Manifest) -> Report {
        let started_at = Utc::now();
        let mut state = RunState::NotStarted;
        info!(
            "provisioning {} declarations (dry_run={})",
            manifest.len(),
            self.options.dry_run
        );

        let mut slots: Vec<Option<InstallResult>> = vec![None; manifest.len()];
        for kind in manifest.kinds() {
            let group = manifest.group(kind);
            for (index, result) in self.run_group(kind, &group, &mut state) {
                slots[index] = Some(result);
            }
        }

        let results: Vec<InstallResult> = slots.into_iter().flatten().collect();
        let success = !results.iter().any(|r| r.outcome.is_failure());
        transition(&mut state, RunState::Done { success });

        Report {
            started_at,
            finished_at: Utc::now(),
            dry_run: self.options.dry_run,
            state,
            results,
        }
    }

    fn run_group(
        &self,
        kind: ManagerKind,
        group: &[(usize, &Declaration)],
        state: &mut RunState,
    ) -> Vec<(usize, InstallResult)> {
        let fail_all = |error: InstallError| -> Vec<(usize, InstallResult)> {
            group
                .iter()
                .map(|(index, declaration)| {
                    (
                        *index,
                        InstallResult::new((*declaration).clone(), Outcome::Failed(error.clone())),
                    )
                })
                .collect()
        };

        if self.cancel.is_cancelled() {
            return fail_all(InstallError::Cancelled);
        }

        let Some(manager) = self.manager_for(kind) else {
            warn!("no {} package manager configured", kind);
            return fail_all(
                ManagerUnavailableSnafu {
                    manager: kind.as_str(),
                    reason: "no package manager configured",
                }
                .build(),
            );
        };

        let control = self.control();
        transition(state, RunState::Probing);
        self.say(format!("🔍 Checking {} {} packages with {}...", group.len(), kind, manager.name()));

        if let Err(e) = manager.check_available(&control) {
            warn!("{} unavailable: {}", manager.name(), e);
            self.say(format!("  ❌ {e}"));
            return fail_all(e);
        }

        let mut results: Vec<(usize, InstallResult)> = Vec::with_capacity(group.len());
        // Positions in `group` (and `results`) still needing an install
        let mut pending: Vec<usize> = Vec::new();

        for (index, declaration) in group {
            let probe = manager.probe(declaration, &control);
            debug!("probe {}: {:?}", declaration, probe);

            let mut result = InstallResult::new((*declaration).clone(), Outcome::AlreadySatisfied);
            result.installed_version = probe.installed_version().map(ToString::to_string);

            match &probe {
                Probe::Satisfied { .. } => {
                    self.say(format!("  ✅ {declaration} already satisfied"));
                }
                Probe::Outdated { version } => {
                    self.say(format!("  ⬆️  {declaration} has {version}"));
                    result.outcome = Outcome::WouldInstall;
                    pending.push(results.len());
                }
                Probe::Missing => {
                    self.say(format!("  📦 {declaration} missing"));
                    result.outcome = Outcome::WouldInstall;
                    pending.push(results.len());
                }
                Probe::Unknown { reason } => {
                    // 🤓 unknown means "attempt install", never a failure on its own
                    warn!("could not probe {}: {}", declaration, reason);
                    result.outcome = Outcome::WouldInstall;
                    pending.push(results.len());
                }
            }
            results.push((*index, result));
        }

        // A probe interrupted by cancel looks unknown; it must not pass as would_install
        if self.cancel.is_cancelled() {
            for &position in &pending {
                results[position].1.outcome = Outcome::Failed(InstallError::Cancelled);
            }
            return results;
        }

        if pending.is_empty() || self.options.dry_run {
            return results;
        }

        transition(state, RunState::Installing);
        let batch: Vec<&Declaration> = pending.iter().map(|&position| group[position].1).collect();
        let names: Vec<&str> = batch.iter().map(|d| d.spec.as_str()).collect();
        self.say(format!("🔧 Installing with {}: {}", manager.name(), names.join(" ")));

        let (outcome, attempts) = self.install_with_retry(manager, &batch, &control);
        if let Err(e) = &outcome {
            self.say(format!("  ❌ {} batch failed: {}", manager.name(), e.label()));
        }

        for &position in &pending {
            let result = &mut results[position].1;
            result.attempts = attempts;
            result.outcome = match &outcome {
                Ok(()) => {
                    let (confirmed, version) = self.confirm(manager, &result.declaration, &control);
                    if version.is_some() {
                        result.installed_version = version;
                    }
                    confirmed
                }
                Err(e) => Outcome::Failed(e.clone()),
            };
            if result.outcome == Outcome::Installed {
                self.say(format!("  ✨ {} installed", result.declaration));
            }
        }

        results
    }

    /// Bounded retry: only transient failures get another attempt
    fn install_with_retry(
        &self,
        manager: &dyn PackageManager,
        batch: &[&Declaration],
        control: &RunControl,
    ) -> (Result<(), InstallError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!("{} install attempt {} for {} packages", manager.name(), attempts, batch.len());

            match manager.install(batch, control) {
                Ok(()) => return (Ok(()), attempts),
                Err(e) if e.is_transient() && attempts <= self.options.max_retries => {
                    warn!("{} attempt {} failed transiently: {}", manager.name(), attempts, e);
                    self.say(format!(
                        "  🔁 {} failed ({}), retrying in {}",
                        manager.name(),
                        e.label(),
                        humantime::format_duration(self.options.retry_delay)
                    ));
                    if !self.cancel.sleep(self.options.retry_delay) {
                        return (Err(InstallError::Cancelled), attempts);
                    }
                }
                Err(e) => return (Err(e), attempts),
            }
        }
    }

    /// Re-probe after a successful batch so the recorded version is real and
    /// a manager that installed the wrong version is caught
    fn confirm(
        &self,
        manager: &dyn PackageManager,
        declaration: &Declaration,
        control: &RunControl,
    ) -> (Outcome, Option<String>) {
        match manager.probe(declaration, control) {
            Probe::Outdated { version } => {
                let wanted = declaration
                    .constraint
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                let error = VersionUnsatisfiableSnafu {
                    message: format!(
                        "{} reports {} after install, which does not satisfy {}",
                        declaration.name, version, wanted
                    ),
                }
                .build();
                (Outcome::Failed(error), Some(version))
            }
            probe => (
                Outcome::Installed,
                probe.installed_version().map(ToString::to_string),
            ),
        }
    }
}

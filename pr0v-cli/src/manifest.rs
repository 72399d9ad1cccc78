//! Declarative dependency manifest
//!
//! A manifest file is TOML:
//!
//! ```toml
//! [os]
//! packages = ["graphviz", "povray>=3.7"]
//!
//! [language]
//! requirements = "requirements.txt"   # relative to the manifest file
//! packages = ["numpy>=1.24"]
//! ```
//!
//! Language requirements use pip's line format; see [`parse_requirements`].

use crate::constraint::VersionConstraint;
use crate::error::{
    DuplicateSnafu, EmptySnafu, InvalidRequirementSnafu, ManifestError, ParseSnafu, ReadSnafu,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

/// Manifest used when none is given and `pr0v.toml` is absent
const EMBEDDED_MANIFEST: &str = include_str!("../assets/default-manifest.toml");

/// Which package manager owns a declaration. OS packages are always handled first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerKind {
    Os,
    Language,
}

impl ManagerKind {
    /// Processing order for manager groups
    pub const ALL: [ManagerKind; 2] = [ManagerKind::Os, ManagerKind::Language];

    pub fn as_str(self) -> &'static str {
        match self {
            ManagerKind::Os => "os",
            ManagerKind::Language => "language",
        }
    }
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One required package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub manager: ManagerKind,
    pub constraint: Option<VersionConstraint>,
    /// Requirement text as written; pip receives it verbatim (extras, markers)
    pub spec: String,
}

impl Declaration {
    /// Parse `name`, `name>=1.0`, `name[extra]==2.0; python_version>"3.8"`, ...
    pub fn parse(text: &str, manager: ManagerKind) -> Result<Self, ManifestError> {
        let spec = text.trim();
        // Environment markers are pip's business; they never affect the name key
        let requirement = spec.split(';').next().unwrap_or_default().trim();

        let name_pattern = match manager {
            ManagerKind::Os => r"^([A-Za-z0-9][A-Za-z0-9.+_:@/-]*)\s*(.*)$",
            ManagerKind::Language => r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(\[[^\]]*\])?\s*(.*)$",
        };
        let re = regex::Regex::new(name_pattern).map_err(|e| {
            InvalidRequirementSnafu {
                text: spec,
                reason: e.to_string(),
            }
            .build()
        })?;

        let caps = re.captures(requirement).ok_or_else(|| {
            InvalidRequirementSnafu {
                text: spec,
                reason: "expected a package name",
            }
            .build()
        })?;

        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let rest = caps
            .get(caps.len() - 1)
            .map(|m| m.as_str())
            .unwrap_or_default();

        let constraint = VersionConstraint::parse(rest)
            .map_err(|reason| InvalidRequirementSnafu { text: spec, reason }.build())?;

        Ok(Declaration {
            name: name.to_string(),
            manager,
            constraint,
            spec: spec.to_string(),
        })
    }

    /// Identity used for the uniqueness invariant
    pub fn key(&self) -> String {
        match self.manager {
            ManagerKind::Os => self.name.clone(),
            ManagerKind::Language => normalize_python_name(&self.name),
        }
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.manager, self.spec)
    }
}

/// PEP 503 normalisation: case-insensitive, runs of `-_.` are equivalent
pub fn normalize_python_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    normalized
}

/// Parse pip requirements-file text into declarations
///
/// Blank lines and comments are skipped, inline comments are stripped and
/// option lines (`-r`, `-e`, `--index-url`, ...) are ignored with a warning.
pub fn parse_requirements(text: &str) -> Result<Vec<Declaration>, ManifestError> {
    let mut declarations = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = match raw.find(" #").or_else(|| raw.find("\t#")) {
            Some(pos) => &raw[..pos],
            None => raw,
        };
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('-') {
            tracing::warn!("requirements line {}: skipping option {:?}", index + 1, line);
            continue;
        }

        declarations.push(Declaration::parse(line, ManagerKind::Language)?);
    }

    Ok(declarations)
}

/// Ordered, validated, immutable list of declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    declarations: Vec<Declaration>,
}

impl Manifest {
    /// Validate and wrap declarations: non-empty, names unique per manager
    pub fn new(declarations: Vec<Declaration>) -> Result<Self, ManifestError> {
        ensure!(!declarations.is_empty(), EmptySnafu);

        let mut seen = HashSet::new();
        for declaration in &declarations {
            ensure!(
                seen.insert((declaration.manager, declaration.key())),
                DuplicateSnafu {
                    manager: declaration.manager,
                    name: declaration.name.clone(),
                }
            );
        }

        Ok(Manifest { declarations })
    }

    /// Load a manifest file; its `requirements` path is relative to the file
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).context(ReadSnafu { path })?;
        let file: ManifestFile = toml::from_str(&content).context(ParseSnafu { path })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        file.into_manifest(base_dir)
    }

    /// The manifest compiled into the binary
    pub fn embedded() -> Result<Self, ManifestError> {
        let file: ManifestFile = toml::from_str(EMBEDDED_MANIFEST).context(ParseSnafu {
            path: "<embedded>",
        })?;
        file.into_manifest(Path::new("."))
    }

    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Declarations owned by one manager, with their manifest positions
    pub fn group(&self, kind: ManagerKind) -> Vec<(usize, &Declaration)> {
        self.declarations
            .iter()
            .enumerate()
            .filter(|(_, d)| d.manager == kind)
            .collect()
    }

    /// Manager kinds present, in processing order
    pub fn kinds(&self) -> Vec<ManagerKind> {
        ManagerKind::ALL
            .into_iter()
            .filter(|kind| self.declarations.iter().any(|d| d.manager == *kind))
            .collect()
    }
}

/// On-disk manifest shape
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    #[serde(default)]
    os: OsSection,
    #[serde(default)]
    language: LanguageSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OsSection {
    #[serde(default)]
    packages: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LanguageSection {
    #[serde(default)]
    requirements: Option<PathBuf>,
    #[serde(default)]
    packages: Vec<String>,
}

impl ManifestFile {
    fn into_manifest(self, base_dir: &Path) -> Result<Manifest, ManifestError> {
        let mut declarations = Vec::new();

        for package in &self.os.packages {
            declarations.push(Declaration::parse(package, ManagerKind::Os)?);
        }

        if let Some(requirements) = &self.language.requirements {
            let path = resolve_path(base_dir, requirements);
            let text = std::fs::read_to_string(&path).context(ReadSnafu { path: &path })?;
            declarations.extend(parse_requirements(&text)?);
        }

        for package in &self.language.packages {
            declarations.push(Declaration::parse(package, ManagerKind::Language)?);
        }

        Manifest::new(declarations)
    }
}

/// Expand `~` and anchor relative paths at the manifest's directory
fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

// Purpose: Declared-dependency model and the loaders that fill it from project manifests.
// Inputs/Outputs: Reads pyproject.toml / requirements.txt under a project root into RequirementRecords.
// Invariants: Output is ordered, deduplicated by normalized key (first wins), production deps only.
// Gotchas: Dialect order is fixed (PEP 621, Poetry, requirements file); a malformed pyproject never falls through.

pub mod pyproject;
pub mod requirement;
pub mod requirements_txt;

use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ManifestError;
use crate::version::Version;

pub use requirement::{Clause, Op, Specifier, parse_requirement};

pub const PYPROJECT_FILE: &str = "pyproject.toml";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Canonical comparison key for a distribution or import name.
///
/// Lower-cases and collapses every run of `-`, `_` and `.` into a single `-`,
/// so `Typing_Extensions`, `typing.extensions` and `typing-extensions` agree.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            if !in_sep {
                out.push('-');
            }
            in_sep = true;
        } else {
            out.push(ch.to_ascii_lowercase());
            in_sep = false;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementRecord {
    /// Name as written in the manifest.
    pub name: String,
    /// Normalized name used for every comparison.
    pub key: String,
    pub extras: Vec<String>,
    pub specifier: Option<Specifier>,
    pub marker: Option<String>,
    pub url: Option<String>,
    pub pinned: bool,
}

impl RequirementRecord {
    pub fn new(name: impl Into<String>, specifier: Option<Specifier>) -> Self {
        let name = name.into();
        let key = normalize_name(&name);
        let pinned = specifier
            .as_ref()
            .and_then(Specifier::pinned_version)
            .is_some();
        Self {
            name,
            key,
            extras: Vec::new(),
            specifier,
            marker: None,
            url: None,
            pinned,
        }
    }

    pub fn pinned_version(&self) -> Option<Version> {
        self.specifier.as_ref().and_then(Specifier::pinned_version)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Pep621,
    Poetry,
    Requirements,
}

impl Dialect {
    pub const PRIORITY: [Dialect; 3] = [Dialect::Pep621, Dialect::Poetry, Dialect::Requirements];

    pub fn manifest_path(self, project_root: &Path) -> PathBuf {
        match self {
            Dialect::Pep621 | Dialect::Poetry => project_root.join(PYPROJECT_FILE),
            Dialect::Requirements => project_root.join(REQUIREMENTS_FILE),
        }
    }

    /// Cheap probe: does this dialect's manifest exist and carry its dependency table?
    ///
    /// A pyproject.toml that fails to parse is claimed by the structured
    /// dialects so the parse error surfaces instead of being skipped.
    pub fn can_parse(self, project_root: &Path) -> bool {
        let path = self.manifest_path(project_root);
        if !path.is_file() {
            return false;
        }
        match self {
            Dialect::Pep621 => match pyproject::PyProject::read(&path) {
                Ok(doc) => doc.has_pep621_dependencies(),
                Err(_) => true,
            },
            Dialect::Poetry => match pyproject::PyProject::read(&path) {
                Ok(doc) => doc.has_poetry_dependencies(),
                Err(_) => true,
            },
            Dialect::Requirements => true,
        }
    }

    pub fn parse(self, project_root: &Path) -> Result<DeclaredDeps, ManifestError> {
        let path = self.manifest_path(project_root);
        let requirements = match self {
            Dialect::Pep621 => pyproject::PyProject::read(&path)?.pep621_requirements(&path)?,
            Dialect::Poetry => pyproject::PyProject::read(&path)?.poetry_requirements(&path)?,
            Dialect::Requirements => {
                if !path.is_file() {
                    debug!(path = %path.display(), "no requirements file; nothing declared");
                    Vec::new()
                } else {
                    requirements_txt::read_requirements(&path)?
                }
            }
        };
        Ok(DeclaredDeps {
            dialect: self,
            path,
            requirements: dedupe(requirements),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeclaredDeps {
    pub dialect: Dialect,
    pub path: PathBuf,
    pub requirements: Vec<RequirementRecord>,
}

fn dedupe(records: Vec<RequirementRecord>) -> Vec<RequirementRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|r| seen.insert(r.key.clone()))
        .collect()
}

/// Loads the declared dependencies using the first dialect whose probe succeeds.
pub fn load_declared(project_root: &Path) -> Result<DeclaredDeps, ManifestError> {
    for dialect in Dialect::PRIORITY {
        if dialect.can_parse(project_root) {
            let deps = dialect.parse(project_root)?;
            debug!(
                dialect = ?deps.dialect,
                path = %deps.path.display(),
                count = deps.requirements.len(),
                "loaded declared dependencies"
            );
            return Ok(deps);
        }
    }
    Err(ManifestError::NoDeclaredDependencies(
        project_root.to_path_buf(),
    ))
}

/// Loads one dialect explicitly, bypassing the priority probe.
pub fn load_dialect(project_root: &Path, dialect: Dialect) -> Result<DeclaredDeps, ManifestError> {
    dialect.parse(project_root)
}

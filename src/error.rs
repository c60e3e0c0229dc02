// Purpose: Error taxonomy shared by the manifest, scan, freshness and audit layers.
// Inputs/Outputs: Typed errors for library callers; the CLI folds them into anyhow.
// Invariants: Manifest and source-root failures are fatal; scan and registry failures are records.
// Gotchas: Registry errors are cloned to every single-flight waiter, so they must stay `Clone`.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Where inside a manifest a parse failure was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Line(usize),
    Field(String),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Line(n) => write!(f, "line {}", n),
            Location::Field(name) => write!(f, "field `{}`", name),
        }
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("{}: {location}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        location: Location,
        message: String,
    },
    #[error(
        "no declared dependencies found under {} (looked for pyproject.toml [project] / [tool.poetry] and requirements.txt)",
        .0.display()
    )]
    NoDeclaredDependencies(PathBuf),
    #[error("read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ManifestError {
    pub(crate) fn parse(
        path: impl Into<PathBuf>,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        ManifestError::Parse {
            path: path.into(),
            location,
            message: message.into(),
        }
    }
}

/// One source file the import scanner could not read or tokenize.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ScanError {
    pub path: PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path.display(), line, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("`{0}` is not known to the registry")]
    NotFound(String),
    #[error("registry request for `{name}` failed: {message}")]
    Transport { name: String, message: String },
    #[error("registry answer for `{name}` is malformed: {message}")]
    Malformed { name: String, message: String },
    #[error("registry lookup for `{0}` timed out")]
    TimedOut(String),
}

impl RegistryError {
    /// Transport failures may succeed on a second attempt; the rest will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::Transport { .. })
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("source root {}: {source}", .path.display())]
    SourceRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("installed environment: {0}")]
    Environment(String),
}

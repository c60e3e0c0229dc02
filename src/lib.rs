// Purpose: Crate surface for the dependency auditor library and its two binaries.
// Inputs/Outputs: Re-exports the engine (manifest, scan, reconcile, freshness, gate) plus app layers.
// Invariants: Library modules return typed errors; only config/installed/report/cli speak anyhow.
// Gotchas: Keep module wiring consistent with src/main.rs and src/bin/depsight-gate.rs entry paths.

pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod freshness;
pub mod gate;
pub mod installed;
pub mod manifest;
pub mod reconcile;
pub mod report;
pub mod scan;
pub mod version;

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DEPSIGHT_GIT_COMMIT"),
    ")"
);

pub const USER_AGENT: &str = concat!(
    "depsight/",
    env!("CARGO_PKG_VERSION"),
    " (+",
    env!("DEPSIGHT_GIT_COMMIT"),
    ")"
);

pub use audit::{AuditReport, AuditRequest, Auditor};
pub use error::{AuditError, ManifestError, RegistryError, ScanError};
pub use gate::{AuditSummary, ExitStatus, Mode, Policy};

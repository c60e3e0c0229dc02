// Purpose: One audit run: load declarations, scan imports, reconcile, check freshness.
// Inputs/Outputs: AuditRequest in, AuditReport (raw findings) out; policy is applied later by the gate.
// Invariants: Only manifest and source-root failures are fatal; scan and registry failures are recorded.
// Gotchas: `installed` mode without a manifest audits every installed distribution and reconciles nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{AuditError, ManifestError, ScanError};
use crate::freshness::{CurrentVersion, FreshnessChecker, State, Target, VersionRecord};
use crate::gate::{AuditSummary, Mode, OutdatedEntry};
use crate::installed::InstalledDistribution;
use crate::manifest::{DeclaredDeps, load_declared, normalize_name};
use crate::reconcile::{self, AliasTable};
use crate::scan::{ImportScanner, ScanOutcome};

#[derive(Debug, Clone, Default)]
pub struct AuditRequest {
    pub project_root: PathBuf,
    /// Empty means the project root itself.
    pub src_roots: Vec<PathBuf>,
    pub mode: Mode,
    pub ignore_imports: BTreeSet<String>,
    /// Required in `installed` mode, keyed by normalized name.
    pub installed: Option<BTreeMap<String, InstalledDistribution>>,
}

impl AuditRequest {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        if self.src_roots.is_empty() {
            vec![self.project_root.clone()]
        } else {
            self.src_roots.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditReport {
    pub mode: Mode,
    /// `None` only in `installed` mode when no manifest exists.
    pub manifest: Option<DeclaredDeps>,
    pub declared_count: usize,
    /// Raw top-level names, minus ignored imports.
    pub imports: BTreeSet<String>,
    pub scan_errors: Vec<ScanError>,
    pub unused: Vec<String>,
    pub versions: Vec<VersionRecord>,
}

impl AuditReport {
    pub fn summary(&self) -> AuditSummary {
        let outdated = self
            .versions
            .iter()
            .filter(|r| r.state == State::Outdated)
            .filter_map(|r| {
                Some(OutdatedEntry {
                    name: r.name.clone(),
                    current: r.current.clone()?,
                    latest: r.latest.clone()?,
                })
            })
            .collect();
        let unpinned = self
            .versions
            .iter()
            .filter(|r| r.state == State::Unpinned)
            .map(|r| r.name.clone())
            .collect();
        AuditSummary {
            mode: self.mode,
            declared: self.declared_count,
            unused: self.unused.clone(),
            outdated,
            unpinned,
        }
    }

    pub fn unknown(&self) -> impl Iterator<Item = &VersionRecord> {
        self.versions.iter().filter(|r| r.state == State::Unknown)
    }
}

pub struct Auditor {
    scanner: ImportScanner,
    checker: FreshnessChecker,
    aliases: AliasTable,
}

impl Auditor {
    pub fn new(checker: FreshnessChecker, aliases: AliasTable) -> Self {
        Self {
            scanner: ImportScanner::new(),
            checker,
            aliases,
        }
    }

    pub fn scanner(&self) -> &ImportScanner {
        &self.scanner
    }

    pub fn checker(&self) -> &FreshnessChecker {
        &self.checker
    }

    /// Declared dependencies; in `installed` mode a missing manifest is not an error.
    pub fn declared(&self, req: &AuditRequest) -> Result<Option<DeclaredDeps>, AuditError> {
        match load_declared(&req.project_root) {
            Ok(deps) => Ok(Some(deps)),
            Err(ManifestError::NoDeclaredDependencies(_)) if req.mode == Mode::Installed => {
                debug!("no manifest; auditing every installed distribution");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Union of imports across all roots, ignored names removed.
    pub fn scan(&self, req: &AuditRequest) -> Result<ScanOutcome, AuditError> {
        let mut outcome = self.scanner.scan_roots(&req.roots())?;
        let ignored: BTreeSet<String> = req.ignore_imports.iter().map(|n| normalize_name(n)).collect();
        outcome.imports.retain(|n| !ignored.contains(&normalize_name(n)));
        Ok(outcome)
    }

    pub fn unused(&self, declared: &DeclaredDeps, scan: &ScanOutcome) -> Vec<String> {
        let imported = reconcile::normalize_imports(scan.imports.iter(), &BTreeSet::new());
        reconcile::unused(&declared.requirements, &imported, &self.aliases)
    }

    pub fn targets(&self, req: &AuditRequest, declared: Option<&DeclaredDeps>) -> Result<Vec<Target>, AuditError> {
        if req.mode == Mode::Declared {
            let Some(declared) = declared else {
                return Ok(Vec::new());
            };
            return Ok(declared
                .requirements
                .iter()
                .map(|r| {
                    let current = r
                        .pinned_version()
                        .map(CurrentVersion::Known)
                        .unwrap_or(CurrentVersion::Unpinned);
                    Target::new(r.name.clone(), current)
                })
                .collect());
        }
        let installed = req.installed.as_ref().ok_or_else(|| {
            AuditError::Environment("installed mode needs an enumeration of installed distributions".to_string())
        })?;
        Ok(match declared {
            Some(declared) => declared
                .requirements
                .iter()
                .map(|r| {
                    let current = installed
                        .get(&r.key)
                        .map(|d| CurrentVersion::Known(d.version.clone()))
                        .unwrap_or(CurrentVersion::NotInstalled);
                    Target::new(r.name.clone(), current)
                })
                .collect(),
            None => installed
                .values()
                .map(|d| Target::new(d.name.clone(), CurrentVersion::Known(d.version.clone())))
                .collect(),
        })
    }

    pub fn run(&self, req: &AuditRequest) -> Result<AuditReport, AuditError> {
        let manifest = self.declared(req)?;
        let scan = self.scan(req)?;
        let unused = manifest
            .as_ref()
            .map(|d| self.unused(d, &scan))
            .unwrap_or_default();
        let targets = self.targets(req, manifest.as_ref())?;
        let declared_count = match &manifest {
            Some(d) => d.requirements.len(),
            None => targets.len(),
        };
        let versions = self.checker.check(&targets);
        info!(
            mode = %req.mode,
            declared = declared_count,
            imports = scan.imports.len(),
            unused = unused.len(),
            scan_errors = scan.errors.len(),
            "audit complete"
        );
        Ok(AuditReport {
            mode: req.mode,
            manifest,
            declared_count,
            imports: scan.imports,
            scan_errors: scan.errors,
            unused,
            versions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditRequest, Auditor};
    use crate::error::AuditError;
    use crate::freshness::testing::FakeRegistry;
    use crate::freshness::{CheckSettings, FreshnessChecker, State, VersionCache};
    use crate::gate::{Mode, Policy, evaluate};
    use crate::installed::InstalledDistribution;
    use crate::reconcile::AliasTable;
    use crate::version::Version;
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn auditor(entries: &[(&str, &str)]) -> Auditor {
        let checker = FreshnessChecker::new(
            Arc::new(FakeRegistry::with(entries)),
            Arc::new(VersionCache::new(Duration::from_secs(60))),
            CheckSettings::default(),
        );
        Auditor::new(checker, AliasTable::with_defaults())
    }

    fn project(pyproject_deps: &str) -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        fs::write(
            dir.path().join("pyproject.toml"),
            format!("[project]\nname = \"demo\"\nversion = \"0.0.1\"\ndependencies = [{}]\n", pyproject_deps),
        )
        .expect("write");
        dir
    }

    #[test]
    fn requests_numpy_end_to_end() {
        let dir = project("\"requests==2.31.0\", \"numpy>=1.26\"");
        fs::write(dir.path().join("main.py"), "import requests\n").expect("write");
        let report = auditor(&[("requests", "2.32.0"), ("numpy", "2.0.0")])
            .run(&AuditRequest::new(dir.path()))
            .expect("audit");
        assert_eq!(report.unused, vec!["numpy"]);
        let summary = report.summary();
        assert_eq!(summary.declared, 2);
        assert_eq!(summary.outdated.len(), 1);
        assert_eq!(summary.outdated[0].name, "requests");
        assert_eq!(summary.unpinned, vec!["numpy"]);
    }

    #[test]
    fn two_roots_reconcile_as_a_union() {
        let dir = project("\"requests\", \"rich\"");
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::create_dir_all(dir.path().join("tests")).expect("mkdir");
        fs::write(dir.path().join("src/app.py"), "import requests\n").expect("write");
        fs::write(dir.path().join("tests/test_app.py"), "import rich\n").expect("write");
        let a = auditor(&[]);

        let mut req = AuditRequest::new(dir.path());
        req.src_roots = vec![dir.path().join("src")];
        assert_eq!(a.run(&req).expect("audit").unused, vec!["rich"]);

        req.src_roots.push(dir.path().join("tests"));
        assert!(a.run(&req).expect("audit").unused.is_empty());
    }

    #[test]
    fn installed_mode_uses_environment_versions() {
        let dir = TempDir::new().expect("tempdir");
        let mut installed = BTreeMap::new();
        for (name, version) in [("requests", "2.31.0"), ("numpy", "1.26.0")] {
            installed.insert(
                name.to_string(),
                InstalledDistribution {
                    name: name.to_string(),
                    key: name.to_string(),
                    version: Version::parse(version).expect("v"),
                },
            );
        }
        let mut req = AuditRequest::new(dir.path());
        req.mode = Mode::Installed;
        req.installed = Some(installed);
        let report = auditor(&[("requests", "2.32.0"), ("numpy", "1.26.0")])
            .run(&req)
            .expect("audit");
        let outcome = evaluate(
            &report.summary(),
            &Policy {
                fail_on_outdated: true,
                ..Policy::default()
            },
        );
        let counts = outcome.summary.counts();
        assert_eq!(counts.outdated, 1);
        assert_eq!(counts.mode, Mode::Installed);
        assert_eq!(counts.declared, 2);
        assert!(!outcome.passed());
    }

    #[test]
    fn installed_mode_flags_declared_but_missing() {
        let dir = project("\"requests==2.31.0\", \"ghost\"");
        let mut req = AuditRequest::new(dir.path());
        req.mode = Mode::Installed;
        req.installed = Some(BTreeMap::new());
        let report = auditor(&[]).run(&req).expect("audit");
        assert!(report.versions.iter().all(|r| r.state == State::Unknown));
        assert_eq!(report.unknown().count(), 2);
    }

    #[test]
    fn ignored_imports_are_not_counted_as_usage() {
        let dir = project("\"requests\"");
        fs::write(dir.path().join("main.py"), "import requests\n").expect("write");
        let mut req = AuditRequest::new(dir.path());
        req.ignore_imports.insert("requests".to_string());
        let report = auditor(&[]).run(&req).expect("audit");
        assert_eq!(report.unused, vec!["requests"]);
        assert!(report.imports.is_empty());
    }

    #[test]
    fn declared_mode_without_manifest_is_fatal() {
        let dir = TempDir::new().expect("tempdir");
        let err = auditor(&[]).run(&AuditRequest::new(dir.path())).expect_err("no manifest");
        assert!(matches!(err, AuditError::Manifest(_)));
    }
}

// Purpose: Turn an audit summary into a pass/fail verdict under independently toggled thresholds.
// Inputs/Outputs: AuditSummary + Policy in, filtered summary + violation list + exit status out.
// Invariants: Ignored names vanish from every list and count except `declared`; `unknown` never fails.
// Gotchas: Exit status 2 means "audit ran, policy violated"; tool errors use 1.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use tracing::info;

use crate::manifest::normalize_name;
use crate::version::Version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Declared,
    Installed,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Declared => "declared",
            Mode::Installed => "installed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedEntry {
    pub name: String,
    pub current: Version,
    pub latest: Version,
}

/// `{mode, declared, unused, outdated, unpinned}`, the shape shared by reports and the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub mode: Mode,
    pub declared: usize,
    pub unused: Vec<String>,
    pub outdated: Vec<OutdatedEntry>,
    pub unpinned: Vec<String>,
}

impl AuditSummary {
    /// Drops every entry whose normalized name is in `ignore`.
    pub fn without(&self, ignore: &BTreeSet<String>) -> AuditSummary {
        let keep = |name: &str| !ignore.contains(&normalize_name(name));
        AuditSummary {
            mode: self.mode,
            declared: self.declared,
            unused: self.unused.iter().filter(|n| keep(n)).cloned().collect(),
            outdated: self.outdated.iter().filter(|o| keep(&o.name)).cloned().collect(),
            unpinned: self.unpinned.iter().filter(|n| keep(n)).cloned().collect(),
        }
    }

    pub fn counts(&self) -> CountView {
        CountView {
            mode: self.mode,
            declared: self.declared,
            unused: self.unused.len(),
            outdated: self.outdated.len(),
            unpinned: self.unpinned.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountView {
    pub mode: Mode,
    pub declared: usize,
    pub unused: usize,
    pub outdated: usize,
    pub unpinned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub fail_on_outdated: bool,
    pub fail_on_unpinned: bool,
    /// `None` keeps the unused count informational.
    pub max_unused: Option<usize>,
    /// Normalized distribution names.
    pub ignore: BTreeSet<String>,
}

impl Policy {
    pub fn ignoring<'a, I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        self.ignore.extend(names.into_iter().map(|n| normalize_name(n)));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Outdated(usize),
    Unpinned(usize),
    TooManyUnused { count: usize, max: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Outdated(n) => write!(f, "{} outdated dependencies", n),
            Violation::Unpinned(n) => write!(f, "{} unpinned dependencies", n),
            Violation::TooManyUnused { count, max } => {
                write!(f, "{} unused dependencies (maximum {})", count, max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    ToolError = 1,
    PolicyViolation = 2,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub summary: AuditSummary,
    pub violations: Vec<Violation>,
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn status(&self) -> ExitStatus {
        if self.passed() {
            ExitStatus::Success
        } else {
            ExitStatus::PolicyViolation
        }
    }
}

pub fn evaluate(summary: &AuditSummary, policy: &Policy) -> GateOutcome {
    let summary = summary.without(&policy.ignore);
    let mut violations = Vec::new();
    if policy.fail_on_outdated && !summary.outdated.is_empty() {
        violations.push(Violation::Outdated(summary.outdated.len()));
    }
    if policy.fail_on_unpinned && !summary.unpinned.is_empty() {
        violations.push(Violation::Unpinned(summary.unpinned.len()));
    }
    if let Some(max) = policy.max_unused
        && summary.unused.len() > max
    {
        violations.push(Violation::TooManyUnused {
            count: summary.unused.len(),
            max,
        });
    }
    for v in &violations {
        info!(violation = %v, "policy violated");
    }
    GateOutcome {
        summary,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::{AuditSummary, ExitStatus, Mode, OutdatedEntry, Policy, Violation, evaluate};
    use crate::version::Version;

    fn summary() -> AuditSummary {
        AuditSummary {
            mode: Mode::Declared,
            declared: 3,
            unused: vec!["numpy".to_string()],
            outdated: vec![OutdatedEntry {
                name: "requests".to_string(),
                current: Version::parse("2.31.0").expect("v"),
                latest: Version::parse("2.32.0").expect("v"),
            }],
            unpinned: vec!["numpy".to_string(), "Rich".to_string()],
        }
    }

    #[test]
    fn default_policy_is_informational() {
        let out = evaluate(&summary(), &Policy::default());
        assert!(out.passed());
        assert_eq!(out.status(), ExitStatus::Success);
        assert_eq!(out.summary.counts().outdated, 1);
    }

    #[test]
    fn each_threshold_fires_independently() {
        let p = Policy {
            fail_on_outdated: true,
            ..Policy::default()
        };
        assert_eq!(evaluate(&summary(), &p).violations, vec![Violation::Outdated(1)]);

        let p = Policy {
            fail_on_unpinned: true,
            ..Policy::default()
        };
        assert_eq!(evaluate(&summary(), &p).violations, vec![Violation::Unpinned(2)]);

        let p = Policy {
            max_unused: Some(0),
            ..Policy::default()
        };
        let out = evaluate(&summary(), &p);
        assert_eq!(out.violations, vec![Violation::TooManyUnused { count: 1, max: 0 }]);
        assert_eq!(out.status().code(), 2);

        let p = Policy {
            max_unused: Some(1),
            ..Policy::default()
        };
        assert!(evaluate(&summary(), &p).passed());
    }

    #[test]
    fn ignored_outdated_dependency_passes_the_gate() {
        let ignore = vec!["Requests".to_string()];
        let p = Policy {
            fail_on_outdated: true,
            ..Policy::default()
        }
        .ignoring(&ignore);
        let out = evaluate(&summary(), &p);
        assert!(out.passed());
        let counts = out.summary.counts();
        assert_eq!(counts.outdated, 0);
        assert_eq!(counts.declared, 3);
    }

    #[test]
    fn ignore_applies_to_every_list() {
        let ignore = vec!["numpy".to_string(), "rich".to_string()];
        let p = Policy {
            fail_on_unpinned: true,
            max_unused: Some(0),
            ..Policy::default()
        }
        .ignoring(&ignore);
        let out = evaluate(&summary(), &p);
        assert!(out.passed(), "{:?}", out.violations);
        assert!(out.summary.unpinned.is_empty());
    }

    #[test]
    fn count_view_serializes_flat() {
        let json = serde_json::to_value(summary().counts()).expect("json");
        assert_eq!(json["mode"], "declared");
        assert_eq!(json["unpinned"], 2);
    }
}

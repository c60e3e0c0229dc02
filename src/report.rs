use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use crate::audit::AuditReport;
use crate::error::ScanError;
use crate::gate::{Mode, OutdatedEntry};
use crate::manifest::normalize_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Json,
    #[value(name = "md", alias = "markdown")]
    Markdown,
}

impl Format {
    pub fn default_file_name(self) -> &'static str {
        match self {
            Format::Json => "report.json",
            Format::Markdown => "report.md",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub mode: Mode,
    pub declared: usize,
    pub imports: usize,
    pub unused: usize,
    pub outdated: usize,
    pub unpinned: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnknownEntry {
    pub name: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub summary: ReportSummary,
    pub imports: Vec<String>,
    pub unused: Vec<String>,
    pub outdated: Vec<OutdatedEntry>,
    pub unpinned: Vec<String>,
    pub unknown: Vec<UnknownEntry>,
    pub scan_errors: Vec<ScanError>,
}

impl ReportDocument {
    /// Builds the document with ignored distributions removed from every list.
    pub fn build(report: &AuditReport, ignore: &BTreeSet<String>) -> Self {
        let summary = report.summary().without(ignore);
        let unknown: Vec<UnknownEntry> = report
            .unknown()
            .filter(|r| !ignore.contains(&normalize_name(&r.name)))
            .map(|r| UnknownEntry {
                name: r.name.clone(),
                detail: r.detail.clone().unwrap_or_default(),
            })
            .collect();
        let imports: Vec<String> = report.imports.iter().cloned().collect();
        ReportDocument {
            summary: ReportSummary {
                mode: summary.mode,
                declared: summary.declared,
                imports: imports.len(),
                unused: summary.unused.len(),
                outdated: summary.outdated.len(),
                unpinned: summary.unpinned.len(),
                unknown: unknown.len(),
            },
            imports,
            unused: summary.unused,
            outdated: summary.outdated,
            unpinned: summary.unpinned,
            unknown,
            scan_errors: report.scan_errors.clone(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_markdown(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "# Dependency report\n");
        let _ = writeln!(out, "| mode | declared | imports | unused | outdated | unpinned | unknown |");
        let _ = writeln!(out, "|---|---|---|---|---|---|---|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} |",
            s.mode, s.declared, s.imports, s.unused, s.outdated, s.unpinned, s.unknown
        );

        let _ = writeln!(out, "\n## Outdated\n");
        if self.outdated.is_empty() {
            let _ = writeln!(out, "_none_");
        } else {
            let _ = writeln!(out, "| name | current | latest |");
            let _ = writeln!(out, "|---|---|---|");
            for o in &self.outdated {
                let _ = writeln!(out, "| {} | {} | {} |", o.name, o.current, o.latest);
            }
        }

        bullet_section(&mut out, "Unused", &self.unused);
        bullet_section(&mut out, "Unpinned", &self.unpinned);

        if !self.unknown.is_empty() {
            let _ = writeln!(out, "\n## Unknown\n");
            for u in &self.unknown {
                let _ = writeln!(out, "- {}: {}", u.name, u.detail);
            }
        }
        if !self.scan_errors.is_empty() {
            let _ = writeln!(out, "\n## Scan errors\n");
            for e in &self.scan_errors {
                let _ = writeln!(out, "- `{}`", e);
            }
        }
        bullet_section(&mut out, "Imports", &self.imports);
        out
    }

    pub fn render(&self, format: Format) -> anyhow::Result<String> {
        match format {
            Format::Json => self.to_json(),
            Format::Markdown => Ok(self.to_markdown()),
        }
    }
}

fn bullet_section(out: &mut String, title: &str, items: &[String]) {
    let _ = writeln!(out, "\n## {}\n", title);
    if items.is_empty() {
        let _ = writeln!(out, "_none_");
        return;
    }
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// Writes the report, defaulting to `<project>/report.json` (or `.md`). Returns the path written.
pub fn write_report(
    doc: &ReportDocument,
    format: Format,
    out: Option<&Path>,
    project_root: &Path,
) -> anyhow::Result<PathBuf> {
    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_root.join(format.default_file_name()));
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let body = doc.render(format)?;
    fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::{Format, ReportDocument, write_report};
    use crate::audit::AuditReport;
    use crate::freshness::{State, VersionRecord};
    use crate::gate::Mode;
    use crate::version::Version;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("version")
    }

    fn report() -> AuditReport {
        AuditReport {
            mode: Mode::Declared,
            manifest: None,
            declared_count: 3,
            imports: ["requests".to_string()].into(),
            scan_errors: Vec::new(),
            unused: vec!["numpy".to_string()],
            versions: vec![
                VersionRecord {
                    name: "requests".to_string(),
                    current: Some(v("2.31.0")),
                    latest: Some(v("2.32.0")),
                    state: State::Outdated,
                    detail: None,
                },
                VersionRecord {
                    name: "numpy".to_string(),
                    current: None,
                    latest: None,
                    state: State::Unpinned,
                    detail: None,
                },
                VersionRecord {
                    name: "private".to_string(),
                    current: Some(v("1.0")),
                    latest: None,
                    state: State::Unknown,
                    detail: Some("`private` is not known to the registry".to_string()),
                },
            ],
        }
    }

    #[test]
    fn json_shape() {
        let doc = ReportDocument::build(&report(), &BTreeSet::new());
        let json: serde_json::Value = serde_json::from_str(&doc.to_json().expect("json")).expect("parse");
        assert_eq!(json["summary"]["declared"], 3);
        assert_eq!(json["summary"]["unused"], 1);
        assert_eq!(json["summary"]["mode"], "declared");
        assert_eq!(json["unused"][0], "numpy");
        assert_eq!(json["outdated"][0]["name"], "requests");
        assert_eq!(json["outdated"][0]["current"], "2.31.0");
        assert_eq!(json["outdated"][0]["latest"], "2.32.0");
        assert_eq!(json["unknown"][0]["name"], "private");
        assert_eq!(json["imports"][0], "requests");
    }

    #[test]
    fn ignore_list_applies_to_report() {
        let ignore: BTreeSet<String> = ["requests".to_string()].into();
        let doc = ReportDocument::build(&report(), &ignore);
        assert!(doc.outdated.is_empty());
        assert_eq!(doc.summary.declared, 3);
    }

    #[test]
    fn default_path_and_markdown() {
        let dir = TempDir::new().expect("tempdir");
        let doc = ReportDocument::build(&report(), &BTreeSet::new());
        let p = write_report(&doc, Format::Json, None, dir.path()).expect("write");
        assert_eq!(p, dir.path().join("report.json"));
        assert!(p.is_file());

        let md_path = dir.path().join("out/report.md");
        write_report(&doc, Format::Markdown, Some(&md_path), dir.path()).expect("write");
        let md = fs::read_to_string(md_path).expect("read");
        assert!(md.contains("| requests | 2.31.0 | 2.32.0 |"));
        assert!(md.contains("## Unused"));
    }
}

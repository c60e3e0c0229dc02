// Purpose: Enumerate distributions installed in a Python environment for `installed` mode.
// Inputs/Outputs: site-packages directories (or an interpreter to ask) in, name/version pairs out.
// Invariants: Output is deduplicated by normalized name, first directory wins, sorted by key.
// Gotchas: Nothing is imported or executed except the optional `sys.path` query; unreadable dirs only warn.

use anyhow::{Context, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

use crate::manifest::normalize_name;
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledDistribution {
    pub name: String,
    pub key: String,
    pub version: Version,
}

// Every import root the interpreter would search, user site and distro dirs included.
const PATHS_SNIPPET: &str = "import json, sys; print(json.dumps([p for p in sys.path if p]))";

/// Asks `python` for its import search path and keeps the entries that are directories.
pub fn discover_site_packages(python: &str) -> anyhow::Result<Vec<PathBuf>> {
    let out = Command::new(python)
        .args(["-c", PATHS_SNIPPET])
        .output()
        .with_context(|| format!("failed to execute {}", python))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        bail!("{} could not report its import path: {}", python, stderr.trim());
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    search_dirs(&stdout).with_context(|| format!("unexpected output from {}: {}", python, stdout.trim()))
}

fn search_dirs(json_paths: &str) -> anyhow::Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = serde_json::from_str(json_paths.trim())?;
    let mut uniq = Vec::new();
    for p in paths {
        if !p.is_dir() {
            debug!(path = %p.display(), "import path entry is not a directory");
            continue;
        }
        if !uniq.contains(&p) {
            uniq.push(p);
        }
    }
    Ok(uniq)
}

fn header_fields(text: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut version = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            match k.trim().to_ascii_lowercase().as_str() {
                "name" if name.is_none() => name = Some(v.trim().to_string()),
                "version" if version.is_none() => version = Some(v.trim().to_string()),
                _ => {}
            }
        }
    }
    (name, version)
}

// `requests-2.31.0.dist-info` / `PyYAML-6.0.1-py3.11.egg-info`
fn from_dir_name(stem: &str) -> (Option<String>, Option<String>) {
    let mut parts = stem.splitn(3, '-');
    let name = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    let version = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
    (name, version)
}

fn read_metadata(entry: &Path) -> Option<(Option<String>, Option<String>)> {
    let file_name = entry.file_name()?.to_str()?;
    let (stem, meta) = if let Some(stem) = file_name.strip_suffix(".dist-info") {
        (stem, entry.join("METADATA"))
    } else if let Some(stem) = file_name.strip_suffix(".egg-info") {
        let meta = if entry.is_dir() {
            entry.join("PKG-INFO")
        } else {
            entry.to_path_buf()
        };
        (stem, meta)
    } else {
        return None;
    };
    let (fallback_name, fallback_version) = from_dir_name(stem);
    let (name, version) = match fs::read_to_string(&meta) {
        Ok(text) => header_fields(&text),
        Err(e) => {
            debug!(path = %meta.display(), error = %e, "no readable metadata; using directory name");
            (None, None)
        }
    };
    Some((name.or(fallback_name), version.or(fallback_version)))
}

/// Reads `*.dist-info` and `*.egg-info` entries directly under `dir`.
pub fn scan_site_packages(dir: &Path) -> anyhow::Result<Vec<InstalledDistribution>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("read_dir {}", dir.display()))?
        .map(|ent| ent.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("read_dir {}", dir.display()))?;
    entries.sort();
    let mut out = Vec::new();
    for entry in entries {
        let Some((name, version)) = read_metadata(&entry) else {
            continue;
        };
        let (Some(name), Some(raw)) = (name, version) else {
            warn!(path = %entry.display(), "installed distribution without name or version");
            continue;
        };
        match Version::parse(&raw) {
            Ok(version) => out.push(InstalledDistribution {
                key: normalize_name(&name),
                name,
                version,
            }),
            Err(e) => warn!(path = %entry.display(), error = %e, "skipping unparseable installed version"),
        }
    }
    Ok(out)
}

/// Installed distributions across `dirs`, keyed by normalized name. Unreadable dirs are skipped.
pub fn enumerate_installed(dirs: &[PathBuf]) -> anyhow::Result<BTreeMap<String, InstalledDistribution>> {
    let mut out = BTreeMap::new();
    for dir in dirs {
        let found = match scan_site_packages(dir) {
            Ok(found) => found,
            Err(e) => {
                let detail = format!("{:#}", e);
                warn!(dir = %dir.display(), error = %detail, "skipping unreadable site-packages");
                continue;
            }
        };
        for dist in found {
            out.entry(dist.key.clone()).or_insert(dist);
        }
    }
    debug!(count = out.len(), "enumerated installed distributions");
    Ok(out)
}

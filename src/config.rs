// Purpose: Layered settings: `.depsight.toml`, then DEPSIGHT_* environment, then command-line overrides.
// Inputs/Outputs: Project root (+ overrides) in, a validated Config and the engine settings derived from it out.
// Invariants: Ignore lists are stored normalized; scalar overrides replace, set overrides union.
// Gotchas: Unknown keys are rejected so a misspelled threshold cannot silently disable the gate.

use anyhow::{Context, bail};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::freshness::registry::DEFAULT_INDEX_URL;
use crate::freshness::{CheckSettings, DEFAULT_CONCURRENCY, DEFAULT_RETRIES};
use crate::gate::{Mode, Policy};
use crate::manifest::normalize_name;
use crate::reconcile::AliasTable;

pub const CONFIG_FILE: &str = ".depsight.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub mode: Mode,
    pub src: Vec<PathBuf>,
    pub ttl_seconds: u64,
    pub concurrency: usize,
    pub index_url: String,
    pub timeout_seconds: u64,
    /// Whole-run limit for registry lookups; unset means no limit.
    pub deadline_seconds: Option<u64>,
    pub retries: u32,
    pub site_packages: Vec<PathBuf>,
    pub python: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Declared,
            src: Vec::new(),
            ttl_seconds: 86_400,
            concurrency: DEFAULT_CONCURRENCY,
            index_url: DEFAULT_INDEX_URL.to_string(),
            timeout_seconds: 10,
            deadline_seconds: None,
            retries: DEFAULT_RETRIES,
            site_packages: Vec::new(),
            python: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IgnoreConfig {
    pub distributions: BTreeSet<String>,
    pub imports: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub fail_on_outdated: bool,
    pub fail_on_unpinned: bool,
    pub max_unused: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub core: CoreConfig,
    pub ignore: IgnoreConfig,
    /// distribution -> import names, on top of the built-in table.
    pub aliases: BTreeMap<String, Vec<String>>,
    pub gate: GateConfig,
}

/// Values supplied on the command line. `None`/empty leaves the configured value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub mode: Option<Mode>,
    pub src: Vec<PathBuf>,
    pub ttl_seconds: Option<u64>,
    pub concurrency: Option<usize>,
    pub index_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub deadline_seconds: Option<u64>,
    pub site_packages: Vec<PathBuf>,
    pub python: Option<String>,
    pub ignore_distributions: Vec<String>,
    pub ignore_imports: Vec<String>,
    pub fail_on_outdated: bool,
    pub fail_on_unpinned: bool,
    pub max_unused: Option<usize>,
}

impl Config {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut cfg = toml::from_str::<Config>(text)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads `<project>/.depsight.toml`; a missing file yields the defaults.
    pub fn load(project_root: &Path) -> anyhow::Result<Self> {
        let p = project_root.join(CONFIG_FILE);
        if !p.is_file() {
            debug!(path = %p.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        Self::parse(&text).with_context(|| format!("parse {}", p.display()))
    }

    fn normalize(&mut self) {
        self.ignore.distributions = self.ignore.distributions.iter().map(|n| normalize_name(n)).collect();
        self.ignore.imports = self.ignore.imports.iter().map(|n| normalize_name(n)).collect();
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.core.concurrency == 0 {
            bail!("core.concurrency must be at least 1");
        }
        if self.core.timeout_seconds == 0 {
            bail!("core.timeout_seconds must be at least 1");
        }
        if self.core.index_url.trim().is_empty() {
            bail!("core.index_url must not be empty");
        }
        Ok(())
    }

    /// Applies `DEPSIGHT_INDEX_URL` and `DEPSIGHT_JOBS` from `lookup`.
    pub fn with_env<F>(mut self, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DEPSIGHT_INDEX_URL").filter(|s| !s.trim().is_empty()) {
            self.core.index_url = url.trim().to_string();
        }
        if let Some(jobs) = lookup("DEPSIGHT_JOBS") {
            self.core.concurrency = jobs
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("DEPSIGHT_JOBS must be a positive integer, got {:?}", jobs))?;
        }
        Ok(self)
    }

    pub fn with_overrides(mut self, o: &Overrides) -> anyhow::Result<Self> {
        if let Some(mode) = o.mode {
            self.core.mode = mode;
        }
        if !o.src.is_empty() {
            self.core.src = o.src.clone();
        }
        if let Some(v) = o.ttl_seconds {
            self.core.ttl_seconds = v;
        }
        if let Some(v) = o.concurrency {
            self.core.concurrency = v;
        }
        if let Some(v) = &o.index_url {
            self.core.index_url = v.clone();
        }
        if let Some(v) = o.timeout_seconds {
            self.core.timeout_seconds = v;
        }
        if o.deadline_seconds.is_some() {
            self.core.deadline_seconds = o.deadline_seconds;
        }
        if !o.site_packages.is_empty() {
            self.core.site_packages = o.site_packages.clone();
        }
        if let Some(v) = &o.python {
            self.core.python = v.clone();
        }
        self.ignore
            .distributions
            .extend(o.ignore_distributions.iter().map(|n| normalize_name(n)));
        self.ignore
            .imports
            .extend(o.ignore_imports.iter().map(|n| normalize_name(n)));
        self.gate.fail_on_outdated |= o.fail_on_outdated;
        self.gate.fail_on_unpinned |= o.fail_on_unpinned;
        if o.max_unused.is_some() {
            self.gate.max_unused = o.max_unused;
        }
        self.validate()?;
        Ok(self)
    }

    /// Source roots resolved against the project root; the project root itself when none are set.
    pub fn src_roots(&self, project_root: &Path) -> Vec<PathBuf> {
        if self.core.src.is_empty() {
            return vec![project_root.to_path_buf()];
        }
        self.core
            .src
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    project_root.join(p)
                }
            })
            .collect()
    }

    pub fn policy(&self) -> Policy {
        Policy {
            fail_on_outdated: self.gate.fail_on_outdated,
            fail_on_unpinned: self.gate.fail_on_unpinned,
            max_unused: self.gate.max_unused,
            ignore: self.ignore.distributions.clone(),
        }
    }

    pub fn alias_table(&self) -> AliasTable {
        let mut table = AliasTable::with_defaults();
        table.extend(self.aliases.iter());
        table
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.core.ttl_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.core.timeout_seconds)
    }

    pub fn check_settings(&self) -> CheckSettings {
        CheckSettings {
            concurrency: self.core.concurrency,
            retries: self.core.retries,
            deadline: self.core.deadline_seconds.map(Duration::from_secs),
            ..CheckSettings::default()
        }
    }
}

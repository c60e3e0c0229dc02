// Purpose: Command-line surface for both binaries: argument parsing, wiring, output, exit codes.
// Inputs/Outputs: argv in; JSON (or a report file path) on stdout, diagnostics on stderr, an exit code out.
// Invariants: 0 = success, 1 = tool error (bad arguments included), 2 = gate policy violated.
// Gotchas: Relative `--src`/`--site-packages` resolve against the cwd; config-file paths against the project.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::audit::{AuditRequest, Auditor};
use crate::config::{Config, Overrides};
use crate::freshness::{FreshnessChecker, PypiRegistry, State, VersionCache, VersionRecord};
use crate::gate::{self, ExitStatus, Mode};
use crate::installed::{self, InstalledDistribution};
use crate::report::{self, Format, ReportDocument};

pub const LOG_ENV: &str = "DEPSIGHT_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "depsight",
    version = crate::VERSION,
    about = "Audit Python dependencies: declared vs imported, pinned vs latest"
)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Log decisions to stderr (debug level)")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the top-level modules imported under the source roots.
    Scan(CommonArgs),
    /// Print declared dependencies that no source root imports.
    Unused(CommonArgs),
    /// Print outdated, unpinned and unresolvable dependencies.
    Check(CommonArgs),
    /// Write a full report file and print its path.
    Report {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, help = "Output file (default: <project>/report.json or report.md)")]
        out: Option<PathBuf>,
        #[arg(long, value_enum, ignore_case = true, default_value_t = Format::Json)]
        format: Format,
    },
    /// Apply policy thresholds; exit 2 on violation.
    Gate {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        gate: GateArgs,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "depsight-gate",
    version = crate::VERSION,
    about = "Dependency policy gate for pre-commit hooks"
)]
pub struct GateCli {
    #[arg(short, long, help = "Log decisions to stderr (debug level)")]
    pub verbose: bool,
    #[command(flatten)]
    pub common: CommonArgs,
    #[command(flatten)]
    pub gate: GateArgs,
}

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, default_value = ".", help = "Project root holding pyproject.toml / requirements.txt")]
    pub project: PathBuf,
    #[arg(long = "src", help = "Source root to scan (repeatable; default: core.src or the project root)")]
    pub src: Vec<PathBuf>,
    #[arg(long, value_enum, ignore_case = true)]
    pub mode: Option<Mode>,
    #[arg(long, help = "Registry cache TTL in seconds")]
    pub ttl: Option<u64>,
    #[arg(long, help = "Maximum simultaneous registry lookups")]
    pub concurrency: Option<usize>,
    #[arg(long, help = "Registry JSON API base URL (https:// or file://)")]
    pub index_url: Option<String>,
    #[arg(long, help = "Per-request registry timeout in seconds")]
    pub timeout: Option<u64>,
    #[arg(long, help = "Overall limit for registry lookups in seconds")]
    pub deadline: Option<u64>,
    #[arg(long = "site-packages", help = "site-packages directory for installed mode (repeatable)")]
    pub site_packages: Vec<PathBuf>,
    #[arg(long, help = "Interpreter asked for site-packages when none are given")]
    pub python: Option<String>,
    #[arg(long = "ignore", help = "Distribution to exclude from findings (repeatable)")]
    pub ignore: Vec<String>,
    #[arg(long = "ignore-import", help = "Import name to disregard when reconciling (repeatable)")]
    pub ignore_imports: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GateArgs {
    #[arg(long, help = "Fail if any dependency is outdated")]
    pub fail_if_outdated: bool,
    #[arg(long, help = "Fail if any dependency is unpinned")]
    pub fail_if_unpinned: bool,
    #[arg(long, help = "Fail if more than N dependencies are unused")]
    pub max_unused: Option<usize>,
}

pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run_cli<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => return report_parse_error(e),
    };
    init_tracing(cli.verbose);
    finish(dispatch(cli.command))
}

pub fn run_gate<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match GateCli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => return report_parse_error(e),
    };
    init_tracing(cli.verbose);
    finish(cmd_gate(&cli.common, &cli.gate))
}

fn report_parse_error(e: clap::Error) -> i32 {
    let _ = e.print();
    if e.use_stderr() {
        ExitStatus::ToolError.code()
    } else {
        ExitStatus::Success.code()
    }
}

fn finish(result: anyhow::Result<ExitStatus>) -> i32 {
    match result {
        Ok(status) => status.code(),
        Err(err) => {
            eprintln!("depsight: {:#}", err);
            ExitStatus::ToolError.code()
        }
    }
}

fn dispatch(command: Commands) -> anyhow::Result<ExitStatus> {
    match command {
        Commands::Scan(common) => cmd_scan(&common),
        Commands::Unused(common) => cmd_unused(&common),
        Commands::Check(common) => cmd_check(&common),
        Commands::Report {
            common,
            out,
            format,
        } => cmd_report(&common, out.as_deref(), format),
        Commands::Gate { common, gate } => cmd_gate(&common, &gate),
    }
}

fn absolutize(p: &Path) -> anyhow::Result<PathBuf> {
    if p.is_absolute() {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(cwd.join(p))
}

/// Whether a command reads the installed environment. Only freshness needs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Environment {
    Skip,
    Resolve,
}

/// Everything one invocation needs: resolved config, the engine, and the request.
struct Session {
    config: Config,
    auditor: Auditor,
    request: AuditRequest,
}

fn overrides(common: &CommonArgs, gate: Option<&GateArgs>) -> anyhow::Result<Overrides> {
    let gate = gate.cloned().unwrap_or_default();
    Ok(Overrides {
        mode: common.mode,
        src: common
            .src
            .iter()
            .map(|p| absolutize(p))
            .collect::<anyhow::Result<_>>()?,
        ttl_seconds: common.ttl,
        concurrency: common.concurrency,
        index_url: common.index_url.clone(),
        timeout_seconds: common.timeout,
        deadline_seconds: common.deadline,
        site_packages: common
            .site_packages
            .iter()
            .map(|p| absolutize(p))
            .collect::<anyhow::Result<_>>()?,
        python: common.python.clone(),
        ignore_distributions: common.ignore.clone(),
        ignore_imports: common.ignore_imports.clone(),
        fail_on_outdated: gate.fail_if_outdated,
        fail_on_unpinned: gate.fail_if_unpinned,
        max_unused: gate.max_unused,
    })
}

fn installed_for(config: &Config, project: &Path) -> anyhow::Result<Option<BTreeMap<String, InstalledDistribution>>> {
    if config.core.mode != Mode::Installed {
        return Ok(None);
    }
    let dirs: Vec<PathBuf> = if config.core.site_packages.is_empty() {
        installed::discover_site_packages(&config.core.python)?
    } else {
        config
            .core
            .site_packages
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { project.join(p) })
            .collect()
    };
    debug!(dirs = ?dirs, "reading installed distributions");
    Ok(Some(installed::enumerate_installed(&dirs)?))
}

fn session(common: &CommonArgs, gate: Option<&GateArgs>, env: Environment) -> anyhow::Result<Session> {
    let project = &common.project;
    if !project.is_dir() {
        bail!("project root {} is not a directory", project.display());
    }
    let config = Config::load(project)?
        .with_env(|k| std::env::var(k).ok())?
        .with_overrides(&overrides(common, gate)?)?;

    let registry = Arc::new(PypiRegistry::new(&config.core.index_url, config.timeout()));
    let cache = Arc::new(VersionCache::new(config.ttl()));
    let checker = FreshnessChecker::new(registry, cache, config.check_settings());
    let auditor = Auditor::new(checker, config.alias_table());

    let request = AuditRequest {
        project_root: project.clone(),
        src_roots: config.src_roots(project),
        mode: config.core.mode,
        ignore_imports: config.ignore.imports.clone(),
        installed: match env {
            Environment::Resolve => installed_for(&config, project)?,
            Environment::Skip => None,
        },
    };
    Ok(Session {
        config,
        auditor,
        request,
    })
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_scan(common: &CommonArgs) -> anyhow::Result<ExitStatus> {
    let s = session(common, None, Environment::Skip)?;
    let outcome = s.auditor.scan(&s.request)?;
    print_json(&json!({
        "roots": s.request.roots(),
        "imports": outcome.imports,
        "files_scanned": outcome.files_scanned,
        "errors": outcome.errors,
    }))?;
    Ok(ExitStatus::Success)
}

fn cmd_unused(common: &CommonArgs) -> anyhow::Result<ExitStatus> {
    let s = session(common, None, Environment::Skip)?;
    let unused = match s.auditor.declared(&s.request)? {
        Some(declared) => {
            let outcome = s.auditor.scan(&s.request)?;
            s.auditor.unused(&declared, &outcome)
        }
        None => Vec::new(),
    };
    print_json(&json!({ "unused": unused }))?;
    Ok(ExitStatus::Success)
}

fn in_state(records: &[VersionRecord], state: State) -> impl Iterator<Item = &VersionRecord> {
    records.iter().filter(move |r| r.state == state)
}

fn cmd_check(common: &CommonArgs) -> anyhow::Result<ExitStatus> {
    let s = session(common, None, Environment::Resolve)?;
    let declared = s.auditor.declared(&s.request)?;
    let targets = s.auditor.targets(&s.request, declared.as_ref())?;
    let ignore = &s.config.ignore.distributions;
    let records: Vec<_> = s
        .auditor
        .checker()
        .check(&targets)
        .into_iter()
        .filter(|r| !ignore.contains(&crate::manifest::normalize_name(&r.name)))
        .collect();
    print_json(&json!({
        "mode": s.request.mode,
        "outdated": in_state(&records, State::Outdated)
            .map(|r| json!({ "name": r.name, "current": r.current, "latest": r.latest }))
            .collect::<Vec<_>>(),
        "unpinned": in_state(&records, State::Unpinned).map(|r| r.name.clone()).collect::<Vec<_>>(),
        "unknown": in_state(&records, State::Unknown)
            .map(|r| json!({ "name": r.name, "detail": r.detail }))
            .collect::<Vec<_>>(),
    }))?;
    Ok(ExitStatus::Success)
}

fn cmd_report(common: &CommonArgs, out: Option<&Path>, format: Format) -> anyhow::Result<ExitStatus> {
    let s = session(common, None, Environment::Resolve)?;
    let audit = s.auditor.run(&s.request)?;
    let doc = ReportDocument::build(&audit, &s.config.ignore.distributions);
    let out = out.map(absolutize).transpose()?;
    let path = report::write_report(&doc, format, out.as_deref(), &s.request.project_root)?;
    println!("{}", path.display());
    Ok(ExitStatus::Success)
}

fn cmd_gate(common: &CommonArgs, gate_args: &GateArgs) -> anyhow::Result<ExitStatus> {
    let s = session(common, Some(gate_args), Environment::Resolve)?;
    let audit = s.auditor.run(&s.request)?;
    let outcome = gate::evaluate(&audit.summary(), &s.config.policy());
    print_json(&outcome.summary.counts())?;
    for v in &outcome.violations {
        eprintln!("policy violation: {}", v);
    }
    Ok(outcome.status())
}

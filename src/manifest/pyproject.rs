use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::{Location, ManifestError};
use crate::manifest::requirement::{Clause, Op, Specifier, is_valid_name, parse_requirement};
use crate::manifest::{RequirementRecord, normalize_name};
use crate::version::Version;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PyProject {
    #[serde(default)]
    project: Option<ProjectTable>,
    #[serde(default)]
    tool: Option<ToolTable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProjectTable {
    #[serde(default)]
    dependencies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToolTable {
    #[serde(default)]
    poetry: Option<PoetryTable>,
}

// Only the main group is read; `group.<name>.dependencies` and `dev-dependencies` are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
struct PoetryTable {
    #[serde(default)]
    dependencies: Option<toml::Table>,
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())].matches('\n').count() + 1
}

impl PyProject {
    pub fn read(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ManifestError> {
        toml::from_str::<PyProject>(text).map_err(|e| {
            let line = e.span().map(|s| line_of(text, s.start)).unwrap_or(1);
            ManifestError::parse(path, Location::Line(line), e.message())
        })
    }

    pub fn has_pep621_dependencies(&self) -> bool {
        self.project
            .as_ref()
            .is_some_and(|p| p.dependencies.is_some())
    }

    pub fn has_poetry_dependencies(&self) -> bool {
        self.poetry_table().is_some()
    }

    fn poetry_table(&self) -> Option<&toml::Table> {
        self.tool
            .as_ref()
            .and_then(|t| t.poetry.as_ref())
            .and_then(|p| p.dependencies.as_ref())
    }

    pub fn pep621_requirements(&self, path: &Path) -> Result<Vec<RequirementRecord>, ManifestError> {
        let deps = self
            .project
            .as_ref()
            .and_then(|p| p.dependencies.as_ref())
            .ok_or_else(|| {
                ManifestError::parse(
                    path,
                    Location::Field("project.dependencies".to_string()),
                    "no [project] dependencies list",
                )
            })?;
        deps.iter()
            .enumerate()
            .map(|(i, text)| {
                parse_requirement(text).map_err(|msg| {
                    ManifestError::parse(
                        path,
                        Location::Field(format!("project.dependencies[{}]", i)),
                        msg,
                    )
                })
            })
            .collect()
    }

    pub fn poetry_requirements(&self, path: &Path) -> Result<Vec<RequirementRecord>, ManifestError> {
        let table = self.poetry_table().ok_or_else(|| {
            ManifestError::parse(
                path,
                Location::Field("tool.poetry.dependencies".to_string()),
                "no [tool.poetry.dependencies] table",
            )
        })?;
        let mut out = Vec::with_capacity(table.len());
        for (name, value) in table {
            if name.eq_ignore_ascii_case("python") {
                continue;
            }
            let field = || Location::Field(format!("tool.poetry.dependencies.{}", name));
            if !is_valid_name(name) {
                return Err(ManifestError::parse(
                    path,
                    field(),
                    format!("invalid distribution name `{}`", name),
                ));
            }
            let record = poetry_record(name, value)
                .map_err(|msg| ManifestError::parse(path, field(), msg))?;
            out.push(record);
        }
        Ok(out)
    }
}

fn poetry_record(name: &str, value: &toml::Value) -> Result<RequirementRecord, String> {
    match value {
        toml::Value::String(constraint) => {
            Ok(RequirementRecord::new(name, poetry_specifier(constraint)?))
        }
        toml::Value::Table(t) => {
            let specifier = match t.get("version") {
                Some(toml::Value::String(v)) => poetry_specifier(v)?,
                Some(_) => return Err("`version` must be a string".to_string()),
                None => None,
            };
            let mut record = RequirementRecord::new(name, specifier);
            if let Some(toml::Value::Array(extras)) = t.get("extras") {
                record.extras = extras
                    .iter()
                    .filter_map(|e| e.as_str())
                    .map(normalize_name)
                    .collect();
            }
            if let Some(toml::Value::String(m)) = t.get("markers") {
                record.marker = Some(m.clone());
            }
            record.url = ["git", "url", "path"]
                .iter()
                .find_map(|k| t.get(*k).and_then(|v| v.as_str()))
                .map(str::to_string);
            Ok(record)
        }
        // Multiple-constraint form: one entry per environment, never a single pin.
        toml::Value::Array(_) => Ok(RequirementRecord::new(name, None)),
        other => Err(format!(
            "expected a version string or table, found {}",
            other.type_str()
        )),
    }
}

/// Translates a Poetry constraint (`2.31.0`, `^1.26`, `~1.2`, `>=1,<2`, `*`) into clauses.
pub fn poetry_specifier(constraint: &str) -> Result<Option<Specifier>, String> {
    let constraint = constraint.trim();
    if constraint.is_empty() || constraint == "*" {
        return Ok(None);
    }
    if constraint.contains("||") {
        debug!(constraint, "alternative constraints are treated as a range");
        return Ok(None);
    }
    let mut clauses = Vec::new();
    for part in constraint_parts(constraint) {
        let part = part.as_str();
        if let Some(base) = part.strip_prefix('^') {
            clauses.extend(bounded_range(base.trim(), caret_upper)?);
            continue;
        }
        if !part.starts_with("~=")
            && let Some(base) = part.strip_prefix('~')
        {
            clauses.extend(bounded_range(base.trim(), tilde_upper)?);
            continue;
        }
        let pep440 = if part.starts_with(|c: char| c.is_ascii_digit()) {
            format!("=={}", part)
        } else {
            part.to_string()
        };
        if let Some(spec) = Specifier::parse(&pep440)? {
            clauses.extend_from_slice(spec.clauses());
        }
    }
    Ok(Specifier::from_clauses(clauses))
}

// Splits `>=1.2, <1.5` and `>=1.2 <1.5` alike; a bare operator token binds to the next token.
fn constraint_parts(constraint: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut pending = String::new();
    for tok in constraint.split(|c: char| c == ',' || c.is_whitespace()) {
        if tok.is_empty() {
            continue;
        }
        pending.push_str(tok);
        if tok.chars().all(|c| matches!(c, '^' | '~' | '=' | '<' | '>' | '!')) {
            continue;
        }
        parts.push(std::mem::take(&mut pending));
    }
    if !pending.is_empty() {
        parts.push(pending);
    }
    parts
}

type UpperBound = fn(&[u64]) -> Result<Vec<u64>, String>;

fn bounded_range(base: &str, upper: UpperBound) -> Result<Vec<Clause>, String> {
    let version = Version::parse(base).map_err(|e| e.to_string())?;
    let bound = upper(version.release())?
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".");
    Ok(vec![
        Clause {
            op: Op::Ge,
            version: base.to_string(),
        },
        Clause {
            op: Op::Lt,
            version: bound,
        },
    ])
}

fn bump(n: u64) -> Result<u64, String> {
    n.checked_add(1)
        .ok_or_else(|| format!("version component {} is too large to bound", n))
}

fn caret_upper(release: &[u64]) -> Result<Vec<u64>, String> {
    let idx = release
        .iter()
        .position(|&n| n != 0)
        .unwrap_or(release.len().saturating_sub(1));
    let mut out = release[..=idx].to_vec();
    out[idx] = bump(out[idx])?;
    Ok(out)
}

fn tilde_upper(release: &[u64]) -> Result<Vec<u64>, String> {
    Ok(if release.len() >= 2 {
        vec![release[0], bump(release[1])?]
    } else {
        vec![bump(release[0])?]
    })
}

#[cfg(test)]
mod tests {
    use super::{PyProject, poetry_specifier};
    use crate::error::{Location, ManifestError};
    use std::path::Path;

    const POETRY: &str = r#"
[tool.poetry]
name = "demo"
version = "0.0.1"

[tool.poetry.dependencies]
python = "^3.10"
requests = "2.31.0"
numpy = "^1.26"
rich = { version = "~13.7", extras = ["Jupyter"] }
mylib = { git = "https://example.com/mylib.git" }

[tool.poetry.group.dev.dependencies]
pytest = "^8.0"

[tool.poetry.dev-dependencies]
black = "*"
"#;

    #[test]
    fn poetry_main_group_only() {
        let doc = PyProject::parse(POETRY, Path::new("pyproject.toml")).expect("parse");
        assert!(!doc.has_pep621_dependencies());
        let reqs = doc
            .poetry_requirements(Path::new("pyproject.toml"))
            .expect("reqs");
        let names: Vec<_> = reqs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["requests", "numpy", "rich", "mylib"]);
        assert!(reqs[0].pinned);
        assert!(!reqs[1].pinned);
        assert_eq!(reqs[2].extras, vec!["jupyter"]);
        assert_eq!(reqs[3].url.as_deref(), Some("https://example.com/mylib.git"));
    }

    #[test]
    fn caret_and_tilde_become_ranges() {
        let cases = [
            ("^1.26", ">=1.26,<2"),
            ("^0.2.3", ">=0.2.3,<0.3"),
            ("^0.0.3", ">=0.0.3,<0.0.4"),
            ("~1.2.3", ">=1.2.3,<1.3"),
            ("~1", ">=1,<2"),
            (">=1.0, <2.0", ">=1.0,<2.0"),
            ("1.2.*", "==1.2.*"),
            (">=1.2 <1.5", ">=1.2,<1.5"),
            (">= 1.2, < 1.5", ">=1.2,<1.5"),
            ("^1.2 !=1.3.0", ">=1.2,<2,!=1.3.0"),
        ];
        for (input, expected) in cases {
            let spec = poetry_specifier(input).expect("parse").expect("some");
            assert_eq!(spec.to_string(), expected, "{input}");
        }
        assert!(poetry_specifier("*").expect("parse").is_none());
    }

    #[test]
    fn oversized_components_are_errors_not_panics() {
        assert!(poetry_specifier("^18446744073709551615").is_err());
        assert!(poetry_specifier("~1.18446744073709551615").is_err());
        assert!(poetry_specifier("~18446744073709551615").is_err());
    }

    #[test]
    fn pep621_bad_entry_names_the_field() {
        let text = "[project]\nname = \"demo\"\ndependencies = [\"requests==2.31.0\", \"==oops\"]\n";
        let doc = PyProject::parse(text, Path::new("pyproject.toml")).expect("toml ok");
        let err = doc
            .pep621_requirements(Path::new("pyproject.toml"))
            .expect_err("bad entry");
        match err {
            ManifestError::Parse { location, .. } => {
                assert_eq!(location, Location::Field("project.dependencies[1]".to_string()))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn toml_syntax_error_reports_line() {
        let text = "[project]\nname = \"demo\"\ndependencies = [\n  \"requests\",\n  42,\n]\n";
        let err = PyProject::parse(text, Path::new("pyproject.toml")).expect_err("type error");
        match err {
            ManifestError::Parse {
                location: Location::Line(n),
                ..
            } => assert!(n >= 3, "line {n}"),
            other => panic!("unexpected error {other}"),
        }
    }
}

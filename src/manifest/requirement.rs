use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use crate::manifest::{RequirementRecord, normalize_name};
use crate::version::Version;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*").unwrap()
});

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE
        .captures(name)
        .is_some_and(|caps| caps[0].len() == name.len() && caps[1].len() == name.trim().len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    ArbitraryEq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
    Compatible,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::ArbitraryEq => "===",
            Op::Ne => "!=",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Compatible => "~=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub op: Op,
    pub version: String,
}

impl Clause {
    fn is_wildcard(&self) -> bool {
        self.version.ends_with(".*")
    }
}

/// A comma-separated list of version clauses, e.g. `>=1.26,<2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specifier {
    clauses: Vec<Clause>,
}

impl Specifier {
    pub fn parse(text: &str) -> Result<Option<Self>, String> {
        let mut clauses = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            clauses.push(parse_clause(part)?);
        }
        if clauses.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { clauses }))
    }

    pub fn from_clauses(clauses: Vec<Clause>) -> Option<Self> {
        if clauses.is_empty() {
            None
        } else {
            Some(Self { clauses })
        }
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// The exact version this specifier pins, if it is a single `==`/`===` clause.
    pub fn pinned_version(&self) -> Option<Version> {
        let [clause] = self.clauses.as_slice() else {
            return None;
        };
        if !matches!(clause.op, Op::Eq | Op::ArbitraryEq) || clause.is_wildcard() {
            return None;
        }
        Version::parse(&clause.version).ok()
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.op.as_str(), c.version))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&text)
    }
}

fn parse_clause(text: &str) -> Result<Clause, String> {
    const OPS: [(&str, Op); 8] = [
        ("===", Op::ArbitraryEq),
        ("~=", Op::Compatible),
        ("==", Op::Eq),
        ("!=", Op::Ne),
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("<", Op::Lt),
        (">", Op::Gt),
    ];
    let Some((prefix, op)) = OPS.iter().find(|(p, _)| text.starts_with(p)) else {
        return Err(format!("missing comparison operator in `{}`", text));
    };
    let version = text[prefix.len()..].trim();
    if version.is_empty() {
        return Err(format!("missing version after `{}`", prefix));
    }
    let checked = match op {
        Op::ArbitraryEq => Ok(()),
        Op::Eq | Op::Ne => {
            let base = version.strip_suffix(".*").unwrap_or(version);
            Version::parse(base).map(|_| ())
        }
        _ => Version::parse(version).map(|_| ()),
    };
    checked.map_err(|e| e.to_string())?;
    Ok(Clause {
        op: *op,
        version: version.to_string(),
    })
}

/// Parses one requirement string: `name[extras] specifier ; marker` or `name @ url`.
pub fn parse_requirement(text: &str) -> Result<RequirementRecord, String> {
    let caps = NAME_RE
        .captures(text)
        .ok_or_else(|| format!("invalid requirement `{}`: expected a distribution name", text.trim()))?;
    let name = caps[1].to_string();
    let mut rest = text[caps[0].len()..].trim();

    let mut extras = Vec::new();
    if let Some(after) = rest.strip_prefix('[') {
        let close = after
            .find(']')
            .ok_or_else(|| format!("unterminated extras in `{}`", text.trim()))?;
        extras = after[..close]
            .split(',')
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .map(normalize_name)
            .collect();
        rest = after[close + 1..].trim();
    }

    let (body, marker) = match rest.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
        None => (rest, None),
    };
    if marker.as_deref() == Some("") {
        return Err(format!("empty environment marker in `{}`", text.trim()));
    }

    if let Some(url) = body.strip_prefix('@') {
        let url = url.trim();
        if url.is_empty() {
            return Err(format!("missing URL after `@` in `{}`", text.trim()));
        }
        let mut record = RequirementRecord::new(name, None);
        record.extras = extras;
        record.marker = marker;
        record.url = Some(url.to_string());
        return Ok(record);
    }

    let body = match body.strip_prefix('(') {
        Some(inner) => inner
            .strip_suffix(')')
            .ok_or_else(|| format!("unbalanced parenthesis in `{}`", text.trim()))?,
        None => body,
    };
    let specifier = Specifier::parse(body)?;
    let mut record = RequirementRecord::new(name, specifier);
    record.extras = extras;
    record.marker = marker;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::{Op, Specifier, parse_requirement};

    #[test]
    fn exact_pin_is_pinned() {
        let r = parse_requirement("requests==2.31.0").expect("parse");
        assert_eq!(r.name, "requests");
        assert!(r.pinned);
        assert_eq!(r.pinned_version().expect("pin").to_string(), "2.31.0");
    }

    #[test]
    fn ranges_and_wildcards_are_not_pinned() {
        for text in ["numpy>=1.26", "numpy==1.26.*", "numpy>=1,<2", "numpy", "numpy~=1.26"] {
            let r = parse_requirement(text).expect("parse");
            assert!(!r.pinned, "{text} must not count as pinned");
        }
    }

    #[test]
    fn extras_markers_and_parentheses() {
        let r = parse_requirement("Uvicorn[Standard, http2] (==0.29.0) ; python_version >= '3.9'")
            .expect("parse");
        assert_eq!(r.name, "Uvicorn");
        assert_eq!(r.key, "uvicorn");
        assert_eq!(r.extras, vec!["standard", "http2"]);
        assert_eq!(r.marker.as_deref(), Some("python_version >= '3.9'"));
        assert!(r.pinned);
    }

    #[test]
    fn direct_reference_is_unpinned() {
        let r = parse_requirement("pkg @ https://example.com/pkg-1.0.tar.gz").expect("parse");
        assert_eq!(r.url.as_deref(), Some("https://example.com/pkg-1.0.tar.gz"));
        assert!(!r.pinned);
        assert!(r.specifier.is_none());
    }

    #[test]
    fn malformed_requirements_are_rejected() {
        for bad in ["==1.0", "requests=2.0", "requests>=", "requests[security", "requests>=abc"] {
            assert!(parse_requirement(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn specifier_display_keeps_clause_order() {
        let spec = Specifier::parse(" >=1.26 , <2 ").expect("parse").expect("some");
        assert_eq!(spec.to_string(), ">=1.26,<2");
        assert_eq!(spec.clauses()[1].op, Op::Lt);
    }
}

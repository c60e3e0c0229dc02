// Purpose: Static discovery of top-level imported module names under a source root.
// Inputs/Outputs: Directory in, ScanOutcome (names + per-file errors) out; nothing is executed.
// Invariants: A file with a syntax error contributes no names but never aborts the walk.
// Gotchas: Results are memoized per canonical root; call `reset` after mutating the tree.

pub mod lexer;

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;
use tracing::{debug, warn};

use crate::error::{AuditError, ScanError};
use lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub imports: BTreeSet<String>,
    pub errors: Vec<ScanError>,
    pub files_scanned: usize,
}

impl ScanOutcome {
    fn merge(&mut self, other: &ScanOutcome) {
        self.imports.extend(other.imports.iter().cloned());
        self.errors.extend(other.errors.iter().cloned());
        self.files_scanned += other.files_scanned;
    }
}

pub fn is_skip_dir(name: &str) -> bool {
    matches!(
        name,
        ".git"
            | ".hg"
            | ".svn"
            | ".venv"
            | "venv"
            | "__pycache__"
            | ".tox"
            | ".nox"
            | ".mypy_cache"
            | ".pytest_cache"
            | ".ruff_cache"
            | "node_modules"
            | "build"
            | "dist"
    ) || name.ends_with(".egg-info")
}

/// Top-level names imported by one source text. Relative imports are excluded.
pub fn scan_imports_in_text(src: &str) -> Result<BTreeSet<String>, lexer::LexError> {
    let tokens = Lexer::new(src).lex_all()?;
    let mut out = BTreeSet::new();
    for stmt in tokens.split(|t| matches!(t.kind, TokenKind::Newline | TokenKind::StmtSep)) {
        match stmt.first().map(|t| &t.kind) {
            Some(TokenKind::Ident(kw)) if kw == "import" => parse_import(stmt, &mut out)?,
            Some(TokenKind::Ident(kw)) if kw == "from" => parse_from(stmt, &mut out)?,
            _ => {}
        }
    }
    Ok(out)
}

struct Stmt<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Stmt<'a> {
    fn peek(&self) -> Option<&'a TokenKind> {
        self.toks.get(self.pos).map(|t| &t.kind)
    }

    fn bump(&mut self) -> Option<&'a TokenKind> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Some(TokenKind::Ident(s)) if s == kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: &str) -> lexer::LexError {
        let line = self
            .toks
            .get(self.pos)
            .or(self.toks.last())
            .map(|t| t.line)
            .unwrap_or(1);
        lexer::LexError {
            line,
            message: message.to_string(),
        }
    }

    fn ident(&mut self) -> Result<&'a str, lexer::LexError> {
        match self.bump() {
            Some(TokenKind::Ident(s)) => Ok(s.as_str()),
            _ => Err(self.error("malformed import statement: expected a name")),
        }
    }

    // Returns the first segment of `a.b.c`.
    fn dotted_name(&mut self) -> Result<&'a str, lexer::LexError> {
        let head = self.ident()?;
        while self.eat(&TokenKind::Dot) {
            self.ident()?;
        }
        Ok(head)
    }

    fn alias(&mut self) -> Result<(), lexer::LexError> {
        if self.eat_keyword("as") {
            self.ident()?;
        }
        Ok(())
    }
}

fn parse_import(toks: &[Token], out: &mut BTreeSet<String>) -> Result<(), lexer::LexError> {
    let mut s = Stmt { toks, pos: 1 };
    loop {
        let head = s.dotted_name()?;
        s.alias()?;
        out.insert(head.to_string());
        if s.at_end() {
            return Ok(());
        }
        if !s.eat(&TokenKind::Comma) {
            return Err(s.error("malformed import statement"));
        }
    }
}

fn parse_from(toks: &[Token], out: &mut BTreeSet<String>) -> Result<(), lexer::LexError> {
    let mut s = Stmt { toks, pos: 1 };
    let mut relative = false;
    while s.eat(&TokenKind::Dot) {
        relative = true;
    }
    let head = if matches!(s.peek(), Some(TokenKind::Ident(kw)) if kw == "import") {
        None
    } else {
        Some(s.dotted_name()?)
    };
    if head.is_none() && !relative {
        return Err(s.error("malformed from-import: missing module"));
    }
    if !s.eat_keyword("import") {
        return Err(s.error("malformed from-import: expected `import`"));
    }
    if !s.eat(&TokenKind::Star) {
        let parens = s.eat(&TokenKind::LParen);
        loop {
            s.ident()?;
            s.alias()?;
            if !s.eat(&TokenKind::Comma) {
                break;
            }
            if parens && s.peek() == Some(&TokenKind::RParen) {
                break;
            }
        }
        if parens && !s.eat(&TokenKind::RParen) {
            return Err(s.error("malformed from-import: expected `)`"));
        }
    }
    if !s.at_end() {
        return Err(s.error("malformed from-import: trailing tokens"));
    }
    if let Some(head) = head
        && !relative
    {
        out.insert(head.to_string());
    }
    Ok(())
}

fn scan_file(path: &Path, outcome: &mut ScanOutcome) {
    outcome.files_scanned += 1;
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            outcome.errors.push(ScanError {
                path: path.to_path_buf(),
                line: None,
                message: format!("read failed: {}", e),
            });
            return;
        }
    };
    let Ok(text) = String::from_utf8(bytes) else {
        outcome.errors.push(ScanError {
            path: path.to_path_buf(),
            line: None,
            message: "source is not valid UTF-8".to_string(),
        });
        return;
    };
    match scan_imports_in_text(&text) {
        Ok(names) => outcome.imports.extend(names),
        Err(e) => {
            warn!(path = %path.display(), line = e.line, "{}", e.message);
            outcome.errors.push(ScanError {
                path: path.to_path_buf(),
                line: Some(e.line),
                message: e.message,
            });
        }
    }
}

// Symlinked directories are never followed, so a link back up the tree cannot loop.
fn walk(dir: &Path, outcome: &mut ScanOutcome) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|ent| ent.and_then(|e| Ok((e.path(), e.file_type()?))))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (p, kind) in entries {
        if kind.is_symlink() {
            if p.is_dir() {
                debug!(dir = %p.display(), "not following symlinked directory");
                continue;
            }
        } else if kind.is_dir() {
            if let Some(name) = p.file_name().and_then(|s| s.to_str())
                && is_skip_dir(name)
            {
                debug!(dir = %p.display(), "skipping directory");
                continue;
            }
            if let Err(e) = walk(&p, outcome) {
                outcome.errors.push(ScanError {
                    path: p.clone(),
                    line: None,
                    message: format!("read dir failed: {}", e),
                });
            }
            continue;
        }
        if p.extension().and_then(|s| s.to_str()) == Some("py") {
            scan_file(&p, outcome);
        }
    }
    Ok(())
}

/// Walks one root without consulting any memo.
pub fn scan_root(root: &Path) -> Result<ScanOutcome, AuditError> {
    let mut outcome = ScanOutcome::default();
    if root.is_file() {
        scan_file(root, &mut outcome);
        return Ok(outcome);
    }
    walk(root, &mut outcome).map_err(|source| AuditError::SourceRoot {
        path: root.to_path_buf(),
        source,
    })?;
    debug!(
        root = %root.display(),
        files = outcome.files_scanned,
        imports = outcome.imports.len(),
        errors = outcome.errors.len(),
        "scanned source root"
    );
    Ok(outcome)
}

type Slot = Arc<OnceLock<Arc<ScanOutcome>>>;

/// Per-root memo. Concurrent requests for the same root share one walk.
#[derive(Default)]
pub struct ImportScanner {
    memo: Mutex<HashMap<PathBuf, Slot>>,
}

impl ImportScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&self, root: &Path) -> Result<Arc<ScanOutcome>, AuditError> {
        let key = fs::canonicalize(root).map_err(|source| AuditError::SourceRoot {
            path: root.to_path_buf(),
            source,
        })?;
        let slot = {
            let mut memo = self.memo.lock();
            memo.entry(key.clone()).or_default().clone()
        };
        if let Some(hit) = slot.get() {
            debug!(root = %key.display(), "scan memo hit");
            return Ok(hit.clone());
        }
        let mut failure = None;
        let outcome = slot.get_or_init(|| match scan_root(&key) {
            Ok(o) => Arc::new(o),
            Err(e) => {
                failure = Some(e);
                Arc::new(ScanOutcome::default())
            }
        });
        if let Some(e) = failure {
            self.memo.lock().remove(&key);
            return Err(e);
        }
        Ok(outcome.clone())
    }

    /// Scans every root in parallel and unions the outcomes.
    pub fn scan_roots(&self, roots: &[PathBuf]) -> Result<ScanOutcome, AuditError> {
        let results: Vec<Result<Arc<ScanOutcome>, AuditError>> = thread::scope(|scope| {
            let handles: Vec<_> = roots
                .iter()
                .map(|root| (root, scope.spawn(move || self.scan(root))))
                .collect();
            handles
                .into_iter()
                .map(|(root, h)| {
                    h.join().unwrap_or_else(|_| {
                        Err(AuditError::SourceRoot {
                            path: root.clone(),
                            source: std::io::Error::other("scanner worker panicked"),
                        })
                    })
                })
                .collect()
        });
        let mut merged = ScanOutcome::default();
        for r in results {
            merged.merge(&*r?);
        }
        Ok(merged)
    }

    pub fn reset(&self) {
        self.memo.lock().clear();
    }
}
